use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::retention::DEFAULT_KEEP;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    pub paths: Paths,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub store: Store,
    pub cloud: Option<Cloud>,
    #[serde(default)]
    pub restore: Restore,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    /// Tried in order; the first existing file is launched.
    pub candidates: Vec<PathBuf>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Paths {
    pub worlds: PathBuf,
    #[serde(default = "default_staging")]
    pub staging: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Http {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_public_address")]
    pub public_address: String,
    #[serde(default = "default_game_port")]
    pub game_port: u16,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            public_address: default_public_address(),
            game_port: default_game_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Local,
    R2,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Store {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_keep")]
    pub keep: usize,
    pub local_root: Option<PathBuf>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            keep: default_keep(),
            local_root: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Cloud {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Restore {
    #[serde(default)]
    pub require_stopped_server: bool,
}

fn default_staging() -> PathBuf {
    std::env::temp_dir().join("world-keeper")
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_address() -> String {
    "localhost".to_string()
}

fn default_game_port() -> u16 {
    19132
}

fn default_keep() -> usize {
    DEFAULT_KEEP
}

fn default_prefix() -> String {
    "backups/".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config: {}", path.as_ref().display()))?;
        let cfg = Self::parse(&contents)
            .with_context(|| format!("failed to parse config: {}", path.as_ref().display()))?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies `PORT` and `HEROKU_APP_NAME` from the environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("HEROKU_APP_NAME").ok().as_deref(),
        );
    }

    fn apply_overrides(&mut self, port: Option<&str>, app_name: Option<&str>) {
        if let Some(port) = port.and_then(|p| p.trim().parse::<u16>().ok()) {
            self.http.port = port;
        }
        if let Some(name) = app_name.map(str::trim).filter(|n| !n.is_empty()) {
            self.http.public_address = format!("{name}.herokuapp.com");
        }
    }

    /// Root directory for the local backend; defaults to `<staging>/store`.
    pub fn local_store_root(&self) -> PathBuf {
        self.store
            .local_root
            .clone()
            .unwrap_or_else(|| self.paths.staging.join("store"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[server]
candidates = ["/opt/bedrock/bedrock_server"]

[paths]
worlds = "/opt/bedrock/worlds"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = Config::parse(MINIMAL).unwrap();
        assert_eq!(cfg.server.candidates.len(), 1);
        assert_eq!(cfg.http.port, 8080);
        assert_eq!(cfg.http.game_port, 19132);
        assert_eq!(cfg.store.keep, 5);
        assert_eq!(cfg.store.backend, Backend::Local);
        assert!(!cfg.restore.require_stopped_server);
        assert!(cfg.cloud.is_none());
    }

    #[test]
    fn cloud_section_parses() {
        let text = format!(
            "{MINIMAL}\n[store]\nbackend = \"r2\"\nkeep = 3\n\n[cloud]\nendpoint = \"https://x\"\nbucket = \"b\"\naccess_key = \"a\"\nsecret_key = \"s\"\n"
        );
        let cfg = Config::parse(&text).unwrap();
        assert_eq!(cfg.store.backend, Backend::R2);
        assert_eq!(cfg.store.keep, 3);
        assert_eq!(cfg.cloud.unwrap().prefix, "backups/");
    }

    #[test]
    fn env_overrides_port_and_address() {
        let mut cfg = Config::parse(MINIMAL).unwrap();
        cfg.apply_overrides(Some("5000"), Some("mc-host"));
        assert_eq!(cfg.http.port, 5000);
        assert_eq!(cfg.http.public_address, "mc-host.herokuapp.com");

        cfg.apply_overrides(Some("not-a-port"), Some(""));
        assert_eq!(cfg.http.port, 5000);
        assert_eq!(cfg.http.public_address, "mc-host.herokuapp.com");
    }
}
