use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("server executable not found (tried {})", join_paths(.attempted))]
    ExecutableNotFound { attempted: Vec<PathBuf> },

    #[error("backup store unreachable: {0}")]
    ConnectionFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("failed to spawn {}: {source}", .path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("world is busy: {0}")]
    Busy(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn write(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::WriteFailed(format!("{context}: {err}"))
    }

    pub fn read(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Error::ReadFailed(format!("{context}: {err}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::ExecutableNotFound { .. })
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no candidates".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
