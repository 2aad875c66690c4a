use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};
use tokio::sync::RwLock;
use tokio::task::JoinError;
use tracing::{info, warn};
use world_keeper_core::config::{Backend, Config};
use world_keeper_core::restore::RestoreReport;
use world_keeper_core::retention::RetentionPolicy;
use world_keeper_core::{archive, restore, Error, Result};
use world_keeper_process::SupervisorHandle;
use world_keeper_storage::cloud::{R2Config, R2Connector};
use world_keeper_storage::local::LocalConnector;
use world_keeper_storage::memory::MemoryConnector;
use world_keeper_storage::{ArchiveRecord, BackupStore, Connector, PutOutcome};

/// Builds the configured backend.
pub fn open_store(cfg: &Config) -> AnyResult<BackupStore> {
    let connector: Arc<dyn Connector> = match cfg.store.backend {
        Backend::Local => Arc::new(LocalConnector::new(cfg.local_store_root())),
        Backend::R2 => {
            let cloud = cfg
                .cloud
                .as_ref()
                .ok_or_else(|| anyhow!("cloud config is required for the r2 backend"))?;
            Arc::new(R2Connector::new(R2Config {
                endpoint: cloud.endpoint.clone(),
                bucket: cloud.bucket.clone(),
                access_key: cloud.access_key.clone(),
                secret_key: cloud.secret_key.clone(),
                prefix: cloud.prefix.clone(),
            }))
        }
        Backend::Memory => {
            warn!("memory backend selected; backups are lost on exit");
            Arc::new(MemoryConnector::new())
        }
    };
    Ok(BackupStore::new(connector, RetentionPolicy::new(cfg.store.keep)))
}

#[derive(Debug, Clone)]
pub struct Restored {
    pub filename: String,
    pub report: RestoreReport,
}

/// Backup and restore over the world directory. Backups share the world
/// lock; a restore holds it exclusively.
#[derive(Clone)]
pub struct Keeper {
    cfg: Arc<Config>,
    store: BackupStore,
    world: Arc<RwLock<()>>,
}

impl Keeper {
    pub fn new(cfg: Arc<Config>, store: BackupStore) -> Self {
        Self {
            cfg,
            store,
            world: Arc::new(RwLock::new(())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    pub async fn backup(&self) -> Result<PutOutcome> {
        let _shared = self.world.read().await;

        let worlds = self.cfg.paths.worlds.clone();
        let output = self.cfg.paths.staging.join("archives");
        let built = tokio::task::spawn_blocking(move || archive::build(&worlds, &output))
            .await
            .map_err(task_failed)??;

        let payload = built.read_payload();
        if let Err(err) = built.remove() {
            warn!(error = %err, "failed to remove staged archive");
        }
        let record = ArchiveRecord::new(built.filename.clone(), built.created_at, payload?);

        let outcome = self.store.put(record).await?;
        for problem in &outcome.prune_errors {
            warn!(problem = %problem, "retention pruning incomplete");
        }
        Ok(outcome)
    }

    /// `server` is consulted for `restore.require_stopped_server` once the
    /// world lock is held.
    pub async fn restore(&self, id: &str, server: Option<&SupervisorHandle>) -> Result<Restored> {
        let _exclusive = self.world.write().await;
        let running = server.is_some_and(|s| s.is_running());
        if running && self.cfg.restore.require_stopped_server {
            return Err(Error::Busy(
                "stop the game server before restoring a backup".to_string(),
            ));
        }

        let record = self.store.get(id).await?;
        if running {
            warn!(id, "restoring while the game server is running");
        }

        let target = self.cfg.paths.worlds.clone();
        let filename = record.filename.clone();
        let report =
            tokio::task::spawn_blocking(move || restore::restore(&record.payload, &target))
                .await
                .map_err(task_failed)??;
        info!(id, filename = %filename, files = report.files, "backup restored");
        Ok(Restored { filename, report })
    }
}

fn task_failed(err: JoinError) -> Error {
    Error::WriteFailed(format!("background task failed: {err}"))
}
