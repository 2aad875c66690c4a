use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use world_keeper_core::retention::RetentionPolicy;
use world_keeper_core::{Error, Result};

use crate::record::{ArchiveRecord, RecordSummary};

/// Opens a fresh connection to the backing document collection.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Fails with `Error::ConnectionFailed` when the store is unreachable.
    async fn connect(&self) -> Result<Box<dyn Collection>>;

    fn describe(&self) -> String;
}

/// One open connection. Dropped at the end of every store operation.
#[async_trait]
pub trait Collection: Send {
    async fn insert(&mut self, record: ArchiveRecord) -> Result<String>;

    /// Summaries ordered newest first, skipping the first `skip`.
    async fn find(&mut self, skip: usize) -> Result<Vec<RecordSummary>>;

    async fn fetch(&mut self, id: &str) -> Result<Option<ArchiveRecord>>;

    async fn delete(&mut self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub id: String,
    pub filename: String,
    pub pruned: Vec<String>,
    pub prune_errors: Vec<String>,
}

#[derive(Clone)]
pub struct BackupStore {
    connector: Arc<dyn Connector>,
    policy: RetentionPolicy,
}

impl BackupStore {
    pub fn new(connector: Arc<dyn Connector>, policy: RetentionPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Stores the record, then deletes everything older than the newest
    /// `keep`. Pruning problems are reported, never rolled back.
    pub async fn put(&self, record: ArchiveRecord) -> Result<PutOutcome> {
        let mut conn = self.connector.connect().await?;
        let filename = record.filename.clone();
        let size_bytes = record.size_bytes;
        let id = conn.insert(record).await?;
        info!(id = %id, filename = %filename, size_bytes, "stored backup");

        let (pruned, prune_errors) = self.prune(conn.as_mut()).await;
        Ok(PutOutcome {
            id,
            filename,
            pruned,
            prune_errors,
        })
    }

    async fn prune(&self, conn: &mut dyn Collection) -> (Vec<String>, Vec<String>) {
        let mut pruned = Vec::new();
        let mut errors = Vec::new();

        let expired = match conn.find(self.policy.prune_offset()).await {
            Ok(expired) => expired,
            Err(err) => {
                warn!(error = %err, "failed to list backups for pruning");
                errors.push(err.to_string());
                return (pruned, errors);
            }
        };

        for record in expired {
            match conn.delete(&record.id).await {
                Ok(()) => {
                    info!(id = %record.id, filename = %record.filename, "pruned old backup");
                    pruned.push(record.id);
                }
                Err(err) => {
                    warn!(id = %record.id, error = %err, "failed to prune backup");
                    errors.push(format!("{}: {err}", record.id));
                }
            }
        }
        (pruned, errors)
    }

    /// Newest first. An unreachable store reads as empty.
    pub async fn list(&self) -> Vec<RecordSummary> {
        match self.try_list().await {
            Ok(records) => records,
            Err(err) => {
                warn!(store = %self.describe(), error = %err, "backup listing unavailable");
                Vec::new()
            }
        }
    }

    pub async fn try_list(&self) -> Result<Vec<RecordSummary>> {
        let mut conn = self.connector.connect().await?;
        conn.find(0).await
    }

    pub async fn get(&self, id: &str) -> Result<ArchiveRecord> {
        let mut conn = self.connector.connect().await?;
        let record = conn
            .fetch(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("backup {id}")))?;
        record.verify()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    fn store(connector: &MemoryConnector) -> BackupStore {
        BackupStore::new(Arc::new(connector.clone()), RetentionPolicy::default())
    }

    fn record_at(n: i64) -> ArchiveRecord {
        let at: OffsetDateTime = datetime!(2024-01-01 0:00 UTC) + Duration::minutes(n);
        ArchiveRecord::new(format!("world_backup_{n}.zip"), at, vec![n as u8; 16])
    }

    #[tokio::test]
    async fn list_length_is_capped_at_five() {
        let connector = MemoryConnector::new();
        let store = store(&connector);
        for n in 1..=8 {
            store.put(record_at(n)).await.unwrap();
            let listed = store.list().await;
            assert_eq!(listed.len(), (n as usize).min(5));
        }
        let names: Vec<_> = store.list().await.into_iter().map(|r| r.filename).collect();
        assert_eq!(
            names,
            vec![
                "world_backup_8.zip",
                "world_backup_7.zip",
                "world_backup_6.zip",
                "world_backup_5.zip",
                "world_backup_4.zip",
            ]
        );
    }

    #[tokio::test]
    async fn pruning_removes_strictly_the_oldest() {
        let connector = MemoryConnector::new();
        let store = store(&connector);
        // Inserted out of order; ordering comes from the timestamps.
        for n in [3, 1, 6, 2, 5, 4] {
            connector.seed(record_at(n));
        }
        let outcome = store.put(record_at(7)).await.unwrap();
        assert_eq!(outcome.pruned.len(), 2);
        assert!(outcome.prune_errors.is_empty());

        let mut minutes: Vec<_> = store
            .list()
            .await
            .into_iter()
            .map(|r| (r.created_at - datetime!(2024-01-01 0:00 UTC)).whole_minutes())
            .collect();
        minutes.sort();
        assert_eq!(minutes, vec![3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn get_returns_what_was_put() {
        let connector = MemoryConnector::new();
        let store = store(&connector);
        let original = record_at(1);
        let outcome = store.put(original.clone()).await.unwrap();

        let fetched = store.get(&outcome.id).await.unwrap();
        assert_eq!(fetched.payload, original.payload);
        assert_eq!(fetched.filename, "world_backup_1.zip");
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = store(&MemoryConnector::new());
        assert!(matches!(store.get("missing").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn offline_store_degrades() {
        let connector = MemoryConnector::new();
        let store = store(&connector);
        store.put(record_at(1)).await.unwrap();
        connector.set_offline(true);

        assert!(store.list().await.is_empty());
        assert!(matches!(store.try_list().await, Err(Error::ConnectionFailed(_))));
        assert!(matches!(store.put(record_at(2)).await, Err(Error::ConnectionFailed(_))));
        assert!(matches!(store.get("mem-00000001").await, Err(Error::ConnectionFailed(_))));

        connector.set_offline(false);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn every_operation_opens_its_own_connection() {
        let connector = MemoryConnector::new();
        let store = store(&connector);
        let outcome = store.put(record_at(1)).await.unwrap();
        store.list().await;
        store.get(&outcome.id).await.unwrap();
        assert_eq!(connector.connections(), 3);
    }
}
