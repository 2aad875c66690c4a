//! Directory-backed collection: `<id>.zip` holds the payload and
//! `<id>.json` the metadata.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;
use world_keeper_core::retention::order_newest_first;
use world_keeper_core::{Error, Result};

use crate::record::{is_plain_name, record_id, ArchiveRecord, RecordSummary};
use crate::store::{Collection, Connector};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Metadata {
    filename: String,
    created_at: String,
    size_bytes: u64,
    sha256: String,
}

#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<Box<dyn Collection>> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {e}", self.root.display())))?;
        Ok(Box::new(LocalCollection {
            root: self.root.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

struct LocalCollection {
    root: PathBuf,
}

impl LocalCollection {
    fn payload_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.zip"))
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read_metadata(&self, id: &str) -> Result<Option<Metadata>> {
        let path = self.metadata_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::read(path.display(), e)),
        };
        let meta = serde_json::from_slice(&bytes).map_err(|e| Error::read(path.display(), e))?;
        Ok(Some(meta))
    }
}

// Unlisted leftovers would never be pruned.
async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial backup file"),
    }
}

fn parse_time(meta: &Metadata) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(&meta.created_at, &Rfc3339)
        .map_err(|e| Error::read(format_args!("timestamp of {}", meta.filename), e))
}

#[async_trait]
impl Collection for LocalCollection {
    async fn insert(&mut self, record: ArchiveRecord) -> Result<String> {
        let id = record_id(record.created_at, &record.filename);
        if !is_plain_name(&record.filename) {
            return Err(Error::WriteFailed(format!(
                "invalid backup filename: {}",
                record.filename
            )));
        }
        let meta_path = self.metadata_path(&id);
        if tokio::fs::try_exists(&meta_path).await.unwrap_or(false) {
            return Err(Error::WriteFailed(format!("backup {id} already exists")));
        }

        let meta = Metadata {
            filename: record.filename.clone(),
            created_at: record
                .created_at
                .format(&Rfc3339)
                .map_err(|e| Error::write("format timestamp", e))?,
            size_bytes: record.size_bytes,
            sha256: record.sha256.clone(),
        };

        // Payload first; a record is only listed once its metadata exists.
        let payload_path = self.payload_path(&id);
        let partial = self.root.join(format!("{id}.zip.part"));
        if let Err(e) = tokio::fs::write(&partial, &record.payload).await {
            discard(&partial).await;
            return Err(Error::write(partial.display(), e));
        }
        if let Err(e) = tokio::fs::rename(&partial, &payload_path).await {
            discard(&partial).await;
            return Err(Error::write(payload_path.display(), e));
        }

        let written = match serde_json::to_vec_pretty(&meta) {
            Ok(json) => tokio::fs::write(&meta_path, json)
                .await
                .map_err(|e| Error::write(meta_path.display(), e)),
            Err(e) => Err(Error::write("encode metadata", e)),
        };
        if let Err(err) = written {
            discard(&meta_path).await;
            discard(&payload_path).await;
            return Err(err);
        }
        Ok(id)
    }

    async fn find(&mut self, skip: usize) -> Result<Vec<RecordSummary>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::read(self.root.display(), e))?;

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::read(self.root.display(), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            let summary = match self.read_metadata(id).await {
                Ok(Some(meta)) => parse_time(&meta).map(|created_at| RecordSummary {
                    id: id.to_string(),
                    filename: meta.filename,
                    created_at,
                    size_bytes: meta.size_bytes,
                }),
                Ok(None) => continue,
                Err(err) => Err(err),
            };
            match summary {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(id, error = %err, "skipping unreadable backup metadata"),
            }
        }

        order_newest_first(&mut summaries, |r| (r.created_at, r.id.clone()));
        Ok(summaries.into_iter().skip(skip).collect())
    }

    async fn fetch(&mut self, id: &str) -> Result<Option<ArchiveRecord>> {
        if !is_plain_name(id) {
            return Ok(None);
        }
        let Some(meta) = self.read_metadata(id).await? else {
            return Ok(None);
        };
        let created_at = parse_time(&meta)?;
        let path = self.payload_path(id);
        let payload = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::read(path.display(), e))?;
        Ok(Some(ArchiveRecord {
            filename: meta.filename,
            created_at,
            size_bytes: meta.size_bytes,
            sha256: meta.sha256,
            payload,
        }))
    }

    async fn delete(&mut self, id: &str) -> Result<()> {
        if !is_plain_name(id) {
            return Err(Error::NotFound(format!("backup {id}")));
        }
        let meta_path = self.metadata_path(id);
        match tokio::fs::remove_file(&meta_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("backup {id}")));
            }
            Err(e) => return Err(Error::write(meta_path.display(), e)),
        }
        let payload_path = self.payload_path(id);
        match tokio::fs::remove_file(&payload_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::write(payload_path.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BackupStore;
    use std::sync::Arc;
    use tempfile::tempdir;
    use time::macros::datetime;
    use time::Duration;
    use world_keeper_core::retention::RetentionPolicy;

    fn record_at(n: i64) -> ArchiveRecord {
        let at = datetime!(2024-03-01 10:00 UTC) + Duration::seconds(n);
        ArchiveRecord::new(format!("world_backup_{n:02}.zip"), at, vec![n as u8; 32])
    }

    #[tokio::test]
    async fn survives_reconnects_and_prunes() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(
            Arc::new(LocalConnector::new(tmp.path().join("store"))),
            RetentionPolicy::default(),
        );

        let mut ids = Vec::new();
        for n in 1..=7 {
            ids.push(store.put(record_at(n)).await.unwrap().id);
        }

        let listed = store.list().await;
        assert_eq!(listed.len(), 5);
        assert_eq!(listed[0].filename, "world_backup_07.zip");
        assert_eq!(listed[4].filename, "world_backup_03.zip");

        let fetched = store.get(&ids[6]).await.unwrap();
        assert_eq!(fetched.payload, vec![7u8; 32]);
        assert!(matches!(store.get(&ids[0]).await, Err(Error::NotFound(_))));

        // Only the retained five pairs remain on disk.
        let files = std::fs::read_dir(tmp.path().join("store")).unwrap().count();
        assert_eq!(files, 10);
    }

    #[tokio::test]
    async fn corrupted_payload_is_detected() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("store");
        let store = BackupStore::new(
            Arc::new(LocalConnector::new(&root)),
            RetentionPolicy::default(),
        );
        let id = store.put(record_at(1)).await.unwrap().id;
        std::fs::write(root.join(format!("{id}.zip")), b"tampered").unwrap();

        assert!(matches!(store.get(&id).await, Err(Error::ReadFailed(_))));
    }

    #[tokio::test]
    async fn failed_insert_leaves_no_partial_files() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("store");
        let record = record_at(1);
        let id = record_id(record.created_at, &record.filename);

        // A non-empty directory where the payload should land blocks the rename.
        std::fs::create_dir_all(root.join(format!("{id}.zip")).join("occupied")).unwrap();

        let mut collection = LocalConnector::new(&root).connect().await.unwrap();
        assert!(matches!(
            collection.insert(record).await,
            Err(Error::WriteFailed(_))
        ));

        let mut names: Vec<String> = std::fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![format!("{id}.zip")]);
        assert!(collection.find(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn traversal_ids_are_not_found() {
        let tmp = tempdir().unwrap();
        let store = BackupStore::new(
            Arc::new(LocalConnector::new(tmp.path())),
            RetentionPolicy::default(),
        );
        assert!(matches!(store.get("../secret").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn unusable_root_is_a_connection_failure() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let store = BackupStore::new(
            Arc::new(LocalConnector::new(file.join("store"))),
            RetentionPolicy::default(),
        );
        assert!(store.list().await.is_empty());
        assert!(matches!(
            store.put(record_at(1)).await,
            Err(Error::ConnectionFailed(_))
        ));
    }
}
