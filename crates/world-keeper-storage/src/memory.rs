//! In-process backend. Shared between clones, can be taken offline, and
//! counts connections; used by tests and `backend = "memory"`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use world_keeper_core::retention::order_newest_first;
use world_keeper_core::{Error, Result};

use crate::record::{ArchiveRecord, RecordSummary};
use crate::store::{Collection, Connector};

#[derive(Debug, Default)]
struct Documents {
    next_id: u64,
    records: Vec<(String, ArchiveRecord)>,
}

impl Documents {
    fn add(&mut self, record: ArchiveRecord) -> String {
        self.next_id += 1;
        let id = format!("mem-{:08}", self.next_id);
        self.records.push((id.clone(), record));
        id
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    documents: Arc<Mutex<Documents>>,
    offline: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Inserts directly, bypassing retention.
    pub fn seed(&self, record: ArchiveRecord) -> String {
        lock(&self.documents).add(record)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Collection>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("memory store is offline".to_string()));
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCollection {
            documents: Arc::clone(&self.documents),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

struct MemoryCollection {
    documents: Arc<Mutex<Documents>>,
}

fn lock(documents: &Mutex<Documents>) -> MutexGuard<'_, Documents> {
    documents.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn insert(&mut self, record: ArchiveRecord) -> Result<String> {
        Ok(lock(&self.documents).add(record))
    }

    async fn find(&mut self, skip: usize) -> Result<Vec<RecordSummary>> {
        let mut summaries: Vec<RecordSummary> = lock(&self.documents)
            .records
            .iter()
            .map(|(id, record)| record.summary(id.clone()))
            .collect();
        order_newest_first(&mut summaries, |r| (r.created_at, r.id.clone()));
        Ok(summaries.into_iter().skip(skip).collect())
    }

    async fn fetch(&mut self, id: &str) -> Result<Option<ArchiveRecord>> {
        Ok(lock(&self.documents)
            .records
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, record)| record.clone()))
    }

    async fn delete(&mut self, id: &str) -> Result<()> {
        let mut documents = lock(&self.documents);
        let before = documents.records.len();
        documents.records.retain(|(key, _)| key != id);
        if documents.records.len() == before {
            return Err(Error::NotFound(format!("backup {id}")));
        }
        Ok(())
    }
}
