//! Remote persistence for world archives with bounded retention.

pub mod cloud;
pub mod local;
pub mod memory;
pub mod record;
pub mod store;

pub use record::{ArchiveRecord, RecordSummary};
pub use store::{BackupStore, Collection, Connector, PutOutcome};
