use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use world_keeper_core::{Error, Result};

/// One stored archive: metadata plus the opaque zip payload.
#[derive(Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub filename: String,
    pub created_at: OffsetDateTime,
    pub size_bytes: u64,
    pub sha256: String,
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for ArchiveRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveRecord")
            .field("filename", &self.filename)
            .field("created_at", &self.created_at)
            .field("size_bytes", &self.size_bytes)
            .field("sha256", &self.sha256)
            .finish_non_exhaustive()
    }
}

impl ArchiveRecord {
    pub fn new(filename: impl Into<String>, created_at: OffsetDateTime, payload: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            created_at,
            size_bytes: payload.len() as u64,
            sha256: sha256_hex(&payload),
            payload,
        }
    }

    /// Checks the payload against the declared size and checksum.
    pub fn verify(&self) -> Result<()> {
        if self.payload.len() as u64 != self.size_bytes {
            return Err(Error::ReadFailed(format!(
                "{}: payload is {} bytes, record says {}",
                self.filename,
                self.payload.len(),
                self.size_bytes
            )));
        }
        let actual = sha256_hex(&self.payload);
        if actual != self.sha256 {
            return Err(Error::ReadFailed(format!(
                "{}: checksum mismatch (expected {}, got {actual})",
                self.filename, self.sha256
            )));
        }
        Ok(())
    }

    pub fn summary(&self, id: impl Into<String>) -> RecordSummary {
        RecordSummary {
            id: id.into(),
            filename: self.filename.clone(),
            created_at: self.created_at,
            size_bytes: self.size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub id: String,
    pub filename: String,
    pub created_at: OffsetDateTime,
    pub size_bytes: u64,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `<unix nanos, 20 digits>_<filename>`; ids sort by creation time.
pub fn record_id(created_at: OffsetDateTime, filename: &str) -> String {
    format!("{:020}_{filename}", created_at.unix_timestamp_nanos())
}

pub fn parse_record_id(id: &str) -> Option<(OffsetDateTime, String)> {
    let (nanos, filename) = id.split_once('_')?;
    if nanos.len() != 20 || !nanos.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !is_plain_name(filename) {
        return None;
    }
    let created_at = OffsetDateTime::from_unix_timestamp_nanos(nanos.parse().ok()?).ok()?;
    Some((created_at, filename.to_string()))
}

/// Rejects names that could address anything outside a flat namespace.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(|c: char| c == '/' || c == '\\')
        && !name.contains("..")
}
