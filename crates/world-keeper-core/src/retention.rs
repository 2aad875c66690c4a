/// Number of backups kept when the config does not say otherwise.
pub const DEFAULT_KEEP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep: DEFAULT_KEEP }
    }
}

impl RetentionPolicy {
    pub fn new(keep: usize) -> Self {
        Self { keep }
    }

    /// Position in a newest-first listing from which records are expired.
    pub fn prune_offset(&self) -> usize {
        self.keep
    }
}

/// Sorts descending by `key`; ties keep their relative order.
pub fn order_newest_first<T, K: Ord>(records: &mut [T], key: impl Fn(&T) -> K) {
    records.sort_by(|a, b| key(b).cmp(&key(a)));
}
