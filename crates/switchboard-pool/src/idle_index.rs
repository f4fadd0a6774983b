//! Secondary index over idle connections
//!
//! The index is derived from the pool registry: an entry exists iff the
//! record it names is idle and still present in its pool. It lets global
//! eviction find the oldest idle connection without walking every pool.

use crate::key::{idle_index_key, PoolKey};
use crate::record::ConnectionRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Index entry for one idle record
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IdleEntry {
    pub(crate) pool_key: PoolKey,
    pub(crate) instance_tag: Arc<str>,
    pub(crate) last_used: Instant,
}

impl IdleEntry {
    pub(crate) fn of(record: &ConnectionRecord) -> Self {
        Self {
            pool_key: record.pool_key.clone(),
            instance_tag: Arc::clone(&record.instance_tag),
            last_used: record.last_used,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct IdleIndex {
    entries: HashMap<String, IdleEntry>,
}

impl IdleIndex {
    /// Insert or refresh the entry for an idle record
    pub(crate) fn insert(&mut self, record: &ConnectionRecord) {
        self.entries.insert(
            idle_index_key(&record.pool_key, &record.instance_tag),
            IdleEntry::of(record),
        );
    }

    /// Remove an entry, returning whether it was present
    pub(crate) fn remove(&mut self, pool_key: &PoolKey, instance_tag: &str) -> bool {
        self.entries
            .remove(&idle_index_key(pool_key, instance_tag))
            .is_some()
    }

    /// Entry with the smallest `last_used`
    pub(crate) fn oldest(&self) -> Option<&IdleEntry> {
        self.entries.values().min_by_key(|entry| entry.last_used)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Reconcile the index with the true idle set.
    ///
    /// Stale entries are deleted, missing or outdated ones are (re)inserted.
    /// Returns the number of inconsistencies fixed.
    pub(crate) fn reconcile<'a, I>(&mut self, idle_records: I) -> usize
    where
        I: IntoIterator<Item = &'a ConnectionRecord>,
    {
        let expected: HashMap<String, IdleEntry> = idle_records
            .into_iter()
            .map(|record| {
                (
                    idle_index_key(&record.pool_key, &record.instance_tag),
                    IdleEntry::of(record),
                )
            })
            .collect();

        let before = self.entries.len();
        self.entries.retain(|key, _| expected.contains_key(key));
        let mut fixed = before - self.entries.len();

        for (key, entry) in expected {
            match self.entries.get(&key) {
                Some(existing) if *existing == entry => {}
                _ => {
                    self.entries.insert(key, entry);
                    fixed += 1;
                }
            }
        }

        fixed
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, entry: IdleEntry) {
        self.entries
            .insert(idle_index_key(&entry.pool_key, &entry.instance_tag), entry);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, pool_key: &PoolKey, instance_tag: &str) -> bool {
        self.entries
            .contains_key(&idle_index_key(pool_key, instance_tag))
    }
}
