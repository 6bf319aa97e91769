//! The in-memory view of all live records.
//!
//! The [`RecordCache`] is never the source of truth. It holds a snapshot of the live records of
//! a [`RecordRepository`] as of the last successful [`reload`](RecordCache::reload), which is
//! replaced as a whole on every reload.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tokio::sync::Mutex;

use crate::repository::{RecordRepository, RepositoryError};
use crate::types::Record;

type Snapshot = Arc<HashMap<String, Record>>;

/// A snapshot of live records keyed by domain, guarded by a reader/writer lock.
///
/// Readers hold the read lock for a single map access. A reload builds the next snapshot
/// without holding any lock and takes the write lock only to swap it in, so readers observe
/// either the previous or the next snapshot in full.
///
/// Reloads are serialized, a snapshot is never replaced by one read from the repository earlier.
#[derive(Debug, Default)]
pub struct RecordCache {
    records: RwLock<Snapshot>,
    reloading: Mutex<()>,
}

impl RecordCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the record for an exact domain match.
    pub fn lookup(&self, domain: &str) -> Option<Record> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain)
            .cloned()
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.records.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The number of cached records.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the cached records with the current live records of `repository`.
    ///
    /// Returns the number of cached records. On error, the previous snapshot stays in place.
    pub async fn reload(&self, repository: &dyn RecordRepository) -> Result<usize, RepositoryError> {
        let _reloading = self.reloading.lock().await;
        let start = Instant::now();
        let records = match repository.find().await {
            Ok(records) => records,
            Err(err) => {
                metric!(counter("cache.reload") += 1, "result" => "error");
                return Err(err);
            }
        };

        let count = self.replace(records);

        metric!(counter("cache.reload") += 1, "result" => "ok");
        metric!(gauge("cache.records") = count as u64);
        metric!(timer("cache.reload.duration") = start.elapsed());
        tracing::debug!(records = count, "reloaded record cache");

        Ok(count)
    }

    /// Builds a snapshot from `records` and swaps it in.
    ///
    /// Tombstones are skipped. Should a repository ever return two live records for one domain,
    /// the first one wins.
    fn replace(&self, records: Vec<Record>) -> usize {
        let mut map = HashMap::with_capacity(records.len());
        for record in records.into_iter().filter(Record::is_live) {
            match map.entry(record.domain.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(record);
                }
                Entry::Occupied(entry) => {
                    tracing::warn!(
                        domain = %record.domain,
                        kept = entry.get().id,
                        dropped = record.id,
                        "repository returned duplicate live records"
                    );
                }
            }
        }
        let count = map.len();

        let previous = {
            let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, Arc::new(map))
        };
        // the previous snapshot is freed outside of the lock
        drop(previous);

        count
    }
}
