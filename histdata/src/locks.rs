//! Per-(symbol, interval) serialization for writers

use crate::data::Interval;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type DatasetKey = (String, Interval);

/// Lazily created async mutex per dataset.
///
/// The guard is owned, so it is released however the holding future ends:
/// success, error or being dropped mid-await.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<DatasetKey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, symbol: &str, interval: Interval) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(symbol, interval);
        lock.lock_owned().await
    }

    fn lock_for(&self, symbol: &str, interval: Interval) -> Arc<AsyncMutex<()>> {
        // Entries are only ever inserted, so a poisoned map is still consistent.
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry((symbol.to_string(), interval))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Number of datasets that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
