//! Watch-list store contract.

use std::sync::Mutex;

use indexmap::IndexSet;

use crate::address::TrackedAddress;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("watch-list I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch-list file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persistent set of tracked addresses, in insertion order.
///
/// Implementations acknowledge a write only after it is durable.
#[async_trait::async_trait]
pub trait WatchListStore: Send + Sync {
    async fn get(&self) -> Result<Vec<TrackedAddress>, StoreError>;

    /// Returns `true` if the address was not already present.
    async fn add(&self, address: TrackedAddress) -> Result<bool, StoreError>;

    /// Returns `true` if the address was present.
    async fn remove(&self, address: TrackedAddress) -> Result<bool, StoreError>;
}

/// Volatile store, used for tests and for sessions started without a data file.
#[derive(Debug, Default)]
pub struct MemoryWatchList {
    addresses: Mutex<IndexSet<TrackedAddress>>,
}

impl MemoryWatchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addresses(addresses: impl IntoIterator<Item = TrackedAddress>) -> Self {
        Self {
            addresses: Mutex::new(addresses.into_iter().collect()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexSet<TrackedAddress>> {
        match self.addresses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait::async_trait]
impl WatchListStore for MemoryWatchList {
    async fn get(&self) -> Result<Vec<TrackedAddress>, StoreError> {
        Ok(self.lock().iter().copied().collect())
    }

    async fn add(&self, address: TrackedAddress) -> Result<bool, StoreError> {
        Ok(self.lock().insert(address))
    }

    async fn remove(&self, address: TrackedAddress) -> Result<bool, StoreError> {
        Ok(self.lock().shift_remove(&address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> TrackedAddress {
        format!("0x{}{last:02x}", "0".repeat(38)).parse().unwrap()
    }

    #[tokio::test]
    async fn add_is_deduplicated_and_ordered() {
        let store = MemoryWatchList::new();
        assert!(store.add(addr(2)).await.unwrap());
        assert!(store.add(addr(1)).await.unwrap());
        assert!(!store.add(addr(2)).await.unwrap());
        assert_eq!(store.get().await.unwrap(), vec![addr(2), addr(1)]);
    }

    #[tokio::test]
    async fn remove_keeps_order_of_the_rest() {
        let store = MemoryWatchList::with_addresses([addr(1), addr(2), addr(3)]);
        assert!(store.remove(addr(2)).await.unwrap());
        assert!(!store.remove(addr(2)).await.unwrap());
        assert_eq!(store.get().await.unwrap(), vec![addr(1), addr(3)]);
    }
}
