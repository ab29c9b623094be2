//! Per-key read-write locks for live slot files.
//!
//! The registry hands out an independent read-write lock for any string key,
//! creating it on first use. Lookups of existing keys only touch one shard of
//! the underlying concurrent map, so unrelated keys never contend on a single
//! global lock, and first creation is race-free because insertion goes through
//! the map's entry API.
//!
//! Guards own a reference to their lock, so they can be held independently of
//! the registry borrow and always release on drop.
//!
//! ```rust
//! use slotdb::lock::KeyLockRegistry;
//!
//! let registry = KeyLockRegistry::new();
//! {
//!     let _guard = registry.write("abc123201704015");
//!     // exclusive access to the bucket files
//! }
//! let _a = registry.read("abc123201704015");
//! let _b = registry.read("abc123201704015");
//! assert_eq!(registry.len(), 1);
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Shared guard for a registry key.
pub type KeyReadGuard = ArcRwLockReadGuard<RawRwLock, ()>;

/// Exclusive guard for a registry key.
pub type KeyWriteGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Lazily populated table of per-key read-write locks.
#[derive(Debug, Default)]
pub struct KeyLockRegistry {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl KeyLockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the shared lock for `key`, blocking while a writer holds it.
    pub fn read(&self, key: &str) -> KeyReadGuard {
        self.lock_for(key).read_arc()
    }

    /// Acquires the exclusive lock for `key`, blocking while anyone holds it.
    pub fn write(&self, key: &str) -> KeyWriteGuard {
        self.lock_for(key).write_arc()
    }

    /// Removes every lock that no guard or pending acquirer holds.
    ///
    /// Entries are otherwise never evicted, so long-running owners call this
    /// periodically. A pruned key gets a fresh lock on its next use. Returns
    /// the number of locks removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // The map owns one reference; any other means the lock is in use.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    /// Number of keys that currently have a lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock has been created yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    // The map reference is released before the caller blocks on the key lock.
    fn lock_for(&self, key: &str) -> Arc<RwLock<()>> {
        if let Some(existing) = self.locks.get(key) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.locks.entry(key.to_string()).or_default().value())
    }
}
