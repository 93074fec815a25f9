//! Key-value storage the sync manager persists through.
//!
//! The store is a capability handed to the manager at construction, so the
//! same sync logic runs against a real origin-scoped store, a shared
//! in-memory store in tests, or no store at all.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{EditorError, EditorResult};

/// String key-value storage with quota semantics.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> EditorResult<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> EditorResult<()>;
    fn remove(&mut self, key: &str) -> EditorResult<()>;
    fn keys(&self) -> EditorResult<Vec<String>>;

    /// Total bytes of stored keys and values.
    fn used_bytes(&self) -> EditorResult<u64> {
        let mut total = 0u64;
        for key in self.keys()? {
            total += key.len() as u64;
            if let Some(value) = self.get(&key)? {
                total += value.len() as u64;
            }
        }
        Ok(total)
    }
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    entries: HashMap<String, String>,
    capacity: Option<usize>,
}

impl MemoryStoreInner {
    fn used(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

/// In-memory store backed by a shared handle.
///
/// Clones share the same underlying map, so two managers constructed over
/// clones of one `MemoryStore` observe each other's writes the way two tabs
/// share one origin store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryStoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes once total stored bytes would exceed
    /// `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryStoreInner {
                entries: HashMap::new(),
                capacity: Some(capacity),
            })),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> EditorResult<Option<String>> {
        Ok(self.inner.borrow().entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> EditorResult<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(capacity) = inner.capacity {
            let existing = inner
                .entries
                .get(key)
                .map(|v| key.len() + v.len())
                .unwrap_or(0);
            let after = inner.used() - existing + key.len() + value.len();
            if after > capacity {
                return Err(EditorError::QuotaExceeded);
            }
        }
        inner.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> EditorResult<()> {
        self.inner.borrow_mut().entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> EditorResult<Vec<String>> {
        Ok(self.inner.borrow().entries.keys().cloned().collect())
    }
}

/// Store for contexts without persistent storage; every access fails with
/// `StorageUnavailable` and callers degrade gracefully.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl KeyValueStore for NullStore {
    fn get(&self, _key: &str) -> EditorResult<Option<String>> {
        Err(EditorError::storage_unavailable("persistent storage disabled"))
    }

    fn set(&mut self, _key: &str, _value: &str) -> EditorResult<()> {
        Err(EditorError::storage_unavailable("persistent storage disabled"))
    }

    fn remove(&mut self, _key: &str) -> EditorResult<()> {
        Err(EditorError::storage_unavailable("persistent storage disabled"))
    }

    fn keys(&self) -> EditorResult<Vec<String>> {
        Err(EditorError::storage_unavailable("persistent storage disabled"))
    }
}

// =============================================================================
// TESTS
// =============================================================================
