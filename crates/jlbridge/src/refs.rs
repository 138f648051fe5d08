//! Opaque reference table.
//!
//! Values that cannot (or should not) be encoded structurally are kept here
//! and shipped as handles. The table owns one strong handle per entry until
//! the host releases it; there is no expiry and no reference counting across
//! handles, so each allocation is released independently.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::value::HostValue;

pub struct RefTable<V> {
    next: AtomicU64,
    entries: DashMap<String, V>,
}

impl<V> Default for RefTable<V> {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }
}

impl<V: HostValue> RefTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under a fresh handle.
    ///
    /// Handles are decimal strings of a process-wide counter and are never
    /// reused, even after release.
    pub fn allocate(&self, value: V) -> String {
        let handle = self.next.fetch_add(1, Ordering::Relaxed).to_string();
        self.entries.insert(handle.clone(), value);
        handle
    }

    /// Drop the table's handle. Returns whether an entry was present.
    pub fn release(&self, handle: &str) -> bool {
        self.entries.remove(handle).is_some()
    }

    /// A new strong handle to the referenced value.
    pub fn get(&self, handle: &str) -> Option<V> {
        self.entries.get(handle).map(|entry| entry.value().share())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
