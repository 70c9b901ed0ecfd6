// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tracelink.dev

//! Presence bookkeeping for connected instances.
//!
//! One table per bridge, passed by reference into handlers rather than
//! held as process-global state. The connected counter is maintained
//! with atomic increments/decrements and only moves when the map
//! actually changes, so duplicate connect or disconnect deliveries
//! cannot corrupt the count.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracelink_auth::ActiveInstance;

#[derive(Debug, Default)]
struct PresenceInner {
    instances: RwLock<HashMap<String, ActiveInstance>>,
    connected: AtomicI64,
}

/// Set of currently-connected instances plus a consistent counter.
#[derive(Debug, Clone, Default)]
pub struct PresenceTable {
    inner: Arc<PresenceInner>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connected instance. Returns false (and leaves the
    /// counter alone) when the instance id is already present.
    pub fn insert(&self, instance: ActiveInstance) -> bool {
        let mut instances = self.inner.instances.write();
        if instances.contains_key(&instance.instance_id) {
            return false;
        }
        instances.insert(instance.instance_id.clone(), instance);
        self.inner.connected.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Remove an instance. Absent ids are a no-op returning `None`;
    /// disconnect events may be delivered more than once.
    pub fn remove(&self, instance_id: &str) -> Option<ActiveInstance> {
        let removed = self.inner.instances.write().remove(instance_id);
        if removed.is_some() {
            self.inner.connected.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn connected_count(&self) -> i64 {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn active_instances(&self) -> Vec<ActiveInstance> {
        self.inner.instances.read().values().cloned().collect()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.inner.instances.read().contains_key(instance_id)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.instances.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Meta;

    fn instance(id: &str) -> ActiveInstance {
        ActiveInstance {
            instance_id: id.to_string(),
            connected_at: 1_700_000_000_000,
            meta: Meta::new(),
        }
    }

    #[test]
    fn test_insert_remove_symmetric() {
        let table = PresenceTable::new();
        for i in 0..10 {
            assert!(table.insert(instance(&format!("m{i}"))));
        }
        assert_eq!(table.connected_count(), 10);
        assert_eq!(table.active_instances().len(), 10);

        // Interleave removals out of insertion order.
        for i in (0..10).rev() {
            assert!(table.remove(&format!("m{i}")).is_some());
        }
        assert_eq!(table.connected_count(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_connect_does_not_double_count() {
        let table = PresenceTable::new();
        assert!(table.insert(instance("m1")));
        assert!(!table.insert(instance("m1")));
        assert_eq!(table.connected_count(), 1);
    }

    #[test]
    fn test_duplicate_disconnect_is_noop() {
        let table = PresenceTable::new();
        table.insert(instance("m1"));
        assert!(table.remove("m1").is_some());
        assert!(table.remove("m1").is_none());
        assert!(table.remove("never-connected").is_none());
        assert_eq!(table.connected_count(), 0);
    }
}
