//! Listener registries for field change events.
//!
//! A registry exists per server (server-scoped listeners) and once per
//! mirror (global listeners). Registration can happen at any time,
//! including from inside a listener; dispatch works on a snapshot of the
//! registry taken when the event is dispatched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::event::ChangeEvent;
use crate::field::ServerField;

/// Error returned by a failing listener.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked for one change event.
pub type Listener = Arc<dyn Fn(&ChangeEvent) -> Result<(), ListenerError> + Send + Sync>;

/// Process-wide counter so ids are unique across registries.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle used to remove a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Insertion-ordered listeners, grouped by the field they observe.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<ServerField, Vec<(ListenerId, Listener)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for changes of one field.
    pub fn add<F>(&self, field: ServerField, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(field)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Register the same listener for every field that emits events.
    pub fn add_all<F>(&self, listener: F) -> Vec<ListenerId>
    where
        F: Fn(&ChangeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        ServerField::ALL
            .into_iter()
            .filter(|field| field.emits_events())
            .map(|field| {
                let listener = Arc::clone(&listener);
                self.add(field, move |event| listener(event))
            })
            .collect()
    }

    /// Remove a listener. Returns false if it was not registered here.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        for entries in listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|(entry_id, _)| *entry_id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Copy of the listeners for a field, in registration order.
    pub fn snapshot(&self, field: ServerField) -> Vec<Listener> {
        self.listeners
            .read()
            .get(&field)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// Number of listeners registered for a field.
    pub fn len(&self, field: ServerField) -> usize {
        self.listeners.read().get(&field).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());

        let id = registry.add(ServerField::Name, |_| Ok(()));
        assert_eq!(registry.len(ServerField::Name), 1);
        assert_eq!(registry.len(ServerField::Icon), 0);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_unique_across_registries() {
        let a = ListenerRegistry::new();
        let b = ListenerRegistry::new();
        let id_a = a.add(ServerField::Name, |_| Ok(()));
        let id_b = b.add(ServerField::Name, |_| Ok(()));
        assert_ne!(id_a, id_b);
        // Removing through the wrong registry does nothing.
        assert!(!b.remove(id_a));
        assert_eq!(a.len(ServerField::Name), 1);
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let registry = ListenerRegistry::new();
        let first = registry.add(ServerField::Name, |_| Ok(()));
        registry.add(ServerField::Name, |_| Err("second".into()));

        let snapshot = registry.snapshot(ServerField::Name);
        assert_eq!(snapshot.len(), 2);

        registry.remove(first);
        // The earlier snapshot is unaffected by later removal.
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.snapshot(ServerField::Name).len(), 1);
    }

    #[test]
    fn test_add_all_skips_silent_fields() {
        let registry = ListenerRegistry::new();
        let ids = registry.add_all(|_| Ok(()));
        assert_eq!(ids.len(), ServerField::COUNT - 1);
        assert_eq!(registry.len(ServerField::ApplicationId), 0);
        assert_eq!(registry.len(ServerField::Owner), 1);
    }
}
