//! Listener registrations for one event channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

/// Subscribing under this name delivers every event on the channel.
pub const ALL_EVENTS: &str = "ALL_EVENTS_ENABLED";

/// One decoded inbound frame from the event connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEvent {
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(rename = "dataType", default)]
    pub data_type: Option<String>,
}

/// A callback invoked synchronously from the channel's receive loop. The
/// same `Arc` registered under several names forms a single registration;
/// distinct `Arc`s are distinct listeners even when they wrap the same
/// closure.
pub type EventCallback = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Callback identity: the address of the `Arc`'s referent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CallbackId(usize);

impl CallbackId {
    fn of(callback: &EventCallback) -> Self {
        Self(Arc::as_ptr(callback) as *const () as usize)
    }
}

struct Registration {
    callback: EventCallback,
    names: HashSet<String>,
}

/// Registered listeners for one channel: identity -> subscribed event names.
#[derive(Default)]
pub(crate) struct ListenerTable {
    entries: HashMap<CallbackId, Registration>,
}

impl ListenerTable {
    /// Union-add `name` into the callback's subscribed set, creating the
    /// registration if absent. Idempotent.
    pub fn add(&mut self, callback: &EventCallback, name: &str) {
        let entry = self
            .entries
            .entry(CallbackId::of(callback))
            .or_insert_with(|| Registration {
                callback: Arc::clone(callback),
                names: HashSet::new(),
            });
        entry.names.insert(name.to_string());
    }

    /// Remove `name` from the callback's subscribed set; the registration is
    /// dropped once its set empties. Unknown callbacks and names are a no-op.
    pub fn remove(&mut self, callback: &EventCallback, name: &str) {
        let id = CallbackId::of(callback);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.names.remove(name);
            if entry.names.is_empty() {
                self.entries.remove(&id);
            }
        }
    }

    /// Snapshot the callbacks subscribed to `event_name` (directly or via the
    /// wildcard) so they can be invoked without holding the table lock.
    pub fn matching(&self, event_name: &str) -> Vec<EventCallback> {
        self.entries
            .values()
            .filter(|entry| entry.names.contains(event_name) || entry.names.contains(ALL_EVENTS))
            .map(|entry| Arc::clone(&entry.callback))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
