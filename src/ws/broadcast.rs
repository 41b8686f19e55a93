//! Per-path broadcast registry for live WebSocket sessions.
//!
//! Subscribers are keyed by their `Sec-WebSocket-Key`, matching the spec's
//! "broadcast subscriber ID" term. Entries are held as weak references so a
//! closed connection never needs to explicitly unregister; expired entries
//! are purged lazily whenever the registry is touched.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

/// Registry of live WebSocket sessions, grouped by resource path.
///
/// `T` is whatever the connection layer uses to reach a session's write
/// half (e.g. a channel sender); this module only manages identity and
/// liveness, not the write itself.
pub(crate) struct Broadcast<T> {
    paths: Mutex<HashMap<String, HashMap<Vec<u8>, Weak<T>>>>,
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self {
        Self {
            paths: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Broadcast<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber under `path`, replacing any previous entry
    /// with the same `id`. Purges expired entries for `path` first.
    pub(crate) fn register(&self, path: &str, id: Vec<u8>, conn: &Arc<T>) {
        let mut paths = self.paths.lock().unwrap();
        let subscribers = paths.entry(path.to_owned()).or_default();
        subscribers.retain(|_, weak| weak.strong_count() > 0);
        subscribers.insert(id, Arc::downgrade(conn));
    }

    /// Removes a subscriber explicitly (e.g. on a clean close).
    pub(crate) fn unregister(&self, path: &str, id: &[u8]) {
        let mut paths = self.paths.lock().unwrap();
        if let Some(subscribers) = paths.get_mut(path) {
            subscribers.remove(id);
        }
    }

    /// Returns the live subscribers for `path`, purging expired ones.
    /// When `only` is non-empty, the result is filtered to those IDs.
    pub(crate) fn subscribers(&self, path: &str, only: Option<&[Vec<u8>]>) -> Vec<Arc<T>> {
        let mut paths = self.paths.lock().unwrap();
        let Some(subscribers) = paths.get_mut(path) else {
            return Vec::new();
        };

        subscribers.retain(|_, weak| weak.strong_count() > 0);

        subscribers
            .iter()
            .filter(|(id, _)| match only {
                Some(ids) => ids.iter().any(|wanted| wanted == *id),
                None => true,
            })
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }
}
