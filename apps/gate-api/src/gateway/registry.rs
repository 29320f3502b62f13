//! Process-wide table of live connections keyed by ephemeral or final key.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::connection::ConnectionHandle;
use super::events::CLOSE_SUPERSEDED;

const COLLISION_REASON: &str = "Temporary ID collision. Old session terminated.";
const SUPERSEDED_REASON: &str = "New session initiated from another location.";

struct Entry {
    handle: ConnectionHandle,
    authenticated: bool,
    game_level: Option<String>,
}

#[derive(Default)]
struct Inner {
    by_key: HashMap<String, Entry>,
    /// Reverse index: connection id → the key it is currently registered under.
    key_by_connection: HashMap<String, String>,
}

impl Inner {
    /// Drop whatever key `connection_id` is currently registered under.
    fn detach(&mut self, connection_id: &str) {
        if let Some(key) = self.key_by_connection.remove(connection_id) {
            self.by_key.remove(&key);
        }
    }

    fn is_authenticated(&self, connection_id: &str) -> bool {
        self.key_by_connection
            .get(connection_id)
            .and_then(|key| self.by_key.get(key))
            .is_some_and(|entry| entry.authenticated)
    }

    /// Remove and close the holder of `key`, if any.
    fn evict(&mut self, key: &str, reason: &str) {
        if let Some(prior) = self.by_key.remove(key) {
            self.key_by_connection.remove(prior.handle.id());
            info!(%key, connection_id = %prior.handle.id(), "superseded connection evicted");
            prior.handle.terminate(CLOSE_SUPERSEDED, reason);
        }
    }

    fn insert(&mut self, key: String, entry: Entry) {
        self.key_by_connection.insert(entry.handle.id().to_string(), key.clone());
        self.by_key.insert(key, entry);
    }
}

/// Read-only view of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub connection_id: String,
    pub authenticated: bool,
    pub game_level: Option<String>,
}

/// Point-in-time copy of an authenticated entry.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub key: String,
    pub handle: ConnectionHandle,
    pub game_level: String,
}

/// Shared registry of live connections.
///
/// Every operation runs under a single mutex so a re-key is atomic across
/// both keys. Nothing inside the lock awaits: closing a connection only
/// queues a command on its channel.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under an ephemeral `key`.
    ///
    /// A different connection already holding `key` is notified and closed
    /// with 4001 first. The handle's previous key, if any, is dropped.
    /// Returns `false` without changes if the connection is already authenticated.
    pub fn register(&self, key: &str, handle: ConnectionHandle) -> bool {
        let mut inner = self.inner.lock();
        if inner.is_authenticated(handle.id()) {
            return false;
        }
        inner.detach(handle.id());
        inner.evict(key, COLLISION_REASON);
        debug!(%key, connection_id = %handle.id(), "connection registered");
        inner.insert(
            key.to_string(),
            Entry {
                handle,
                authenticated: false,
                game_level: None,
            },
        );
        true
    }

    /// Register a connection that authenticated with a session token directly
    /// under its final key.
    pub fn register_authenticated(&self, key: &str, handle: ConnectionHandle, game_level: &str) {
        let mut inner = self.inner.lock();
        inner.detach(handle.id());
        inner.evict(key, SUPERSEDED_REASON);
        debug!(%key, connection_id = %handle.id(), "authenticated connection registered");
        inner.insert(
            key.to_string(),
            Entry {
                handle,
                authenticated: true,
                game_level: Some(game_level.to_string()),
            },
        );
    }

    /// Move the unauthenticated entry at `old` to `new` and mark it authenticated.
    ///
    /// Returns `None` without touching anything if `old` has no entry or its
    /// entry is already authenticated. A connection already holding `new` is
    /// evicted before the move.
    pub fn re_key(&self, old: &str, new: &str, game_level: &str) -> Option<ConnectionHandle> {
        let mut inner = self.inner.lock();
        match inner.by_key.get(old) {
            Some(entry) if !entry.authenticated => {}
            _ => return None,
        }

        let mut entry = inner.by_key.remove(old)?;
        inner.key_by_connection.remove(entry.handle.id());
        inner.evict(new, SUPERSEDED_REASON);

        entry.authenticated = true;
        entry.game_level = Some(game_level.to_string());
        let handle = entry.handle.clone();
        inner.insert(new.to_string(), entry);

        info!(%old, %new, connection_id = %handle.id(), "connection re-keyed");
        Some(handle)
    }

    /// Remove whatever is registered under `key`. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_key.remove(key) {
            Some(entry) => {
                inner.key_by_connection.remove(entry.handle.id());
                true
            }
            None => false,
        }
    }

    /// Remove the mapping owned by `connection_id`, wherever it now lives.
    ///
    /// A key that has since been taken over by another connection is left alone.
    pub fn remove_by_handle(&self, connection_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(key) = inner.key_by_connection.remove(connection_id) else {
            return false;
        };
        inner.by_key.remove(&key);
        true
    }

    pub fn snapshot_authenticated(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.lock();
        inner
            .by_key
            .iter()
            .filter(|(_, entry)| entry.authenticated)
            .map(|(key, entry)| SessionSnapshot {
                key: key.clone(),
                handle: entry.handle.clone(),
                game_level: entry.game_level.clone().unwrap_or_default(),
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<SessionView> {
        let inner = self.inner.lock();
        inner.by_key.get(key).map(|entry| SessionView {
            connection_id: entry.handle.id().to_string(),
            authenticated: entry.authenticated,
            game_level: entry.game_level.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
