//! Reconnect session bookkeeping
//!
//! When an authenticated connection drops, its display name and room are
//! snapshotted here. A reconnect that logs in with the same name inside
//! the grace window gets its room membership restored automatically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::RoomName;

/// A saved session awaiting reconnect
#[derive(Debug)]
struct SavedSession {
    /// Room the connection was in when it dropped, if any
    room: Option<RoomName>,
    /// When the disconnect happened
    saved_at: Instant,
}

/// Session manager with a bounded reconnect grace window
///
/// Keyed by display name. Entries are consumed on successful restore and
/// pruned lazily when touched after expiry.
#[derive(Debug)]
pub struct SessionManager {
    sessions: HashMap<String, SavedSession>,
    grace_window: Duration,
}

impl SessionManager {
    /// Create a session manager with the given grace window
    pub fn new(grace_window: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            grace_window,
        }
    }

    /// Snapshot a disconnecting identity. Overwrites any previous
    /// snapshot for the same name.
    pub fn save(&mut self, username: &str, room: Option<RoomName>) {
        self.sessions.insert(
            username.to_string(),
            SavedSession {
                room,
                saved_at: Instant::now(),
            },
        );
    }

    /// Attempt to restore the session for a reconnecting identity.
    ///
    /// Consumes the snapshot. Returns the saved room if the snapshot
    /// exists, is inside the grace window, and had a room; None otherwise
    /// (expiry is silent).
    pub fn try_restore(&mut self, username: &str) -> Option<RoomName> {
        let session = self.sessions.remove(username)?;
        if session.saved_at.elapsed() >= self.grace_window {
            return None;
        }
        session.room
    }

    /// Drop all snapshots past the grace window
    pub fn prune_expired(&mut self) {
        let window = self.grace_window;
        self.sessions.retain(|_, s| s.saved_at.elapsed() < window);
    }

    /// Number of snapshots currently held (including not-yet-pruned
    /// expired ones)
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> RoomName {
        RoomName::parse(name).unwrap()
    }

    #[test]
    fn test_restore_within_window() {
        let mut mgr = SessionManager::new(Duration::from_secs(30));
        mgr.save("alice", Some(room("General")));

        assert_eq!(mgr.try_restore("alice"), Some(room("General")));
    }

    #[test]
    fn test_restore_consumes_snapshot() {
        let mut mgr = SessionManager::new(Duration::from_secs(30));
        mgr.save("alice", Some(room("General")));

        assert!(mgr.try_restore("alice").is_some());
        assert!(mgr.try_restore("alice").is_none());
    }

    #[test]
    fn test_restore_expired_is_none() {
        // Zero window: every snapshot is expired on arrival
        let mut mgr = SessionManager::new(Duration::ZERO);
        mgr.save("alice", Some(room("General")));

        assert!(mgr.try_restore("alice").is_none());
        // Expired snapshot was still consumed
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_restore_unknown_name() {
        let mut mgr = SessionManager::new(Duration::from_secs(30));
        assert!(mgr.try_restore("nobody").is_none());
    }

    #[test]
    fn test_roomless_session_restores_none() {
        let mut mgr = SessionManager::new(Duration::from_secs(30));
        mgr.save("alice", None);

        assert!(mgr.try_restore("alice").is_none());
    }

    #[test]
    fn test_save_overwrites() {
        let mut mgr = SessionManager::new(Duration::from_secs(30));
        mgr.save("alice", Some(room("General")));
        mgr.save("alice", Some(room("Random")));

        assert_eq!(mgr.try_restore("alice"), Some(room("Random")));
    }

    #[test]
    fn test_prune_expired() {
        let mut mgr = SessionManager::new(Duration::ZERO);
        mgr.save("alice", Some(room("General")));
        mgr.save("bob", None);
        assert_eq!(mgr.len(), 2);

        mgr.prune_expired();
        assert!(mgr.is_empty());
    }
}
