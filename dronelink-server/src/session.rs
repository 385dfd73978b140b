//! Session registry.
//!
//! Tracks which identities hold an open connection. At most one session per
//! identity exists at any time; every operation runs under a single lock so
//! racing handshakes for the same identity cannot both succeed.

use crate::auth::Credential;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Returned when an identity already holds a live session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("drone already connected: {identity}")]
pub struct SessionConflict {
    pub identity: String,
}

/// The registry's view of a connection.
///
/// The registry never owns the socket; the connection task does.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub remote_addr: SocketAddr,
}

impl ConnectionHandle {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
        }
    }
}

/// A live binding of one identity to one connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: String,
    pub connection: ConnectionHandle,
    pub credential: Credential,
}

#[derive(Default)]
struct Inner {
    by_identity: HashMap<String, Session>,
    by_connection: HashMap<Uuid, String>,
}

/// Identity -> session map shared by all connection tasks.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for `identity` bound to `connection`.
    ///
    /// Fails with [`SessionConflict`] and changes nothing if the identity is
    /// already registered. The returned guard releases the identity when
    /// dropped.
    pub fn register(
        self: &Arc<Self>,
        identity: &str,
        connection: ConnectionHandle,
        credential: Credential,
    ) -> Result<SessionGuard, SessionConflict> {
        let mut inner = self.inner.lock();
        if inner.by_identity.contains_key(identity) {
            return Err(SessionConflict {
                identity: identity.to_string(),
            });
        }

        let session = Session {
            identity: identity.to_string(),
            connection,
            credential,
        };
        inner
            .by_connection
            .insert(session.connection.id, identity.to_string());
        inner
            .by_identity
            .insert(identity.to_string(), session.clone());

        Ok(SessionGuard {
            registry: Arc::clone(self),
            session,
            released: false,
        })
    }

    /// Removes the session for `identity`, if any. Idempotent.
    pub fn release(&self, identity: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_identity.remove(identity) {
            Some(session) => {
                inner.by_connection.remove(&session.connection.id);
                true
            }
            None => false,
        }
    }

    /// Removes the session for `identity` only if it is still bound to `connection_id`.
    fn release_owned(&self, identity: &str, connection_id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        let owned = inner
            .by_identity
            .get(identity)
            .is_some_and(|s| s.connection.id == connection_id);
        if owned {
            inner.by_identity.remove(identity);
            inner.by_connection.remove(&connection_id);
        }
        owned
    }

    /// Finds the session bound to a connection.
    pub fn lookup(&self, connection_id: Uuid) -> Option<Session> {
        let inner = self.inner.lock();
        inner
            .by_connection
            .get(&connection_id)
            .and_then(|identity| inner.by_identity.get(identity))
            .cloned()
    }

    /// Returns the session for an identity.
    pub fn get(&self, identity: &str) -> Option<Session> {
        self.inner.lock().by_identity.get(identity).cloned()
    }

    /// Returns the connected identities, sorted.
    pub fn connected_identities(&self) -> Vec<String> {
        let mut identities: Vec<_> = self.inner.lock().by_identity.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Returns the number of live sessions.
    pub fn count(&self) -> usize {
        self.inner.lock().by_identity.len()
    }
}

/// Owns a registered identity on behalf of its connection.
///
/// Dropping the guard releases the identity, so every exit path of the
/// connection task (close, error, cancellation, panic) frees the slot.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session: Session,
    released: bool,
}

impl SessionGuard {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn identity(&self) -> &str {
        &self.session.identity
    }

    /// Releases the identity now. Later calls and the drop are no-ops.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let removed = self
            .registry
            .release_owned(&self.session.identity, self.session.connection.id);
        if removed {
            tracing::debug!("[{}] session released", self.session.identity);
        }
        removed
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("identity", &self.session.identity)
            .field("connection", &self.session.connection.id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenIssuer;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
    }

    fn credential(identity: &str) -> Credential {
        TokenIssuer::new("secret", Duration::from_secs(1800))
            .unwrap()
            .issue(identity)
    }

    fn connection() -> ConnectionHandle {
        ConnectionHandle::new(test_addr())
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Arc::new(SessionRegistry::new());
        let conn = connection();
        let conn_id = conn.id;

        let guard = registry
            .register("drone1", conn, credential("drone1"))
            .unwrap();
        assert_eq!(guard.identity(), "drone1");
        assert_eq!(registry.count(), 1);

        let session = registry.lookup(conn_id).unwrap();
        assert_eq!(session.identity, "drone1");
        assert_eq!(session.credential.subject, "drone1");
        assert!(registry.lookup(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_conflict_leaves_first_session_intact() {
        let registry = Arc::new(SessionRegistry::new());
        let first = connection();
        let first_id = first.id;
        let _guard = registry
            .register("drone1", first, credential("drone1"))
            .unwrap();

        let second = connection();
        let second_id = second.id;
        let err = registry
            .register("drone1", second, credential("drone1"))
            .unwrap_err();

        assert_eq!(err.identity, "drone1");
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("drone1").unwrap().connection.id, first_id);
        assert!(registry.lookup(second_id).is_none());
    }

    #[test]
    fn test_guard_drop_releases() {
        let registry = Arc::new(SessionRegistry::new());
        {
            let _guard = registry
                .register("drone1", connection(), credential("drone1"))
                .unwrap();
            assert_eq!(registry.count(), 1);
        }
        assert_eq!(registry.count(), 0);

        // Slot is free again
        assert!(registry
            .register("drone1", connection(), credential("drone1"))
            .is_ok());
    }

    #[test]
    fn test_release_runs_once() {
        let registry = Arc::new(SessionRegistry::new());
        let mut guard = registry
            .register("drone1", connection(), credential("drone1"))
            .unwrap();

        assert!(guard.release());
        assert!(!guard.release());
        drop(guard);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_stale_guard_does_not_release_successor() {
        let registry = Arc::new(SessionRegistry::new());
        let stale = registry
            .register("drone1", connection(), credential("drone1"))
            .unwrap();

        // Forced release, then a new connection takes the identity
        assert!(registry.release("drone1"));
        let successor = connection();
        let successor_id = successor.id;
        let _current = registry
            .register("drone1", successor, credential("drone1"))
            .unwrap();

        drop(stale);
        assert_eq!(registry.get("drone1").unwrap().connection.id, successor_id);
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = SessionRegistry::new();
        assert!(!registry.release("nobody"));
        assert!(!registry.release("nobody"));
    }

    #[test]
    fn test_connected_identities_sorted() {
        let registry = Arc::new(SessionRegistry::new());
        let _b = registry
            .register("drone-b", connection(), credential("drone-b"))
            .unwrap();
        let _a = registry
            .register("drone-a", connection(), credential("drone-a"))
            .unwrap();
        assert_eq!(registry.connected_identities(), vec!["drone-a", "drone-b"]);
    }

    #[test]
    fn test_concurrent_registration_single_winner() {
        let registry = Arc::new(SessionRegistry::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry
                        .register("drone1", connection(), credential("drone1"))
                        .ok()
                })
            })
            .collect();

        let guards: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(guards.len(), 1);
        assert_eq!(registry.count(), 1);
    }
}
