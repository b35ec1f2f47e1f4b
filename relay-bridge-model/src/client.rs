//! Client connections: the pairing of a local session with a remote peer.

use crate::session::Session;
use std::sync::Arc;

/// A pairing of one local [`Session`] with one remote peer's hex public key.
///
/// The Provider only borrows `ClientConnection`s; they are supplied and
/// owned by the caller, typically reloaded from persistent storage on
/// restart.
#[derive(Clone)]
pub struct ClientConnection {
    /// This peer's key material.
    pub session: Arc<Session>,
    /// Hex public key of the remote peer this session is paired with.
    pub client_id: String,
}

impl ClientConnection {
    /// Pair a session with a remote peer's hex public key.
    pub fn new(session: Arc<Session>, client_id: impl Into<String>) -> Self {
        Self {
            session,
            client_id: client_id.into(),
        }
    }

    /// This connection's local session id (hex public key), the value the
    /// relay's `client_id` query parameter is built from.
    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("session_id", &self.session_id())
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// De-duplicate session ids, preserving first-seen order.
///
/// Used when computing a Gateway subscription's `client_id` query
/// parameter: uniqueness by `session.session_id()` is not enforced on
/// `clients`, but the subscribed id list is de-duplicated.
pub fn dedup_session_ids(clients: &[ClientConnection]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::with_capacity(clients.len());
    for client in clients {
        let id = client.session_id().to_string();
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    ids
}

/// Set-equality comparison on two client lists by session id, used by
/// `update_clients` to decide whether a reconnect is actually necessary.
pub fn session_id_sets_equal(a: &[ClientConnection], b: &[ClientConnection]) -> bool {
    let a: std::collections::HashSet<&str> = a.iter().map(|c| c.session_id()).collect();
    let b: std::collections::HashSet<&str> = b.iter().map(|c| c.session_id()).collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[test]
    fn dedup_preserves_order_and_drops_repeats() {
        let s1 = Arc::new(Session::generate());
        let s2 = Arc::new(Session::generate());
        let clients = vec![
            ClientConnection::new(s1.clone(), "aa"),
            ClientConnection::new(s2, "bb"),
            ClientConnection::new(s1, "cc"),
        ];
        let ids = dedup_session_ids(&clients);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn set_equality_ignores_order_and_duplicates() {
        let s1 = Arc::new(Session::generate());
        let s2 = Arc::new(Session::generate());
        let a = vec![
            ClientConnection::new(s1.clone(), "x"),
            ClientConnection::new(s2.clone(), "y"),
        ];
        let b = vec![
            ClientConnection::new(s2, "y"),
            ClientConnection::new(s1, "x"),
        ];
        assert!(session_id_sets_equal(&a, &b));
    }
}
