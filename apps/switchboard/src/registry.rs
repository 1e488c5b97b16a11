//! Identifier → live transport table.
//!
//! Identifiers are opaque strings chosen by clients. The invariant held here
//! is that at most one transport is bound per identifier at any time; a later
//! registration under the same identifier evicts the earlier one, and the
//! evicted connection is asked to close.

use dashmap::DashMap;
use signaling_proto::Envelope;
use tokio::sync::mpsc;
use uuid::Uuid;

/// What a connection task receives over its outbound queue.
#[derive(Debug)]
pub enum Outbound {
    Envelope(Envelope),
    /// Registration was evicted; close the socket.
    Close,
}

#[derive(Clone)]
pub struct RegisteredClient {
    pub peer_id: String,
    /// Distinguishes this connection from a later one under the same
    /// identifier, so a stale close cannot unregister its successor.
    pub conn_token: Uuid,
    pub tx: mpsc::UnboundedSender<Outbound>,
}

impl RegisteredClient {
    pub fn new(peer_id: impl Into<String>, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            peer_id: peer_id.into(),
            conn_token: Uuid::new_v4(),
            tx,
        }
    }

    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.tx.send(Outbound::Envelope(envelope)).is_ok()
    }
}

pub struct ClientRegistry {
    clients: DashMap<String, RegisteredClient>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Bind a transport under its identifier. Returns the evicted previous
    /// binding, if any; the caller is responsible for closing it.
    pub fn register(&self, client: RegisteredClient) -> Option<RegisteredClient> {
        self.clients.insert(client.peer_id.clone(), client)
    }

    pub fn lookup(&self, peer_id: &str) -> Option<RegisteredClient> {
        self.clients.get(peer_id).map(|entry| entry.value().clone())
    }

    /// Remove the binding only if it still belongs to this connection.
    pub fn unregister(&self, peer_id: &str, conn_token: Uuid) -> bool {
        self.clients
            .remove_if(peer_id, |_, client| client.conn_token == conn_token)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> (RegisteredClient, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RegisteredClient::new(id, tx), rx)
    }

    #[test]
    fn at_most_one_binding_per_identifier() {
        let registry = ClientRegistry::new();
        let (first, _rx1) = client("alice");
        let (second, _rx2) = client("alice");
        let first_token = first.conn_token;

        assert!(registry.register(first).is_none());
        let evicted = registry.register(second.clone()).expect("eviction");
        assert_eq!(evicted.conn_token, first_token);

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup("alice").unwrap().conn_token,
            second.conn_token
        );
    }

    #[test]
    fn stale_unregister_is_ignored() {
        let registry = ClientRegistry::new();
        let (first, _rx1) = client("alice");
        let (second, _rx2) = client("alice");
        let first_token = first.conn_token;

        registry.register(first);
        registry.register(second.clone());

        // The evicted connection closing late must not unbind the new one.
        assert!(!registry.unregister("alice", first_token));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("alice", second.conn_token));
        assert!(registry.is_empty());
    }
}
