//! Envelope forwarding.
//!
//! The router reads the destination from an envelope's `id` field, rewrites
//! that field to the sender's registered identity, and delivers the envelope
//! otherwise untouched. Absence of a destination is not an error in this
//! protocol — peers may disconnect during a negotiation's round trip — so a
//! miss is dropped with a diagnostic and nothing goes back to the sender
//! unless presence replies are enabled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use signaling_proto::{Envelope, EnvelopeBody};
use tracing::{debug, info};

use crate::registry::{ClientRegistry, RegisteredClient};

pub struct Router {
    registry: Arc<ClientRegistry>,
    /// Pairs currently negotiating, recorded in both directions. Used to
    /// notify a counterpart when its peer's transport drops, and for the
    /// optional busy replies.
    engagements: Mutex<HashMap<String, String>>,
    presence_replies: bool,
}

impl Router {
    pub fn new(registry: Arc<ClientRegistry>, presence_replies: bool) -> Self {
        Self {
            registry,
            engagements: Mutex::new(HashMap::new()),
            presence_replies,
        }
    }

    /// Forward one envelope from a registered sender.
    pub fn route(&self, sender: &RegisteredClient, envelope: Envelope) {
        let dest_id = envelope.id.clone();
        if dest_id.is_empty() {
            debug!(from = %sender.peer_id, "dropping envelope without destination");
            return;
        }

        let Some(dest) = self.registry.lookup(&dest_id) else {
            debug!(
                from = %sender.peer_id,
                to = %dest_id,
                kind = envelope.kind(),
                "dropping envelope for unknown destination"
            );
            if self.presence_replies {
                let _ = sender.deliver(Envelope::user_offline(dest_id));
            }
            return;
        };

        if self.presence_replies
            && matches!(envelope.body, EnvelopeBody::Offer { .. })
            && self.engaged_elsewhere(&sender.peer_id, &dest_id)
        {
            debug!(
                from = %sender.peer_id,
                to = %dest_id,
                "rejecting offer: destination busy"
            );
            let _ = sender.deliver(Envelope::user_busy(dest_id));
            return;
        }

        match envelope.body {
            EnvelopeBody::Offer { .. } | EnvelopeBody::Answer { .. } => {
                self.engage(&sender.peer_id, &dest_id);
            }
            EnvelopeBody::Bye => {
                self.disengage(&sender.peer_id, &dest_id);
            }
            _ => {}
        }

        let mut envelope = envelope;
        envelope.id = sender.peer_id.clone();
        debug!(
            from = %envelope.id,
            to = %dest_id,
            kind = envelope.kind(),
            "forwarding envelope"
        );
        if !dest.deliver(envelope) {
            // The destination's connection task is racing a disconnect.
            debug!(to = %dest_id, "destination queue closed; dropping envelope");
        }
    }

    /// The transport for `peer_id` closed: clear its engagement and tell the
    /// counterpart the user went offline.
    pub fn disconnected(&self, peer_id: &str) {
        let partner = {
            let mut engagements = self.engagements.lock().unwrap();
            let partner = engagements.remove(peer_id);
            if let Some(ref partner) = partner {
                if engagements.get(partner).map(String::as_str) == Some(peer_id) {
                    engagements.remove(partner);
                }
            }
            partner
        };
        if let Some(partner) = partner {
            if let Some(client) = self.registry.lookup(&partner) {
                info!(peer = %peer_id, notify = %partner, "peer disconnected mid-negotiation");
                let _ = client.deliver(Envelope::user_offline(peer_id));
            }
        }
    }

    fn engaged_elsewhere(&self, a: &str, b: &str) -> bool {
        let engagements = self.engagements.lock().unwrap();
        let busy = |id: &str, expected: &str| {
            engagements
                .get(id)
                .map(|partner| partner != expected)
                .unwrap_or(false)
        };
        busy(a, b) || busy(b, a)
    }

    fn engage(&self, a: &str, b: &str) {
        let mut engagements = self.engagements.lock().unwrap();
        engagements.insert(a.to_string(), b.to_string());
        engagements.insert(b.to_string(), a.to_string());
    }

    fn disengage(&self, a: &str, b: &str) {
        let mut engagements = self.engagements.lock().unwrap();
        if engagements.get(a).map(String::as_str) == Some(b) {
            engagements.remove(a);
        }
        if engagements.get(b).map(String::as_str) == Some(a) {
            engagements.remove(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use tokio::sync::mpsc;

    struct Harness {
        registry: Arc<ClientRegistry>,
        router: Router,
    }

    impl Harness {
        fn new(presence_replies: bool) -> Self {
            let registry = Arc::new(ClientRegistry::new());
            let router = Router::new(registry.clone(), presence_replies);
            Self { registry, router }
        }

        fn join(&self, id: &str) -> (RegisteredClient, mpsc::UnboundedReceiver<Outbound>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let client = RegisteredClient::new(id, tx);
            self.registry.register(client.clone());
            (client, rx)
        }
    }

    fn expect_envelope(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Envelope {
        match rx.try_recv().expect("expected a delivery") {
            Outbound::Envelope(envelope) => envelope,
            Outbound::Close => panic!("expected an envelope, got close"),
        }
    }

    #[test]
    fn forwards_with_sender_rewrite() {
        let harness = Harness::new(false);
        let (alice, _alice_rx) = harness.join("alice");
        let (_bob, mut bob_rx) = harness.join("bob");

        harness.router.route(&alice, Envelope::offer("bob", "O1"));

        let delivered = expect_envelope(&mut bob_rx);
        assert_eq!(delivered.id, "alice");
        assert_eq!(
            delivered.body,
            EnvelopeBody::Offer {
                sdp: "O1".to_string()
            }
        );
    }

    #[test]
    fn miss_is_dropped_silently_by_default() {
        let harness = Harness::new(false);
        let (alice, mut alice_rx) = harness.join("alice");

        harness.router.route(&alice, Envelope::offer("carol", "O1"));

        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn miss_replies_useroffline_when_enabled() {
        let harness = Harness::new(true);
        let (alice, mut alice_rx) = harness.join("alice");

        harness.router.route(&alice, Envelope::offer("carol", "O1"));

        let reply = expect_envelope(&mut alice_rx);
        assert_eq!(reply.id, "carol");
        assert_eq!(reply.body, EnvelopeBody::UserOffline);
    }

    #[test]
    fn offer_to_engaged_peer_replies_userbusy_when_enabled() {
        let harness = Harness::new(true);
        let (alice, _alice_rx) = harness.join("alice");
        let (bob, _bob_rx) = harness.join("bob");
        let (carol, mut carol_rx) = harness.join("carol");

        harness.router.route(&alice, Envelope::offer("bob", "O1"));
        harness.router.route(&bob, Envelope::answer("alice", "A1"));
        harness.router.route(&carol, Envelope::offer("alice", "O2"));

        let reply = expect_envelope(&mut carol_rx);
        assert_eq!(reply.id, "alice");
        assert_eq!(reply.body, EnvelopeBody::UserBusy);
    }

    #[test]
    fn renegotiation_between_engaged_pair_is_not_busy() {
        let harness = Harness::new(true);
        let (alice, _alice_rx) = harness.join("alice");
        let (bob, mut bob_rx) = harness.join("bob");

        harness.router.route(&alice, Envelope::offer("bob", "O1"));
        harness.router.route(&bob, Envelope::answer("alice", "A1"));
        let _ = expect_envelope(&mut bob_rx);
        harness.router.route(&alice, Envelope::offer("bob", "O2"));

        let delivered = expect_envelope(&mut bob_rx);
        assert!(matches!(delivered.body, EnvelopeBody::Offer { .. }));
    }

    #[test]
    fn disconnect_notifies_engaged_counterpart() {
        let harness = Harness::new(false);
        let (alice, mut alice_rx) = harness.join("alice");
        let (bob, _bob_rx) = harness.join("bob");

        harness.router.route(&alice, Envelope::offer("bob", "O1"));
        harness.router.route(&bob, Envelope::answer("alice", "A1"));
        let _ = expect_envelope(&mut alice_rx);

        harness.router.disconnected("bob");

        let notice = expect_envelope(&mut alice_rx);
        assert_eq!(notice.id, "bob");
        assert_eq!(notice.body, EnvelopeBody::UserOffline);
    }

    #[test]
    fn bye_clears_the_engagement() {
        let harness = Harness::new(false);
        let (alice, mut alice_rx) = harness.join("alice");
        let (bob, _bob_rx) = harness.join("bob");

        harness.router.route(&alice, Envelope::offer("bob", "O1"));
        harness.router.route(&bob, Envelope::answer("alice", "A1"));
        let _ = expect_envelope(&mut alice_rx);
        harness.router.route(&alice, Envelope::bye("bob"));

        harness.router.disconnected("bob");
        assert!(alice_rx.try_recv().is_err());
    }
}
