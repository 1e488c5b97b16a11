//! The per-peer negotiation coordinator.
//!
//! One [`Coordinator`] serves one local participant. It owns a table of
//! [`PeerSession`]s keyed by remote identifier and funnels all three event
//! sources — local intent, inbound envelopes, media-engine callbacks —
//! through each session's lock, so transitions for one peer apply in arrival
//! order while unrelated peers progress independently.

use std::collections::HashMap;
use std::sync::Arc;

use signaling_proto::{Envelope, EnvelopeBody};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{
    Connectivity, EngineEvent, IceCandidate, MediaEngineFactory, SessionDescription,
};
use crate::error::NegotiationError;
use crate::relay_client::{RelayClient, RelayEvent};
use crate::session::{CloseReason, PeerSession, SessionState};

/// Notifications surfaced to the caller. Terminal failures always arrive
/// here; the coordinator never stalls silently.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    StateChanged { peer: String, state: SessionState },
    /// The remote peer announced itself as available.
    PeerReady { peer: String },
    NegotiationFailed { peer: String, reason: String },
    Closed { peer: String, reason: CloseReason },
}

type SessionHandle = Arc<AsyncMutex<PeerSession>>;

pub struct Coordinator {
    local_id: String,
    factory: Arc<dyn MediaEngineFactory>,
    sessions: AsyncMutex<HashMap<String, SessionHandle>>,
    /// Remote candidates that arrived before any session existed for their
    /// sender. Drained into the session buffer on creation.
    early_candidates: AsyncMutex<HashMap<String, Vec<IceCandidate>>>,
    outbound: mpsc::UnboundedSender<Envelope>,
    events_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<CoordinatorEvent>>>,
    pumps: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    relay: parking_lot::Mutex<Option<RelayClient>>,
}

impl Coordinator {
    /// Build a coordinator over an already-established envelope channel.
    /// Outbound envelopes carry the *destination* in their `id` field;
    /// envelopes fed to [`handle_envelope`](Self::handle_envelope) must carry
    /// the *source* (the relay's rewrite).
    pub fn new(
        local_id: impl Into<String>,
        factory: Arc<dyn MediaEngineFactory>,
        outbound: mpsc::UnboundedSender<Envelope>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            local_id: local_id.into(),
            factory,
            sessions: AsyncMutex::new(HashMap::new()),
            early_candidates: AsyncMutex::new(HashMap::new()),
            outbound,
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
            pumps: parking_lot::Mutex::new(Vec::new()),
            relay: parking_lot::Mutex::new(None),
        })
    }

    /// Connect to a relay and return a coordinator wired to it.
    pub async fn connect(
        relay_url: &str,
        local_id: impl Into<String>,
        factory: Arc<dyn MediaEngineFactory>,
    ) -> Result<Arc<Self>, NegotiationError> {
        let local_id = local_id.into();
        let relay = RelayClient::connect(relay_url, &local_id).await?;
        let events = relay.events().await?;
        let coordinator = Self::new(local_id, factory, relay.sender());
        *coordinator.relay.lock() = Some(relay);
        coordinator.attach_relay(events);
        Ok(coordinator)
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Take the caller-facing event stream. Can only be taken once.
    pub async fn events(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<CoordinatorEvent>, NegotiationError> {
        self.events_rx
            .lock()
            .await
            .take()
            .ok_or(NegotiationError::EventsTaken)
    }

    /// Pump relay events into the coordinator until the relay closes.
    pub fn attach_relay(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<RelayEvent>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                match event {
                    RelayEvent::Envelope(envelope) => coordinator.handle_envelope(envelope).await,
                    RelayEvent::Closed => {
                        coordinator.signaling_lost().await;
                        break;
                    }
                }
            }
        });
        self.pumps.lock().push(handle);
    }

    /// Start negotiating with `remote_id`: create an engine, produce and
    /// apply a local offer, and emit the offer envelope.
    pub async fn call(self: &Arc<Self>, remote_id: &str) -> Result<(), NegotiationError> {
        if self.sessions.lock().await.contains_key(remote_id) {
            return Err(NegotiationError::AlreadyNegotiating(remote_id.to_string()));
        }

        let (engine, events) = self.factory.create().await?;
        let handle = {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(remote_id) {
                // Lost a race with an inbound offer from the same peer.
                drop(sessions);
                engine.close().await;
                return Err(NegotiationError::AlreadyNegotiating(remote_id.to_string()));
            }
            let handle = Arc::new(AsyncMutex::new(PeerSession::new(remote_id, engine)));
            sessions.insert(remote_id.to_string(), handle.clone());
            handle
        };

        let mut session = handle.lock().await;
        if session.state != SessionState::Idle {
            return Err(NegotiationError::AlreadyNegotiating(remote_id.to_string()));
        }
        if let Some(early) = self.early_candidates.lock().await.remove(remote_id) {
            session.seed_candidates(early);
        }

        match self.drive_offer(&mut session).await {
            Ok(()) => {
                info!(peer = %remote_id, "offer sent");
                self.emit(CoordinatorEvent::StateChanged {
                    peer: remote_id.to_string(),
                    state: SessionState::OfferSent,
                });
                drop(session);
                self.spawn_engine_pump(remote_id.to_string(), events);
                Ok(())
            }
            Err(err) => {
                session.state = SessionState::Closed;
                session.engine.close().await;
                drop(session);
                self.sessions.lock().await.remove(remote_id);
                Err(err)
            }
        }
    }

    async fn drive_offer(&self, session: &mut PeerSession) -> Result<(), NegotiationError> {
        let offer = session.engine.create_offer().await?;
        session.engine.set_local_description(offer.clone()).await?;
        self.send_envelope(Envelope::offer(session.remote_id.clone(), offer.sdp))?;
        session.state = SessionState::OfferSent;
        Ok(())
    }

    /// Tell `remote_id` this participant is reachable. Purely informational;
    /// the remote side surfaces it as [`CoordinatorEvent::PeerReady`].
    pub fn announce_ready(&self, remote_id: &str) -> Result<(), NegotiationError> {
        self.send_envelope(Envelope::ready(remote_id))
    }

    /// Tear the session down from whatever state it is in. The engine is
    /// released before this returns; the `bye` to the remote side is
    /// best-effort and unacknowledged. A hangup for an unknown peer is a
    /// no-op.
    pub async fn hangup(&self, remote_id: &str) {
        let had_session = self.sessions.lock().await.contains_key(remote_id);
        if had_session {
            let _ = self.send_envelope(Envelope::bye(remote_id));
        }
        self.close_session(remote_id, CloseReason::LocalHangup).await;
    }

    /// Feed one inbound envelope (already rewritten by the relay, so `id` is
    /// the source identifier).
    pub async fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        let Envelope { id: from, body } = envelope;
        match body {
            EnvelopeBody::Offer { sdp } => self.handle_offer(from, sdp).await,
            EnvelopeBody::Answer { sdp } => self.handle_answer(from, sdp).await,
            EnvelopeBody::Candidate { candidate, mid } => {
                self.handle_candidate(from, IceCandidate { candidate, mid })
                    .await
            }
            EnvelopeBody::Bye => self.close_session(&from, CloseReason::RemoteBye).await,
            EnvelopeBody::UserOffline => {
                self.close_session(&from, CloseReason::RemoteOffline).await
            }
            EnvelopeBody::UserBusy => self.close_session(&from, CloseReason::RemoteBusy).await,
            EnvelopeBody::Ready => {
                debug!(peer = %from, "peer announced ready");
                self.emit(CoordinatorEvent::PeerReady { peer: from });
            }
        }
    }

    /// The relay connection is gone: every live session is treated as if the
    /// remote went offline.
    pub async fn signaling_lost(&self) {
        let peers: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        if !peers.is_empty() {
            warn!(
                sessions = peers.len(),
                "signaling transport lost; closing all sessions"
            );
        }
        for peer in peers {
            self.close_session(&peer, CloseReason::SignalingLost).await;
        }
        self.early_candidates.lock().await.clear();
    }

    async fn handle_offer(self: &Arc<Self>, from: String, sdp: String) {
        let existing = self.sessions.lock().await.get(&from).cloned();
        if let Some(handle) = existing {
            let mut session = handle.lock().await;
            match session.state {
                SessionState::OfferSent => {
                    // Glare: both sides offered at once. The smaller
                    // identifier keeps its offer; the larger one rolls back
                    // and answers.
                    if self.local_id.as_str() < from.as_str() {
                        warn!(peer = %from, "offer glare; keeping local offer");
                        return;
                    }
                    warn!(peer = %from, "offer glare; rolling back local offer");
                    let carried = session.take_pending_candidates();
                    session.state = SessionState::Closed;
                    session.engine.close().await;
                    drop(session);
                    self.sessions.lock().await.remove(&from);
                    if !carried.is_empty() {
                        self.early_candidates
                            .lock()
                            .await
                            .entry(from.clone())
                            .or_default()
                            .extend(carried);
                    }
                }
                state => {
                    warn!(peer = %from, ?state, "discarding offer: session already active");
                    return;
                }
            }
        }
        self.answer_offer(from, sdp).await;
    }

    /// Create a session for an inbound offer and drive it through the answer.
    async fn answer_offer(self: &Arc<Self>, from: String, sdp: String) {
        let (engine, events) = match self.factory.create().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(peer = %from, error = %err, "media engine creation failed");
                self.emit(CoordinatorEvent::NegotiationFailed {
                    peer: from,
                    reason: err.to_string(),
                });
                return;
            }
        };

        let handle = {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&from) {
                drop(sessions);
                warn!(peer = %from, "discarding offer: session already active");
                engine.close().await;
                return;
            }
            let handle = Arc::new(AsyncMutex::new(PeerSession::new(from.clone(), engine)));
            sessions.insert(from.clone(), handle.clone());
            handle
        };

        let mut session = handle.lock().await;
        if session.state != SessionState::Idle {
            // Closed by a concurrent bye before we got the lock.
            return;
        }
        if let Some(early) = self.early_candidates.lock().await.remove(&from) {
            session.seed_candidates(early);
        }

        if let Err(err) = self.drive_answer(&mut session, sdp).await {
            drop(session);
            self.fail_session(&from, err.to_string()).await;
        } else {
            drop(session);
            self.spawn_engine_pump(from, events);
        }
    }

    async fn drive_answer(
        &self,
        session: &mut PeerSession,
        offer_sdp: String,
    ) -> Result<(), NegotiationError> {
        let peer = session.remote_id.clone();
        session
            .apply_remote_description(SessionDescription::offer(offer_sdp))
            .await?;
        session.state = SessionState::OfferReceived;
        self.emit(CoordinatorEvent::StateChanged {
            peer: peer.clone(),
            state: SessionState::OfferReceived,
        });

        let answer = session.engine.create_answer().await?;
        session.state = SessionState::AnswerPending;
        self.emit(CoordinatorEvent::StateChanged {
            peer: peer.clone(),
            state: SessionState::AnswerPending,
        });

        session.engine.set_local_description(answer.clone()).await?;
        self.send_envelope(Envelope::answer(peer.clone(), answer.sdp))?;
        session.flush_candidates().await?;
        session.state = SessionState::Connecting;
        info!(peer = %peer, "answer sent");
        self.emit(CoordinatorEvent::StateChanged {
            peer,
            state: SessionState::Connecting,
        });
        Ok(())
    }

    async fn handle_answer(&self, from: String, sdp: String) {
        let handle = self.sessions.lock().await.get(&from).cloned();
        let Some(handle) = handle else {
            warn!(peer = %from, "discarding answer: no outstanding offer");
            return;
        };
        let mut session = handle.lock().await;
        if session.state != SessionState::OfferSent {
            warn!(
                peer = %from,
                state = ?session.state,
                "discarding answer: no outstanding offer"
            );
            return;
        }

        if let Err(err) = session
            .apply_remote_description(SessionDescription::answer(sdp))
            .await
        {
            drop(session);
            self.fail_session(&from, err.to_string()).await;
            return;
        }
        if let Err(err) = session.flush_candidates().await {
            drop(session);
            self.fail_session(&from, err.to_string()).await;
            return;
        }
        session.state = SessionState::Connecting;
        self.emit(CoordinatorEvent::StateChanged {
            peer: from,
            state: SessionState::Connecting,
        });
    }

    async fn handle_candidate(&self, from: String, candidate: IceCandidate) {
        let handle = self.sessions.lock().await.get(&from).cloned();
        match handle {
            Some(handle) => {
                let mut session = handle.lock().await;
                if session.state == SessionState::Closed {
                    debug!(peer = %from, "dropping candidate for closed session");
                    return;
                }
                if let Err(err) = session.accept_remote_candidate(candidate).await {
                    drop(session);
                    self.fail_session(&from, err.to_string()).await;
                }
            }
            None => {
                let mut early = self.early_candidates.lock().await;
                let queue = early.entry(from.clone()).or_default();
                queue.push(candidate);
                debug!(
                    peer = %from,
                    buffered = queue.len(),
                    "buffered candidate ahead of its offer"
                );
            }
        }
    }

    async fn handle_engine_event(&self, peer: &str, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                if !self.sessions.lock().await.contains_key(peer) {
                    return;
                }
                let _ = self.send_envelope(Envelope::candidate(
                    peer,
                    candidate.candidate,
                    candidate.mid,
                ));
            }
            EngineEvent::ConnectivityChanged(Connectivity::Connected) => {
                let handle = self.sessions.lock().await.get(peer).cloned();
                let Some(handle) = handle else { return };
                let mut session = handle.lock().await;
                if session.state == SessionState::Connecting {
                    session.state = SessionState::Connected;
                    info!(peer = %peer, "connected");
                    self.emit(CoordinatorEvent::StateChanged {
                        peer: peer.to_string(),
                        state: SessionState::Connected,
                    });
                } else {
                    debug!(
                        peer = %peer,
                        state = ?session.state,
                        "ignoring connectivity report outside connecting"
                    );
                }
            }
            EngineEvent::ConnectivityChanged(Connectivity::Failed) => {
                self.fail_session(peer, "transport failed".to_string()).await;
            }
            EngineEvent::ConnectivityChanged(state) => {
                debug!(peer = %peer, ?state, "connectivity state");
            }
            EngineEvent::GatheringComplete => {
                debug!(peer = %peer, "candidate gathering complete");
            }
        }
    }

    /// Report a negotiation failure and close the session; partial
    /// negotiation state cannot be resumed.
    async fn fail_session(&self, peer: &str, reason: String) {
        warn!(peer = %peer, %reason, "negotiation failed");
        self.emit(CoordinatorEvent::NegotiationFailed {
            peer: peer.to_string(),
            reason,
        });
        self.close_session(peer, CloseReason::EngineFailure).await;
    }

    async fn close_session(&self, peer: &str, reason: CloseReason) {
        self.early_candidates.lock().await.remove(peer);
        let removed = self.sessions.lock().await.remove(peer);
        let Some(handle) = removed else {
            debug!(peer = %peer, ?reason, "close for unknown session is a no-op");
            return;
        };
        let mut session = handle.lock().await;
        if session.state == SessionState::Closed {
            return;
        }
        session.state = SessionState::Closed;
        session.engine.close().await;
        info!(peer = %peer, ?reason, "session closed");
        self.emit(CoordinatorEvent::Closed {
            peer: peer.to_string(),
            reason,
        });
    }

    fn spawn_engine_pump(
        self: &Arc<Self>,
        peer: String,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.handle_engine_event(&peer, event).await;
            }
        });
        self.pumps.lock().push(handle);
    }

    fn send_envelope(&self, envelope: Envelope) -> Result<(), NegotiationError> {
        self.outbound
            .send(envelope)
            .map_err(|_| NegotiationError::SignalingClosed)
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        for handle in self.pumps.lock().drain(..) {
            handle.abort();
        }
    }
}
