//! Per-peer negotiation state.
//!
//! A [`PeerSession`] owns everything tied to one remote identifier: the
//! negotiation state, the remote-candidate buffer, and the media engine
//! connection. All mutation happens while the coordinator holds the session
//! lock, which is what makes the buffer-or-apply decision for an incoming
//! candidate atomic with respect to the flush.

use std::mem;
use std::sync::Arc;

use tracing::debug;

use crate::engine::{IceCandidate, MediaEngine, SessionDescription};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerPending,
    Connecting,
    Connected,
    Closed,
}

/// Why a session reached [`SessionState::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    RemoteBye,
    RemoteOffline,
    RemoteBusy,
    LocalHangup,
    EngineFailure,
    SignalingLost,
}

pub(crate) struct PeerSession {
    pub remote_id: String,
    pub state: SessionState,
    pub engine: Arc<dyn MediaEngine>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl PeerSession {
    pub fn new(remote_id: impl Into<String>, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            remote_id: remote_id.into(),
            state: SessionState::Idle,
            engine,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    /// Pre-load candidates that arrived before this session existed.
    pub fn seed_candidates(&mut self, candidates: Vec<IceCandidate>) {
        self.pending_candidates.extend(candidates);
    }

    pub async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        self.engine.set_remote_description(desc).await?;
        self.remote_description_set = true;
        Ok(())
    }

    /// Apply a remote candidate now if the remote description is in place,
    /// otherwise queue it for the flush.
    pub async fn accept_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), EngineError> {
        if self.remote_description_set {
            self.engine.add_remote_candidate(candidate).await
        } else {
            self.pending_candidates.push(candidate);
            debug!(
                peer = %self.remote_id,
                buffered = self.pending_candidates.len(),
                "buffered early candidate"
            );
            Ok(())
        }
    }

    /// Drain the candidate buffer into the engine. The drain happens before
    /// the first apply, so a failure part-way cannot re-apply earlier
    /// entries.
    pub async fn flush_candidates(&mut self) -> Result<(), EngineError> {
        let pending = mem::take(&mut self.pending_candidates);
        if pending.is_empty() {
            return Ok(());
        }
        debug!(
            peer = %self.remote_id,
            count = pending.len(),
            "flushing buffered candidates"
        );
        for candidate in pending {
            self.engine.add_remote_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Hand the buffered candidates over, e.g. when a glare rollback replaces
    /// the engine but the remote's candidates stay valid.
    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        mem::take(&mut self.pending_candidates)
    }
}
