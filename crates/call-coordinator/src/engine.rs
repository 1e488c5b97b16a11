//! The capability set the negotiation coordinator consumes from a media/ICE
//! engine. The coordinator orchestrates *when* these operations fire and what
//! gets relayed; it never looks inside descriptions or candidates.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An opaque session description produced or consumed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A discovered network path advertised by one side.
#[derive(Debug, Clone, PartialEq)]
pub struct IceCandidate {
    pub candidate: String,
    pub mid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from the engine. Delivered through the channel
/// handed out at engine creation so the coordinator can serialize them with
/// the other event sources for the same session.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A local candidate to advertise to the remote peer.
    LocalCandidate(IceCandidate),
    ConnectivityChanged(Connectivity),
    GatheringComplete,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;
    /// Release the underlying connection. Must be safe to call more than once.
    async fn close(&self);
}

/// Mints one engine per peer session, together with that engine's event
/// stream.
#[async_trait]
pub trait MediaEngineFactory: Send + Sync {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::UnboundedReceiver<EngineEvent>), EngineError>;
}
