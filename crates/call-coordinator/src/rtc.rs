//! Production media engine backed by webrtc-rs.
//!
//! Adapts an [`RTCPeerConnection`] to the [`MediaEngine`] capability set:
//! descriptions and candidates pass through untouched, and the connection's
//! callbacks are pumped into the engine event channel. Track and data-channel
//! wiring stays with the caller via [`RtcEngine::peer_connection`] — the
//! negotiation core never looks inside the media plane.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::engine::{
    Connectivity, EngineEvent, IceCandidate, MediaEngine, MediaEngineFactory, SdpKind,
    SessionDescription,
};
use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct RtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

pub struct RtcEngineFactory {
    config: RtcConfig,
}

impl RtcEngineFactory {
    pub fn new(config: RtcConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

#[async_trait]
impl MediaEngineFactory for RtcEngineFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        let api = APIBuilder::new().build();
        let ice_servers = if self.config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|err| EngineError::new(err.to_string()))?,
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(json) => {
                            let _ = tx.send(EngineEvent::LocalCandidate(IceCandidate {
                                candidate: json.candidate,
                                mid: json.sdp_mid,
                            }));
                        }
                        Err(err) => {
                            warn!(target: "webrtc", %err, "failed to serialize local candidate");
                        }
                    },
                    // A null candidate marks the end of gathering.
                    None => {
                        let _ = tx.send(EngineEvent::GatheringComplete);
                    }
                }
            })
        }));

        let tx = event_tx;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!(target: "webrtc", ?state, "peer connection state changed");
                let _ = tx.send(EngineEvent::ConnectivityChanged(map_connection_state(state)));
            })
        }));

        Ok((Arc::new(RtcEngine { pc }), event_rx))
    }
}

pub struct RtcEngine {
    pc: Arc<RTCPeerConnection>,
}

impl RtcEngine {
    /// The underlying connection, for attaching tracks or data channels.
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        self.pc.clone()
    }
}

#[async_trait]
impl MediaEngine for RtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| EngineError::new(err.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| EngineError::new(err.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|err| EngineError::new(err.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|err| EngineError::new(err.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.mid,
                sdp_mline_index: None,
                username_fragment: None,
            })
            .await
            .map_err(|err| EngineError::new(err.to_string()))
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            debug!(target: "webrtc", %err, "error closing peer connection");
        }
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let result = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    result.map_err(|err| EngineError::new(err.to_string()))
}

fn map_connection_state(state: RTCPeerConnectionState) -> Connectivity {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => Connectivity::New,
        RTCPeerConnectionState::Connecting => Connectivity::Connecting,
        RTCPeerConnectionState::Connected => Connectivity::Connected,
        RTCPeerConnectionState::Disconnected => Connectivity::Disconnected,
        RTCPeerConnectionState::Failed => Connectivity::Failed,
        RTCPeerConnectionState::Closed => Connectivity::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_produces_offer_sdp() {
        let factory = RtcEngineFactory::new(RtcConfig {
            ice_servers: Vec::new(),
        });
        let (engine, _events) = factory.create().await.unwrap();
        let offer = engine.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.starts_with("v=0"));
        engine.close().await;
    }
}
