//! Client-side WebRTC negotiation over an out-of-band relay.
//!
//! The [`Coordinator`] runs one negotiation state machine per remote peer:
//! it drives a [`MediaEngine`] through offer/answer exchange, buffers remote
//! candidates that arrive before a remote description exists, and reports
//! state transitions and failures to the caller. Signaling travels as
//! [`signaling_proto::Envelope`]s, in production through a [`RelayClient`]
//! WebSocket connection to the relay.

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod mock;
pub mod relay_client;
pub mod rtc;
mod session;

pub use coordinator::{Coordinator, CoordinatorEvent};
pub use engine::{
    Connectivity, EngineEvent, IceCandidate, MediaEngine, MediaEngineFactory, SdpKind,
    SessionDescription,
};
pub use error::{EngineError, NegotiationError};
pub use relay_client::{RelayClient, RelayEvent};
pub use rtc::{RtcConfig, RtcEngine, RtcEngineFactory};
pub use session::{CloseReason, SessionState};
