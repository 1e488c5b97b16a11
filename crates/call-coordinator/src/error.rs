use thiserror::Error;

/// Failure reported by a media engine operation.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("a session with {0} is already in progress")]
    AlreadyNegotiating(String),
    #[error("media engine: {0}")]
    Engine(#[from] EngineError),
    #[error("signaling transport: {0}")]
    Signaling(String),
    #[error("signaling channel closed")]
    SignalingClosed,
    #[error("event stream already taken")]
    EventsTaken,
}
