use thiserror::Error;

use crate::session_id::SessionId;

/// Malformed session id typed or pasted by the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("session id is empty")]
    Empty,
    #[error("session id is malformed: {0}")]
    Malformed(String),
}

/// Failures of the shared signaling store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    #[error("signaling store unreachable: {0}")]
    Transport(String),
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("{field} already set for session {id}")]
    AlreadySet { id: SessionId, field: &'static str },
    #[error("signaling requires an authenticated session")]
    Unauthenticated,
}

/// Failures reported by the peer-connection engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("invalid peer connection state: {0}")]
    InvalidState(String),
    #[error("peer connection engine error: {0}")]
    Engine(String),
    #[error("peer connection is closed")]
    Closed,
}

impl From<webrtc::Error> for PeerError {
    fn from(err: webrtc::Error) -> Self {
        PeerError::Engine(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("no media requested")]
    NothingRequested,
    #[error("media device unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("session already signed out")]
    SignedOut,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ice server {0}: url cannot be empty")]
    EmptyUrl(String),
    #[error("ice server {id}: unknown type {kind:?}")]
    UnknownServerType { id: String, kind: String },
    #[error("ice server {0}: turn servers require username and credential")]
    MissingTurnCredentials(String),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced by the call session coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error(transparent)]
    Format(#[from] SessionIdError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("session {0} has no offer yet")]
    SessionNotReady(SessionId),
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: crate::state::ConnectionState,
    },
    #[error("peer link failed")]
    LinkFailed,
}

impl CallError {
    /// Whether the user can fix this by re-entering input, waiting, or
    /// retrying the flow, as opposed to an internal sequencing fault.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallError::Format(_) | CallError::SessionNotReady(_) | CallError::LinkFailed => true,
            CallError::Signaling(err) => !matches!(err, SignalingError::AlreadySet { .. }),
            CallError::Media(_) => true,
            CallError::Peer(_) | CallError::InvalidTransition { .. } => false,
        }
    }
}
