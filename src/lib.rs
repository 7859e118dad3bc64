//! Peer-to-peer call setup over a shared signaling store.
//!
//! A caller publishes an offer under a fresh [`SessionId`], the callee looks
//! it up and answers, and both sides trickle ICE candidates through the store
//! until the media link comes up. [`CallSessionCoordinator`] drives one such
//! attempt; [`CallController`] wraps it for a UI.

pub mod auth;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod session_id;
pub mod signaling;
pub mod state;
pub mod utils;

pub use commands::{CallCommand, CallController, CommandOutcome};
pub use config::CallConfig;
pub use coordinator::{CallContext, CallEvent, CallSessionCoordinator};
pub use error::{CallError, PeerError, SignalingError};
pub use session_id::SessionId;
pub use state::ConnectionState;
