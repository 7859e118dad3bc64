//! Entry points the UI layer calls into.

mod call_api;

pub use call_api::CallController;

use serde::{Deserialize, Serialize};

use crate::media::MediaConstraints;
use crate::session_id::SessionId;

/// One user action.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum CallCommand {
    StartLocalMedia(MediaConstraints),
    CreateCall,
    /// Raw text from the id input box; validated before any lookup.
    JoinCall(String),
    Hangup,
    /// Starts a fresh attempt after the current one ended or failed.
    Restart,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum CommandOutcome {
    Done,
    SessionCreated(SessionId),
}
