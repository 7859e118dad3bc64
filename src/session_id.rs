use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionIdError;

/// Token shared out-of-band so the callee can find the caller's session record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Random v4 uuid, 122 bits of entropy.
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    /// Checks raw user input before anything touches the network.
    ///
    /// Surrounding whitespace is ignored and the id is normalised to the
    /// lowercase hyphenated form, so a pasted `{...}` or uppercase id still
    /// resolves to the same record.
    pub fn validate(input: &str) -> Result<Self, SessionIdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SessionIdError::Empty);
        }
        let parsed =
            Uuid::parse_str(trimmed).map_err(|_| SessionIdError::Malformed(trimmed.to_string()))?;
        if parsed.is_nil() {
            return Err(SessionIdError::Malformed(trimmed.to_string()));
        }
        Ok(SessionId(parsed.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionId::validate(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
