//! Authentication collaborator. Signaling is only touched with an active
//! [`AuthSession`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::AuthError;
use crate::utils::random_token;

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Signed-in context. Clones share the active flag, so signing out is seen
/// by every holder.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: String,
    pub signed_in_at: DateTime<Utc>,
    token: String,
    active: Arc<AtomicBool>,
}

impl AuthSession {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            signed_in_at: Utc::now(),
            token: token.into(),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn revoke(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, AuthError>;

    async fn sign_out(&self, session: &AuthSession) -> Result<(), AuthError>;
}

/// Email/password accounts kept in memory as SHA-256 digests.
#[derive(Default)]
pub struct MemoryAuthenticator {
    accounts: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashMap<String, AuthSession>>,
}

fn password_digest(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, credentials: &Credentials) {
        let email = normalize_email(&credentials.email);
        let digest = password_digest(&email, &credentials.password);
        self.accounts.lock().insert(email, digest);
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, AuthError> {
        let email = normalize_email(&credentials.email);
        let expected = self
            .accounts
            .lock()
            .get(&email)
            .cloned()
            .ok_or_else(|| AuthError::UnknownUser(email.clone()))?;

        if password_digest(&email, &credentials.password) != expected {
            warn!(user = %email, "sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let session = AuthSession::new(email, random_token());
        self.sessions
            .lock()
            .insert(session.token().to_string(), session.clone());
        info!(user = %session.user, "signed in");
        Ok(session)
    }

    async fn sign_out(&self, session: &AuthSession) -> Result<(), AuthError> {
        self.sessions.lock().remove(session.token());
        if !session.revoke() {
            return Err(AuthError::SignedOut);
        }
        info!(user = %session.user, "signed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> MemoryAuthenticator {
        let auth = MemoryAuthenticator::new();
        auth.register(&Credentials::new("Ada@Example.org", "hunter2"));
        auth
    }

    #[tokio::test]
    async fn sign_in_and_out() {
        let auth = authenticator();
        let session = auth
            .sign_in(&Credentials::new("ada@example.org ", "hunter2"))
            .await
            .unwrap();
        assert!(session.is_active());
        assert_eq!(session.token().len(), 32);
        assert_eq!(auth.active_sessions(), 1);

        let held_elsewhere = session.clone();
        auth.sign_out(&session).await.unwrap();
        assert!(!held_elsewhere.is_active());
        assert_eq!(auth.active_sessions(), 0);
        assert_eq!(auth.sign_out(&session).await, Err(AuthError::SignedOut));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = authenticator();
        assert_eq!(
            auth.sign_in(&Credentials::new("ada@example.org", "hunter3"))
                .await
                .unwrap_err(),
            AuthError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let auth = authenticator();
        assert!(matches!(
            auth.sign_in(&Credentials::new("bob@example.org", "x")).await,
            Err(AuthError::UnknownUser(_))
        ));
    }

    #[test]
    fn debug_output_hides_password() {
        let creds = Credentials::new("ada@example.org", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
