//! Signaling over a shared document store.
//!
//! A call is one record keyed by [`SessionId`] holding the write-once offer
//! and answer, plus two append-only candidate sub-collections. Listeners get
//! at-least-once delivery: the full record on every record change, and only
//! the newly appended candidates for a candidate sequence, in append order.

pub mod memory;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SignalingError;
use crate::session::{CallSession, CandidateSide, IceCandidate, SessionDescription};
use crate::session_id::SessionId;

pub use memory::MemorySignaling;

/// Invoked with the full record after every change.
pub type SessionCallback = Box<dyn Fn(CallSession) + Send + Sync>;

/// Invoked with the candidates appended since the previous delivery.
pub type CandidateCallback = Box<dyn Fn(Vec<IceCandidate>) + Send + Sync>;

/// Record/sub-collection primitives of the signaling store.
///
/// Listeners run on the store's own delivery context and must only hand the
/// payload off (e.g. push onto a channel); they must not call back into the
/// store. Writing `offer` or `answer` a second time is rejected with
/// [`SignalingError::AlreadySet`] and never overwrites the stored value.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Allocates an empty record.
    async fn create_session(&self) -> Result<SessionId, SignalingError>;

    async fn load_session(&self, id: &SessionId) -> Result<CallSession, SignalingError>;

    async fn set_offer(
        &self,
        id: &SessionId,
        offer: SessionDescription,
    ) -> Result<(), SignalingError>;

    async fn set_answer(
        &self,
        id: &SessionId,
        answer: SessionDescription,
    ) -> Result<(), SignalingError>;

    /// Appends without waiting for any remote acknowledgement.
    async fn append_candidate(
        &self,
        id: &SessionId,
        side: CandidateSide,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError>;

    /// Watches the record. The current record is delivered right away.
    async fn subscribe_session(
        &self,
        id: &SessionId,
        callback: SessionCallback,
    ) -> Result<Subscription, SignalingError>;

    /// Watches one candidate sequence. Candidates already present are
    /// delivered right away as the first delta.
    async fn subscribe_candidates(
        &self,
        id: &SessionId,
        side: CandidateSide,
        callback: CandidateCallback,
    ) -> Result<Subscription, SignalingError>;
}

/// Handle to a registered listener. Cancelling stops delivery and releases
/// the listener; dropping the handle cancels it too.
pub struct Subscription {
    label: String,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Returns `true` the first time only.
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(cancel) => {
                debug!(subscription = %self.label, "cancelling subscription");
                cancel();
                true
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

/// All listeners of one call, released together.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn active(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.is_active()).count()
    }

    /// Cancels every listener and returns how many were still active.
    pub fn cancel_all(&mut self) -> usize {
        self.subscriptions
            .drain(..)
            .map(|mut subscription| subscription.cancel())
            .filter(|cancelled| *cancelled)
            .count()
    }
}
