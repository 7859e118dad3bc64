//! In-process signaling store.
//!
//! Behaves like a hosted document database: records keyed by session id,
//! candidate sub-collections with generated document ids, snapshot on
//! subscribe, then deltas. Listeners run while the store lock is held so
//! delivery order within one sequence always matches append order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::{CandidateCallback, SessionCallback, SignalingChannel, Subscription};
use crate::error::SignalingError;
use crate::session::{CallSession, CandidateSide, IceCandidate, SdpType, SessionDescription};
use crate::session_id::SessionId;
use crate::utils::random_doc_id;

/// One entry of a candidate sub-collection.
#[derive(Debug, Clone)]
pub struct StoredCandidate {
    pub doc_id: String,
    pub added_at: DateTime<Utc>,
    pub candidate: IceCandidate,
}

type SessionListener = Arc<dyn Fn(CallSession) + Send + Sync>;
type CandidateListener = Arc<dyn Fn(Vec<IceCandidate>) + Send + Sync>;

struct Document {
    record: CallSession,
    offer_candidates: Vec<StoredCandidate>,
    answer_candidates: Vec<StoredCandidate>,
    session_listeners: HashMap<u64, SessionListener>,
    candidate_listeners: HashMap<u64, (CandidateSide, CandidateListener)>,
}

impl Document {
    fn new(id: SessionId) -> Self {
        Self {
            record: CallSession::new(id),
            offer_candidates: Vec::new(),
            answer_candidates: Vec::new(),
            session_listeners: HashMap::new(),
            candidate_listeners: HashMap::new(),
        }
    }

    fn candidates(&self, side: CandidateSide) -> &[StoredCandidate] {
        match side {
            CandidateSide::Offer => &self.offer_candidates,
            CandidateSide::Answer => &self.answer_candidates,
        }
    }

    fn candidates_mut(&mut self, side: CandidateSide) -> &mut Vec<StoredCandidate> {
        match side {
            CandidateSide::Offer => &mut self.offer_candidates,
            CandidateSide::Answer => &mut self.answer_candidates,
        }
    }

    fn listener_count(&self) -> usize {
        self.session_listeners.len() + self.candidate_listeners.len()
    }
}

#[derive(Default)]
struct Store {
    docs: HashMap<SessionId, Document>,
}

struct Shared {
    store: Arc<Mutex<Store>>,
    online: AtomicBool,
    duplicate_delivery: AtomicBool,
    next_listener: AtomicU64,
    cancelled: Arc<AtomicUsize>,
}

/// Cloning yields another handle onto the same store, the way two browsers
/// share one hosted database.
#[derive(Clone)]
pub struct MemorySignaling {
    shared: Arc<Shared>,
}

impl Default for MemorySignaling {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySignaling {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Arc::new(Mutex::new(Store::default())),
                online: AtomicBool::new(true),
                duplicate_delivery: AtomicBool::new(false),
                next_listener: AtomicU64::new(1),
                cancelled: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// While offline every operation fails with [`SignalingError::Transport`].
    pub fn set_online(&self, online: bool) {
        info!(online, "signaling store connectivity changed");
        self.shared.online.store(online, Ordering::SeqCst);
    }

    /// Delivers every record change twice, as an at-least-once store may.
    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.shared
            .duplicate_delivery
            .store(duplicate, Ordering::SeqCst);
    }

    /// Listeners currently registered across all records.
    pub fn active_subscriptions(&self) -> usize {
        self.shared
            .store
            .lock()
            .docs
            .values()
            .map(Document::listener_count)
            .sum()
    }

    /// Listeners released through their [`Subscription`] handle so far.
    pub fn cancelled_subscriptions(&self) -> usize {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Raw stored entries of one candidate sub-collection.
    pub fn stored_candidates(&self, id: &SessionId, side: CandidateSide) -> Vec<StoredCandidate> {
        self.shared
            .store
            .lock()
            .docs
            .get(id)
            .map(|doc| doc.candidates(side).to_vec())
            .unwrap_or_default()
    }

    fn ensure_online(&self) -> Result<(), SignalingError> {
        if self.shared.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SignalingError::Transport("signaling store offline".into()))
        }
    }

    fn deliveries(&self) -> usize {
        if self.shared.duplicate_delivery.load(Ordering::SeqCst) {
            2
        } else {
            1
        }
    }

    fn write_description(
        &self,
        id: &SessionId,
        kind: SdpType,
        desc: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.ensure_online()?;
        let mut store = self.shared.store.lock();
        let doc = store
            .docs
            .get_mut(id)
            .ok_or_else(|| SignalingError::NotFound(id.clone()))?;

        let (field, slot) = match kind {
            SdpType::Offer => ("offer", &mut doc.record.offer),
            SdpType::Answer => ("answer", &mut doc.record.answer),
        };
        if slot.is_some() {
            debug!(session = %id, field, "rejecting second write of write-once field");
            return Err(SignalingError::AlreadySet {
                id: id.clone(),
                field,
            });
        }
        *slot = Some(desc);
        debug!(session = %id, field, "description stored");

        let record = doc.record.clone();
        for _ in 0..self.deliveries() {
            for listener in doc.session_listeners.values() {
                listener(record.clone());
            }
        }
        Ok(())
    }

    fn next_listener_id(&self) -> u64 {
        self.shared.next_listener.fetch_add(1, Ordering::Relaxed)
    }

    fn subscription(
        &self,
        id: &SessionId,
        label: String,
        listener: u64,
        remove: fn(&mut Document, u64),
    ) -> Subscription {
        let store: Weak<Mutex<Store>> = Arc::downgrade(&self.shared.store);
        let cancelled = self.shared.cancelled.clone();
        let id = id.clone();
        Subscription::new(label, move || {
            if let Some(store) = store.upgrade() {
                if let Some(doc) = store.lock().docs.get_mut(&id) {
                    remove(doc, listener);
                }
            }
            cancelled.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn create_session(&self) -> Result<SessionId, SignalingError> {
        self.ensure_online()?;
        let id = SessionId::generate();
        self.shared
            .store
            .lock()
            .docs
            .insert(id.clone(), Document::new(id.clone()));
        info!(session = %id, "call record created");
        Ok(id)
    }

    async fn load_session(&self, id: &SessionId) -> Result<CallSession, SignalingError> {
        self.ensure_online()?;
        self.shared
            .store
            .lock()
            .docs
            .get(id)
            .map(|doc| doc.record.clone())
            .ok_or_else(|| SignalingError::NotFound(id.clone()))
    }

    async fn set_offer(
        &self,
        id: &SessionId,
        offer: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.write_description(id, SdpType::Offer, offer)
    }

    async fn set_answer(
        &self,
        id: &SessionId,
        answer: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.write_description(id, SdpType::Answer, answer)
    }

    async fn append_candidate(
        &self,
        id: &SessionId,
        side: CandidateSide,
        candidate: IceCandidate,
    ) -> Result<(), SignalingError> {
        self.ensure_online()?;
        let mut store = self.shared.store.lock();
        let doc = store
            .docs
            .get_mut(id)
            .ok_or_else(|| SignalingError::NotFound(id.clone()))?;

        let entry = StoredCandidate {
            doc_id: random_doc_id(),
            added_at: Utc::now(),
            candidate: candidate.clone(),
        };
        trace!(session = %id, collection = side.collection(), doc = %entry.doc_id, "candidate appended");
        doc.candidates_mut(side).push(entry);

        for (watched, listener) in doc.candidate_listeners.values() {
            if *watched == side {
                listener(vec![candidate.clone()]);
            }
        }
        Ok(())
    }

    async fn subscribe_session(
        &self,
        id: &SessionId,
        callback: SessionCallback,
    ) -> Result<Subscription, SignalingError> {
        self.ensure_online()?;
        let listener_id = self.next_listener_id();
        {
            let mut store = self.shared.store.lock();
            let doc = store
                .docs
                .get_mut(id)
                .ok_or_else(|| SignalingError::NotFound(id.clone()))?;
            let listener: SessionListener = Arc::from(callback);
            listener(doc.record.clone());
            doc.session_listeners.insert(listener_id, listener);
        }
        debug!(session = %id, listener = listener_id, "watching call record");
        Ok(self.subscription(id, format!("{id}/record"), listener_id, |doc, l| {
            doc.session_listeners.remove(&l);
        }))
    }

    async fn subscribe_candidates(
        &self,
        id: &SessionId,
        side: CandidateSide,
        callback: CandidateCallback,
    ) -> Result<Subscription, SignalingError> {
        self.ensure_online()?;
        let listener_id = self.next_listener_id();
        {
            let mut store = self.shared.store.lock();
            let doc = store
                .docs
                .get_mut(id)
                .ok_or_else(|| SignalingError::NotFound(id.clone()))?;
            let listener: CandidateListener = Arc::from(callback);
            let existing: Vec<IceCandidate> = doc
                .candidates(side)
                .iter()
                .map(|entry| entry.candidate.clone())
                .collect();
            if !existing.is_empty() {
                listener(existing);
            }
            doc.candidate_listeners
                .insert(listener_id, (side, listener));
        }
        debug!(session = %id, collection = side.collection(), listener = listener_id, "watching candidates");
        Ok(self.subscription(
            id,
            format!("{id}/{}", side.collection()),
            listener_id,
            |doc, l| {
                doc.candidate_listeners.remove(&l);
            },
        ))
    }
}
