use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::adapter::PeerConnectionAdapter;
use crate::error::PeerError;
use crate::logger::dump_candidate;
use crate::session::IceCandidate;

/// Outcome of one [`CandidateQueue::drain_into`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    /// Candidates the engine refused to parse or use. The call goes on with
    /// the remaining paths.
    pub rejected: usize,
}

/// Remote candidates received before the remote description was set.
///
/// Until [`drain_into`](Self::drain_into) runs, everything is buffered in
/// arrival order. After it, the queue is "ready" and [`admit`](Self::admit)
/// hands candidates straight back for immediate use.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
    ready: bool,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers unconditionally.
    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Buffers while not ready; returns the candidate for immediate use once
    /// the queue has been drained.
    pub fn admit(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.ready {
            Some(candidate)
        } else {
            debug!(queued = self.pending.len() + 1, "remote description not set yet, queuing candidate");
            self.enqueue(candidate);
            None
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hands over everything buffered, in enqueue order, and marks the queue
    /// ready in the same step. Later [`admit`](Self::admit) calls pass
    /// candidates straight through.
    pub fn take_pending(&mut self) -> Vec<IceCandidate> {
        self.ready = true;
        self.pending.drain(..).collect()
    }

    /// Applies every buffered candidate in enqueue order, then marks the
    /// queue ready.
    ///
    /// Engine-level rejections of a single candidate are logged and counted.
    /// Any other error stops the drain and leaves the unapplied candidates
    /// buffered.
    pub async fn drain_into(
        &mut self,
        adapter: &dyn PeerConnectionAdapter,
    ) -> Result<DrainReport, PeerError> {
        let batch = self.take_pending();
        match apply_in_order(adapter, batch).await {
            Ok(report) => Ok(report),
            Err((err, unapplied)) => {
                self.restore(unapplied);
                Err(err)
            }
        }
    }

    /// Puts unapplied candidates back in front and leaves the ready state.
    fn restore(&mut self, unapplied: Vec<IceCandidate>) {
        self.ready = false;
        for candidate in unapplied.into_iter().rev() {
            self.pending.push_front(candidate);
        }
    }

    /// Drops anything buffered and returns to the not-ready state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.ready = false;
    }
}

/// [`CandidateQueue`] shared between a listener thread that admits
/// candidates and the task that drains them.
///
/// The lock is never held across an await: the drain takes the buffer and
/// flips to ready in one locked step, then applies the batch unlocked.
/// Candidates admitted meanwhile pass straight through to the caller of
/// [`admit`](Self::admit), which applies them after the batch.
#[derive(Debug, Clone, Default)]
pub struct SharedCandidateQueue {
    inner: Arc<Mutex<CandidateQueue>>,
}

impl SharedCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, candidate: IceCandidate) -> Option<IceCandidate> {
        self.inner.lock().admit(candidate)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().is_ready()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub async fn drain_into(
        &self,
        adapter: &dyn PeerConnectionAdapter,
    ) -> Result<DrainReport, PeerError> {
        let batch = self.inner.lock().take_pending();
        match apply_in_order(adapter, batch).await {
            Ok(report) => Ok(report),
            Err((err, unapplied)) => {
                self.inner.lock().restore(unapplied);
                Err(err)
            }
        }
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }
}

/// Applies `batch` in order. On a hard failure the error is returned with
/// the failed candidate and everything after it.
pub async fn apply_in_order(
    adapter: &dyn PeerConnectionAdapter,
    batch: Vec<IceCandidate>,
) -> Result<DrainReport, (PeerError, Vec<IceCandidate>)> {
    let mut report = DrainReport::default();
    let mut remaining = batch.into_iter();
    while let Some(candidate) = remaining.next() {
        dump_candidate("PENDING", &candidate);
        match adapter.add_ice_candidate(candidate.clone()).await {
            Ok(()) => report.applied += 1,
            Err(PeerError::Engine(reason)) => {
                warn!(%reason, "failed to apply pending candidate");
                report.rejected += 1;
            }
            Err(err) => {
                let mut unapplied = vec![candidate];
                unapplied.extend(remaining);
                return Err((err, unapplied));
            }
        }
    }
    debug!(applied = report.applied, rejected = report.rejected, "candidate queue drained");
    Ok(report)
}
