//! Call session state machine.
//!
//! One [`CallSessionCoordinator`] owns one call attempt: its peer adapter,
//! local media, signaling listeners and candidate queue. Role actions come
//! in through the async methods; everything the store or the engine reports
//! is funnelled into a single pump task and applied under the same lock the
//! role actions take, so the coordinator behaves like a per-session actor.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::AuthSession;
use crate::config::CallConfig;
use crate::error::{CallError, PeerError, SignalingError};
use crate::logger::candidate_summary;
use crate::media::{MediaConstraints, MediaSource};
use crate::peer::{
    LocalMediaStream, PeerConnectionAdapter, PeerLinkState, RemoteTrack, SharedCandidateQueue,
};
use crate::session::{CallSession, IceCandidate, PeerRole, SessionDescription};
use crate::session_id::SessionId;
use crate::signaling::{SignalingChannel, SubscriptionSet};
use crate::state::ConnectionState;

/// What the UI layer observes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum CallEvent {
    StateChanged(ConnectionState),
    SessionCreated(SessionId),
    RemoteTrack(RemoteTrack),
    /// The link dropped; the call fails unless it returns within the grace period.
    LinkProblem,
    LinkRecovered,
    Error(#[serde(serialize_with = "display")] CallError),
}

fn display<S: serde::Serializer>(err: &CallError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

/// Collaborators shared by every call attempt of one signed-in user.
#[derive(Clone)]
pub struct CallContext {
    pub signaling: Arc<dyn SignalingChannel>,
    pub media: Arc<dyn MediaSource>,
    pub auth: AuthSession,
    pub config: CallConfig,
}

enum Inbound {
    Record(CallSession),
    RemoteCandidate(IceCandidate),
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    Link(PeerLinkState),
    GraceExpired(u64),
}

struct Core {
    state: ConnectionState,
    role: Option<PeerRole>,
    session_id: Option<SessionId>,
    local_stream: Option<LocalMediaStream>,
    /// One-shot guard: set before the remote description is applied.
    remote_applied: bool,
    /// Local description is stored remotely; local candidates may follow.
    published: bool,
    unpublished_candidates: Vec<IceCandidate>,
    gathered: Vec<IceCandidate>,
    subscriptions: SubscriptionSet,
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    link_problem: bool,
    link_generation: u64,
    grace_timer: Option<JoinHandle<()>>,
}

impl Core {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            role: None,
            session_id: None,
            local_stream: None,
            remote_applied: false,
            published: false,
            unpublished_candidates: Vec::new(),
            gathered: Vec::new(),
            subscriptions: SubscriptionSet::new(),
            inbound: None,
            link_problem: false,
            link_generation: 0,
            grace_timer: None,
        }
    }
}

struct Inner {
    ctx: CallContext,
    peer: Arc<dyn PeerConnectionAdapter>,
    events: broadcast::Sender<CallEvent>,
    state_tx: watch::Sender<ConnectionState>,
    /// Shared with the candidate listener so admission and drain hand-over
    /// are one atomic step.
    remote_candidates: SharedCandidateQueue,
    core: Mutex<Core>,
}

/// Drives one call attempt from `Idle` to `Ended`/`Failed`.
///
/// Terminal states are final; a new attempt needs a new coordinator (and a
/// new peer adapter).
pub struct CallSessionCoordinator {
    inner: Arc<Inner>,
}

impl CallSessionCoordinator {
    pub fn new(ctx: CallContext, peer: Arc<dyn PeerConnectionAdapter>) -> Self {
        let (events, _) = broadcast::channel(ctx.config.event_capacity.max(1));
        Self::with_events(ctx, peer, events)
    }

    /// Publishes into an existing event channel, so observers survive a
    /// restart that swaps the coordinator.
    pub fn with_events(
        ctx: CallContext,
        peer: Arc<dyn PeerConnectionAdapter>,
        events: broadcast::Sender<CallEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                ctx,
                peer,
                events,
                state_tx,
                remote_candidates: SharedCandidateQueue::new(),
                core: Mutex::new(Core::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.inner.core.lock().await.session_id.clone()
    }

    pub async fn role(&self) -> Option<PeerRole> {
        self.inner.core.lock().await.role
    }

    /// Listeners currently held for this call.
    pub async fn active_subscriptions(&self) -> usize {
        self.inner.core.lock().await.subscriptions.active()
    }

    /// `Idle -> LocalMediaReady`: acquires local tracks and attaches them.
    pub async fn start_local_media(&self, constraints: MediaConstraints) -> Result<(), CallError> {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        inner.require(&core, ConnectionState::Idle, "start local media")?;

        let stream = match inner.ctx.media.acquire(constraints).await {
            Ok(stream) => stream,
            Err(err) => return Err(inner.fail(&mut core, err.into()).await),
        };
        let attached = inner.peer.attach_local_tracks(&stream).await;
        core.local_stream = Some(stream);
        if let Err(err) = attached {
            return Err(inner.fail(&mut core, err.into()).await);
        }

        let tx = self.ensure_pump(&mut core);
        let track_tx = tx.clone();
        inner.peer.on_remote_track(Box::new(move |track| {
            let _ = track_tx.send(Inbound::RemoteTrack(track));
        }));
        inner.peer.on_link_state(Box::new(move |state| {
            let _ = tx.send(Inbound::Link(state));
        }));

        inner.advance(&mut core, ConnectionState::LocalMediaReady);
        Ok(())
    }

    /// Caller path, `LocalMediaReady -> Negotiating`. Returns the id to share
    /// with the callee.
    pub async fn create_call(&self) -> Result<SessionId, CallError> {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        inner.require(&core, ConnectionState::LocalMediaReady, "create a call")?;
        inner.require_auth()?;

        match self.offer_flow(&mut core).await {
            Ok(id) => Ok(id),
            Err(err) => Err(inner.fail(&mut core, err).await),
        }
    }

    async fn offer_flow(&self, core: &mut Core) -> Result<SessionId, CallError> {
        let inner = &self.inner;
        let signaling = inner.ctx.signaling.clone();

        let id = signaling.create_session().await?;
        core.session_id = Some(id.clone());
        core.role = Some(PeerRole::Caller);
        inner.advance(core, ConnectionState::Negotiating);
        inner.emit(CallEvent::SessionCreated(id.clone()));

        self.observe_local_candidates(core);
        let offer = inner.peer.create_offer().await?;
        inner.peer.set_local_description(offer.clone()).await?;
        signaling.set_offer(&id, offer).await?;
        info!(session = %id, "offer published");
        inner.publish_pending_candidates(core).await?;

        let tx = self.ensure_pump(core);
        let record_tx = tx.clone();
        let record = signaling
            .subscribe_session(
                &id,
                Box::new(move |session| {
                    let _ = record_tx.send(Inbound::Record(session));
                }),
            )
            .await?;
        core.subscriptions.push(record);
        self.watch_remote_candidates(core, &id, PeerRole::Caller, tx)
            .await?;
        Ok(id)
    }

    /// Callee path, `LocalMediaReady -> Negotiating`.
    ///
    /// A missing record or a record without an offer is reported without
    /// leaving `LocalMediaReady`, so the user can fix the id or wait.
    pub async fn join_call(&self, id: &SessionId) -> Result<(), CallError> {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        inner.require(&core, ConnectionState::LocalMediaReady, "join a call")?;
        inner.require_auth()?;

        let session = match inner.ctx.signaling.load_session(id).await {
            Ok(session) => session,
            Err(SignalingError::NotFound(missing)) => {
                return Err(inner.reject(CallError::Signaling(SignalingError::NotFound(missing))))
            }
            Err(err) => return Err(inner.fail(&mut core, err.into()).await),
        };
        let Some(offer) = session.offer.clone() else {
            return Err(inner.reject(CallError::SessionNotReady(id.clone())));
        };
        if session.answer.is_some() {
            let err = SignalingError::AlreadySet {
                id: id.clone(),
                field: "answer",
            };
            return Err(inner.fail(&mut core, err.into()).await);
        }

        core.session_id = Some(id.clone());
        core.role = Some(PeerRole::Callee);
        inner.advance(&mut core, ConnectionState::Negotiating);

        match self.answer_flow(&mut core, id, offer).await {
            Ok(()) => Ok(()),
            Err(err) => Err(inner.fail(&mut core, err).await),
        }
    }

    async fn answer_flow(
        &self,
        core: &mut Core,
        id: &SessionId,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        let inner = &self.inner;
        let tx = self.ensure_pump(core);
        // Candidates already in the store are buffered until the offer is applied.
        self.watch_remote_candidates(core, id, PeerRole::Callee, tx)
            .await?;

        self.observe_local_candidates(core);
        inner.apply_remote_description(core, offer).await?;
        let answer = inner.peer.create_answer().await?;
        inner.peer.set_local_description(answer.clone()).await?;
        inner.ctx.signaling.set_answer(id, answer).await?;
        info!(session = %id, "answer published");
        inner.publish_pending_candidates(core).await?;
        Ok(())
    }

    /// `-> Ended`. Releases every listener, stops local media and closes the
    /// peer connection. A no-op once the call is over.
    pub async fn hangup(&self) -> Result<(), CallError> {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        if core.state.is_terminal() {
            debug!(state = %core.state, "hangup on finished call ignored");
            return Ok(());
        }
        let cancelled = inner.teardown(&mut core).await;
        info!(cancelled, "call hung up");
        inner.advance(&mut core, ConnectionState::Ended);
        Ok(())
    }

    fn ensure_pump(&self, core: &mut Core) -> mpsc::UnboundedSender<Inbound> {
        if let Some(tx) = &core.inbound {
            return tx.clone();
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                if inner.dispatch(msg).await.is_break() {
                    break;
                }
            }
            debug!("signal pump stopped");
        });
        core.inbound = Some(tx.clone());
        tx
    }

    fn observe_local_candidates(&self, core: &mut Core) {
        let tx = self.ensure_pump(core);
        self.inner.peer.on_local_candidate(Box::new(move |candidate| {
            let _ = tx.send(Inbound::LocalCandidate(candidate));
        }));
    }

    async fn watch_remote_candidates(
        &self,
        core: &mut Core,
        id: &SessionId,
        role: PeerRole,
        tx: mpsc::UnboundedSender<Inbound>,
    ) -> Result<(), CallError> {
        let queue = self.inner.remote_candidates.clone();
        let subscription = self
            .inner
            .ctx
            .signaling
            .subscribe_candidates(
                id,
                role.inbound(),
                Box::new(move |batch| {
                    for candidate in batch {
                        if let Some(ready) = queue.admit(candidate) {
                            let _ = tx.send(Inbound::RemoteCandidate(ready));
                        }
                    }
                }),
            )
            .await?;
        core.subscriptions.push(subscription);
        Ok(())
    }
}

impl Inner {
    fn emit(&self, event: CallEvent) {
        // No receivers is fine; the UI may not be listening yet.
        let _ = self.events.send(event);
    }

    fn advance(&self, core: &mut Core, next: ConnectionState) {
        if core.state == next {
            return;
        }
        if !core.state.can_transition_to(next) {
            warn!(from = %core.state, to = %next, "ignoring invalid transition");
            return;
        }
        info!(from = %core.state, to = %next, "call state changed");
        core.state = next;
        self.state_tx.send_replace(next);
        self.emit(CallEvent::StateChanged(next));
    }

    fn require(
        &self,
        core: &Core,
        expected: ConnectionState,
        action: &'static str,
    ) -> Result<(), CallError> {
        if core.state == expected {
            Ok(())
        } else {
            Err(CallError::InvalidTransition {
                action,
                state: core.state,
            })
        }
    }

    fn require_auth(&self) -> Result<(), CallError> {
        if self.ctx.auth.is_active() {
            Ok(())
        } else {
            Err(SignalingError::Unauthenticated.into())
        }
    }

    /// Reports a user-correctable error without touching the state.
    fn reject(&self, err: CallError) -> CallError {
        warn!("{err}");
        self.emit(CallEvent::Error(err.clone()));
        err
    }

    /// Moves to `Failed` and emits exactly one error event. Later failures
    /// of an already finished call are only logged.
    async fn fail(&self, core: &mut Core, err: CallError) -> CallError {
        if core.state.is_terminal() {
            debug!("{err} after call finished");
            return err;
        }
        error!(session = ?core.session_id, "call failed: {err}");
        self.teardown(core).await;
        self.advance(core, ConnectionState::Failed);
        self.emit(CallEvent::Error(err.clone()));
        err
    }

    /// Releases everything the call holds; returns how many listeners were
    /// still active.
    async fn teardown(&self, core: &mut Core) -> usize {
        let cancelled = core.subscriptions.cancel_all();
        self.peer.clear_observers();
        if let Some(timer) = core.grace_timer.take() {
            timer.abort();
        }
        core.inbound = None;
        core.unpublished_candidates.clear();
        if !core.gathered.is_empty() {
            candidate_summary(&core.gathered);
            core.gathered.clear();
        }
        if let Some(stream) = core.local_stream.take() {
            self.ctx.media.stop(&stream);
            if let Err(e) = self.peer.detach_local_tracks().await {
                debug!("failed to detach local tracks: {e}");
            }
        }
        if let Err(e) = self.peer.close().await {
            warn!("failed to close peer connection: {e}");
        }
        self.remote_candidates.reset();
        debug!(cancelled, "call resources released");
        cancelled
    }

    /// Applies the remote description at most once per round and drains the
    /// candidates that arrived before it.
    async fn apply_remote_description(
        &self,
        core: &mut Core,
        desc: SessionDescription,
    ) -> Result<(), CallError> {
        if core.remote_applied || self.peer.has_remote_description().await {
            debug!("remote description already applied, ignoring duplicate");
            return Ok(());
        }
        core.remote_applied = true;
        self.peer.set_remote_description(desc).await?;

        let report = self
            .remote_candidates
            .drain_into(self.peer.as_ref())
            .await?;
        info!(
            applied = report.applied,
            rejected = report.rejected,
            "remote description applied"
        );
        Ok(())
    }

    async fn publish_pending_candidates(&self, core: &mut Core) -> Result<(), CallError> {
        core.published = true;
        let (Some(id), Some(role)) = (core.session_id.clone(), core.role) else {
            return Ok(());
        };
        let pending = std::mem::take(&mut core.unpublished_candidates);
        for candidate in pending {
            self.append_local_candidate(&id, role, candidate).await?;
        }
        Ok(())
    }

    async fn append_local_candidate(
        &self,
        id: &SessionId,
        role: PeerRole,
        candidate: IceCandidate,
    ) -> Result<(), CallError> {
        self.ctx
            .signaling
            .append_candidate(id, role.outbound(), candidate)
            .await?;
        Ok(())
    }

    async fn dispatch(self: &Arc<Self>, msg: Inbound) -> ControlFlow<()> {
        let mut core = self.core.lock().await;
        if core.state.is_terminal() {
            return ControlFlow::Break(());
        }

        let result = match msg {
            Inbound::Record(session) => self.on_record(&mut core, session).await,
            Inbound::RemoteCandidate(candidate) => {
                match self.peer.add_ice_candidate(candidate).await {
                    Err(PeerError::Engine(reason)) => {
                        warn!(%reason, "remote candidate rejected");
                        Ok(())
                    }
                    other => other.map_err(CallError::from),
                }
            }
            Inbound::LocalCandidate(candidate) => {
                core.gathered.push(candidate.clone());
                match (core.published, core.session_id.clone(), core.role) {
                    (true, Some(id), Some(role)) => {
                        self.append_local_candidate(&id, role, candidate).await
                    }
                    _ => {
                        core.unpublished_candidates.push(candidate);
                        Ok(())
                    }
                }
            }
            Inbound::RemoteTrack(track) => {
                self.emit(CallEvent::RemoteTrack(track));
                if core.state == ConnectionState::Negotiating {
                    self.advance(&mut core, ConnectionState::Connected);
                }
                Ok(())
            }
            Inbound::Link(state) => self.on_link_state(&mut core, state),
            Inbound::GraceExpired(generation) => {
                if core.link_problem && core.link_generation == generation {
                    Err(CallError::LinkFailed)
                } else {
                    Ok(())
                }
            }
        };

        if let Err(err) = result {
            self.fail(&mut core, err).await;
        }
        if core.state.is_terminal() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    async fn on_record(&self, core: &mut Core, session: CallSession) -> Result<(), CallError> {
        let Some(role) = core.role else {
            return Ok(());
        };
        match session.remote_description(role) {
            Some(desc) if !core.remote_applied => {
                info!(session = %session.id, "remote description received");
                self.apply_remote_description(core, desc.clone()).await
            }
            Some(_) => {
                debug!(session = %session.id, "duplicate record update ignored");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn on_link_state(self: &Arc<Self>, core: &mut Core, state: PeerLinkState) -> Result<(), CallError> {
        match state {
            PeerLinkState::Connected if core.link_problem => {
                core.link_problem = false;
                if let Some(timer) = core.grace_timer.take() {
                    timer.abort();
                }
                info!("peer link recovered");
                self.emit(CallEvent::LinkRecovered);
                Ok(())
            }
            PeerLinkState::Disconnected if !core.link_problem => {
                core.link_problem = true;
                core.link_generation += 1;
                let generation = core.link_generation;
                let grace = self.ctx.config.disconnect_grace();
                warn!(grace_ms = grace.as_millis() as u64, "peer link disconnected, starting grace period");
                self.emit(CallEvent::LinkProblem);

                if let Some(tx) = core.inbound.clone() {
                    core.grace_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        let _ = tx.send(Inbound::GraceExpired(generation));
                    }));
                }
                Ok(())
            }
            PeerLinkState::Failed => Err(CallError::LinkFailed),
            _ => Ok(()),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if core.state.is_terminal() {
            return;
        }
        debug!("coordinator dropped while call active, releasing resources");
        core.subscriptions.cancel_all();
        self.peer.clear_observers();
        if let Some(timer) = core.grace_timer.take() {
            timer.abort();
        }
        if let Some(stream) = core.local_stream.take() {
            self.ctx.media.stop(&stream);
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let peer = self.peer.clone();
            handle.spawn(async move {
                let _ = peer.close().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    // Type-level only: the pump and the controller spawn these futures.
    #[allow(dead_code)]
    fn call_futures(call: &CallSessionCoordinator, inner: &Arc<Inner>, msg: Inbound, id: &SessionId) {
        assert_send(&inner.dispatch(msg));
        assert_send(&call.start_local_media(MediaConstraints::default()));
        assert_send(&call.create_call());
        assert_send(&call.join_call(id));
        assert_send(&call.hangup());
    }

    #[test]
    fn call_futures_can_be_spawned() {
        let _ = call_futures;
    }
}
