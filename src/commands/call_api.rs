use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::{CallCommand, CommandOutcome};
use crate::coordinator::{CallContext, CallEvent, CallSessionCoordinator};
use crate::error::CallError;
use crate::peer::PeerFactory;
use crate::session_id::SessionId;
use crate::state::ConnectionState;

/// Owns the current call attempt and routes UI commands to it.
///
/// Events from every attempt go through one broadcast channel, so a UI
/// subscribed once keeps receiving them across restarts.
pub struct CallController {
    ctx: CallContext,
    factory: Arc<dyn PeerFactory>,
    events: broadcast::Sender<CallEvent>,
    current: Mutex<Arc<CallSessionCoordinator>>,
}

impl CallController {
    pub async fn new(ctx: CallContext, factory: Arc<dyn PeerFactory>) -> Result<Self, CallError> {
        let (events, _) = broadcast::channel(ctx.config.event_capacity.max(1));
        let peer = factory.create(&ctx.config).await?;
        let coordinator = CallSessionCoordinator::with_events(ctx.clone(), peer, events.clone());
        Ok(Self {
            ctx,
            factory,
            events,
            current: Mutex::new(Arc::new(coordinator)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn coordinator(&self) -> Arc<CallSessionCoordinator> {
        self.current.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.coordinator().state()
    }

    pub async fn execute(&self, command: CallCommand) -> Result<CommandOutcome, CallError> {
        info!(?command, "call command");
        let coordinator = self.coordinator();
        match command {
            CallCommand::StartLocalMedia(constraints) => {
                coordinator.start_local_media(constraints).await?;
            }
            CallCommand::CreateCall => {
                let id = coordinator.create_call().await?;
                return Ok(CommandOutcome::SessionCreated(id));
            }
            CallCommand::JoinCall(raw) => {
                let id = match SessionId::validate(&raw) {
                    Ok(id) => id,
                    Err(err) => {
                        let err = CallError::from(err);
                        warn!("{err}");
                        let _ = self.events.send(CallEvent::Error(err.clone()));
                        return Err(err);
                    }
                };
                coordinator.join_call(&id).await?;
            }
            CallCommand::Hangup => coordinator.hangup().await?,
            CallCommand::Restart => self.restart(&coordinator).await?,
        }
        Ok(CommandOutcome::Done)
    }

    /// Replaces a finished coordinator with a fresh one on a new peer.
    async fn restart(&self, finished: &CallSessionCoordinator) -> Result<(), CallError> {
        let state = finished.state();
        if !state.is_terminal() {
            return Err(CallError::InvalidTransition {
                action: "restart",
                state,
            });
        }
        let peer = self.factory.create(&self.ctx.config).await?;
        let fresh =
            CallSessionCoordinator::with_events(self.ctx.clone(), peer, self.events.clone());
        *self.current.lock() = Arc::new(fresh);
        info!(previous = %state, "call restarted");
        let _ = self
            .events
            .send(CallEvent::StateChanged(ConnectionState::Idle));
        Ok(())
    }
}
