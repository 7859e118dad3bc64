mod support;

use std::sync::Arc;

use smartcall::coordinator::CallEvent;
use smartcall::error::SessionIdError;
use smartcall::media::MediaConstraints;
use smartcall::signaling::memory::MemorySignaling;
use smartcall::{CallCommand, CallController, CallError, CommandOutcome, ConnectionState};

use support::{context, drain_events, MockPeerFactory};

async fn controller(signaling: &MemorySignaling) -> (CallController, Arc<MockPeerFactory>) {
    let factory = Arc::new(MockPeerFactory::default());
    let controller = CallController::new(context(signaling), factory.clone())
        .await
        .unwrap();
    (controller, factory)
}

#[tokio::test]
async fn commands_drive_a_call_from_start_to_restart() {
    let signaling = MemorySignaling::new();
    let (caller, factory) = controller(&signaling).await;
    let mut events = caller.subscribe();

    caller
        .execute(CallCommand::StartLocalMedia(MediaConstraints::default()))
        .await
        .unwrap();
    let outcome = caller.execute(CallCommand::CreateCall).await.unwrap();
    let CommandOutcome::SessionCreated(id) = outcome else {
        panic!("expected a session id, got {outcome:?}");
    };
    assert_eq!(caller.state(), ConnectionState::Negotiating);

    let err = caller.execute(CallCommand::Restart).await.unwrap_err();
    assert!(matches!(err, CallError::InvalidTransition { action: "restart", .. }));

    caller.execute(CallCommand::Hangup).await.unwrap();
    assert_eq!(caller.state(), ConnectionState::Ended);
    assert_eq!(signaling.active_subscriptions(), 0);

    caller.execute(CallCommand::Restart).await.unwrap();
    assert_eq!(caller.state(), ConnectionState::Idle);
    assert_eq!(factory.created.lock().len(), 2);

    let events = drain_events(&mut events);
    assert!(events.contains(&CallEvent::SessionCreated(id)));
    assert_eq!(
        events.last(),
        Some(&CallEvent::StateChanged(ConnectionState::Idle))
    );

    // The fresh attempt starts over on the new peer.
    caller
        .execute(CallCommand::StartLocalMedia(MediaConstraints::default()))
        .await
        .unwrap();
    let peer = factory.latest().unwrap();
    assert_eq!(peer.count("attach"), 1);
}

#[tokio::test]
async fn malformed_id_never_reaches_signaling() {
    let signaling = MemorySignaling::new();
    let (callee, factory) = controller(&signaling).await;
    callee
        .execute(CallCommand::StartLocalMedia(MediaConstraints::default()))
        .await
        .unwrap();
    let mut events = callee.subscribe();

    let err = callee
        .execute(CallCommand::JoinCall("  not-a-session  ".into()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CallError::Format(SessionIdError::Malformed("not-a-session".into()))
    );
    assert!(err.is_recoverable());

    let err = callee
        .execute(CallCommand::JoinCall(String::new()))
        .await
        .unwrap_err();
    assert_eq!(err, CallError::Format(SessionIdError::Empty));

    assert_eq!(callee.state(), ConnectionState::LocalMediaReady);
    assert_eq!(drain_events(&mut events).len(), 2);
    assert!(!factory.latest().unwrap().has_remote());
}

#[tokio::test]
async fn join_accepts_pasted_ids_with_whitespace_and_uppercase() {
    let signaling = MemorySignaling::new();
    let (caller, _) = controller(&signaling).await;
    let (callee, _) = controller(&signaling).await;

    for side in [&caller, &callee] {
        side.execute(CallCommand::StartLocalMedia(MediaConstraints::default()))
            .await
            .unwrap();
    }
    let CommandOutcome::SessionCreated(id) =
        caller.execute(CallCommand::CreateCall).await.unwrap()
    else {
        panic!("caller did not create a session");
    };

    let pasted = format!("  {}\n", id.as_str().to_uppercase());
    callee.execute(CallCommand::JoinCall(pasted)).await.unwrap();
    assert_eq!(callee.state(), ConnectionState::Negotiating);
    assert_eq!(callee.coordinator().session_id().await, Some(id));
}

#[test]
fn commands_deserialize_from_ui_json() {
    let cmd: CallCommand =
        serde_json::from_str(r#"{"command":"join_call","args":"abc"}"#).unwrap();
    assert_eq!(cmd, CallCommand::JoinCall("abc".into()));

    let cmd: CallCommand = serde_json::from_str(r#"{"command":"hangup"}"#).unwrap();
    assert_eq!(cmd, CallCommand::Hangup);
}
