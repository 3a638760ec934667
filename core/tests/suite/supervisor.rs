use pretty_assertions::assert_eq;
use rfsh_core::BridgeEvent;
use rfsh_core::BridgeMode;
use rfsh_core::SessionId;
use rfsh_core::TerminationReason;
use rfsh_core::exec::CommandStatus;
use rfsh_test_support::start_server;
use rfsh_test_support::test_config;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lifecycle_events_describe_each_session() {
    let mut server = start_server(test_config(BridgeMode::CommandResponse)).await;

    let listening = server
        .wait_for_event(|event| matches!(event, BridgeEvent::Listening { .. }))
        .await;
    assert_eq!(
        listening,
        BridgeEvent::Listening {
            description: format!("tcp {}", server.addr)
        }
    );

    let mut client = server.connect().await;
    client.read_until("> ").await;
    client.send_line("exit 4").await;
    client.read_until("> ").await;
    client.send_line("quit").await;
    client.read_to_end().await;

    match server
        .wait_for_event(|event| matches!(event, BridgeEvent::Connected { .. }))
        .await
    {
        BridgeEvent::Connected {
            session_id, mode, ..
        } => {
            assert_eq!(session_id, SessionId(1));
            assert_eq!(mode, BridgeMode::CommandResponse);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match server
        .wait_for_event(|event| matches!(event, BridgeEvent::CommandCompleted { .. }))
        .await
    {
        BridgeEvent::CommandCompleted {
            command,
            status,
            exit_code,
            ..
        } => {
            assert_eq!(command, "exit 4");
            assert_eq!(status, CommandStatus::Success);
            assert_eq!(exit_code, Some(4));
        }
        other => panic!("unexpected event {other:?}"),
    }
    match server
        .wait_for_event(|event| matches!(event, BridgeEvent::Disconnected { .. }))
        .await
    {
        BridgeEvent::Disconnected { reason, .. } => {
            assert_eq!(reason, TerminationReason::ClientExit);
        }
        other => panic!("unexpected event {other:?}"),
    }
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_ends_an_active_session() {
    let mut server = start_server(test_config(BridgeMode::CommandResponse)).await;
    let mut client = server.connect().await;
    client.read_until("> ").await;
    server
        .wait_for_event(|event| matches!(event, BridgeEvent::Connected { .. }))
        .await;

    let mut events = server.stop().await;
    assert_eq!(client.read_to_end().await, "");

    let mut remaining = Vec::new();
    while let Ok(event) = events.try_recv() {
        remaining.push(event);
    }
    assert!(
        remaining.iter().any(|event| matches!(
            event,
            BridgeEvent::Disconnected {
                reason: TerminationReason::OperatorRequested,
                ..
            }
        )),
        "{remaining:?}"
    );
    assert_eq!(remaining.last(), Some(&BridgeEvent::ShutdownRequested));
}
