use std::time::Duration;
use std::time::Instant;

use pretty_assertions::assert_eq;
use rfsh_core::BridgeMode;
use rfsh_core::config::DEFAULT_BANNER;
use rfsh_test_support::TestClient;
use rfsh_test_support::TestServer;
use rfsh_test_support::start_server;
use rfsh_test_support::test_config;

async fn greeted(server: &TestServer) -> TestClient {
    let mut client = server.connect().await;
    let banner = client.read_until("> ").await;
    assert_eq!(banner, format!("{DEFAULT_BANNER}> "));
    client
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_answers_with_output_and_prompt() {
    let server = start_server(test_config(BridgeMode::CommandResponse)).await;
    let mut client = greeted(&server).await;

    client.send_line("echo hello").await;
    assert_eq!(client.read_until("> ").await, "hello\n> ");

    client.send_line("echo out; echo err 1>&2").await;
    let response = client.read_until("> ").await;
    assert!(response.contains("out\n"), "{response:?}");
    assert!(response.contains("err\n"), "{response:?}");

    client.send_line("exit").await;
    assert_eq!(client.read_to_end().await, "Goodbye!\n");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exit_words_are_case_insensitive_and_leave_the_listener_up() {
    let server = start_server(test_config(BridgeMode::CommandResponse)).await;

    for word in ["EXIT", "Quit", "bye"] {
        let mut client = greeted(&server).await;
        client.send(format!("{word}\r\n").as_bytes()).await;
        assert_eq!(client.read_to_end().await, "Goodbye!\n");
    }

    let mut client = greeted(&server).await;
    client.send_line("echo still-here").await;
    assert_eq!(client.read_until("> ").await, "still-here\n> ");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_commands_get_a_placeholder() {
    let server = start_server(test_config(BridgeMode::CommandResponse)).await;
    let mut client = greeted(&server).await;

    client.send_line("true").await;
    assert_eq!(
        client.read_until("> ").await,
        "Command executed (no output)\n> "
    );
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_commands_time_out_without_ending_the_session() {
    let mut config = test_config(BridgeMode::CommandResponse);
    config.command.timeout_ms = 500;
    let server = start_server(config).await;
    let mut client = greeted(&server).await;

    let start = Instant::now();
    client.send_line("sleep 3").await;
    assert_eq!(
        client.read_until("> ").await,
        "Error: command timed out after 0.5s\n> "
    );
    assert!(
        start.elapsed() < Duration::from_millis(2_500),
        "timeout took {:?}",
        start.elapsed()
    );

    client.send_line("echo after").await;
    assert_eq!(client.read_until("> ").await, "after\n> ");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_line_ends_the_session() {
    let server = start_server(test_config(BridgeMode::CommandResponse)).await;
    let mut client = greeted(&server).await;

    client.send(b"\r\n").await;
    assert_eq!(client.read_to_end().await, "");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn next_client_is_served_after_a_drop() {
    let server = start_server(test_config(BridgeMode::CommandResponse)).await;

    let first = greeted(&server).await;
    drop(first);

    let mut second = greeted(&server).await;
    second.send_line("echo hello").await;
    assert_eq!(second.read_until("> ").await, "hello\n> ");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_mid_command_does_not_break_the_listener() {
    let server = start_server(test_config(BridgeMode::CommandResponse)).await;

    let mut first = greeted(&server).await;
    first.send_line("sleep 1; echo late").await;
    drop(first);

    let mut second = greeted(&server).await;
    second.send_line("echo hello").await;
    assert_eq!(second.read_until("> ").await, "hello\n> ");
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_one_session_is_served_at_a_time() {
    let server = start_server(test_config(BridgeMode::CommandResponse)).await;

    let mut first = greeted(&server).await;
    let mut second = server.connect().await;
    let early = second
        .try_read_until("> ", Duration::from_millis(500))
        .await;
    assert_eq!(early, Err(String::new()), "second client was greeted early");

    first.send_line("echo first").await;
    assert_eq!(first.read_until("> ").await, "first\n> ");
    first.send_line("bye").await;
    assert_eq!(first.read_to_end().await, "Goodbye!\n");

    assert_eq!(second.read_until("> ").await, format!("{DEFAULT_BANNER}> "));
    second.send_line("echo second").await;
    assert_eq!(second.read_until("> ").await, "second\n> ");
    server.stop().await;
}
