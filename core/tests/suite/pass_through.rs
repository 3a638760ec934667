use std::time::Duration;

use pretty_assertions::assert_eq;
use rfsh_core::BridgeEvent;
use rfsh_core::BridgeMode;
use rfsh_core::TerminationReason;
use rfsh_core::config::DEFAULT_BANNER;
use rfsh_test_support::start_server;
use rfsh_test_support::test_config;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shell_round_trip_and_exit_closes_the_connection() {
    let mut server = start_server(test_config(BridgeMode::PassThrough)).await;
    let mut client = server.connect().await;
    assert_eq!(client.read_until(DEFAULT_BANNER).await, DEFAULT_BANNER);

    // The terminal echoes the typed line verbatim; only the shell's output
    // contains the evaluated number.
    client.send(b"echo bridge-$((40+2))\n").await;
    client.read_until("bridge-42").await;

    client.send(b"exit\n").await;
    client.read_to_end().await;

    let event = server
        .wait_for_event(|event| matches!(event, BridgeEvent::Disconnected { .. }))
        .await;
    match event {
        BridgeEvent::Disconnected { reason, .. } => {
            assert_eq!(reason, TerminationReason::ShellExited);
        }
        other => panic!("unexpected event {other:?}"),
    }
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_drop_kills_the_shell_and_frees_the_listener() {
    let mut server = start_server(test_config(BridgeMode::PassThrough)).await;

    let mut first = server.connect().await;
    first.read_until(DEFAULT_BANNER).await;
    drop(first);
    let event = server
        .wait_for_event(|event| matches!(event, BridgeEvent::Disconnected { .. }))
        .await;
    assert!(
        matches!(
            event,
            BridgeEvent::Disconnected {
                reason: TerminationReason::PeerClosed,
                ..
            }
        ),
        "{event:?}"
    );

    let mut second = server.connect().await;
    second.read_until(DEFAULT_BANNER).await;
    second.send(b"echo again-$((1+1))\n").await;
    second.read_until("again-2").await;
    server.stop().await;
}

const FLOOD_LINES: usize = 20_000;

fn flood_line(index: usize) -> Vec<u8> {
    let mut line = format!("line {index:06} ").into_bytes();
    line.resize(99, b'x');
    line.push(b'\n');
    line
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heavy_two_way_traffic_keeps_flowing() {
    let mut server = start_server(test_config(BridgeMode::PassThrough)).await;
    let mut client = server.connect().await;
    client.read_until(DEFAULT_BANNER).await;
    client.send(b"cat\n").await;
    let (buffered, mut reader, mut writer) = client.into_split();

    let feed = tokio::spawn(async move {
        for index in 0..FLOOD_LINES {
            writer.write_all(&flood_line(index)).await.expect("write line");
        }
        // End-of-file for cat, then a marker only the shell can produce.
        writer.write_all(b"\x04").await.expect("write eof");
        writer
            .write_all(b"echo DONE-$((70+7))\n")
            .await
            .expect("write marker");
        writer
    });

    let marker = b"DONE-77";
    let mut tail = buffered;
    let mut received = tail.len();
    let drained = tokio::time::timeout(Duration::from_secs(60), async {
        let mut chunk = [0u8; 16 * 1024];
        loop {
            if tail.windows(marker.len()).any(|window| window == marker) {
                return;
            }
            let keep = tail.len().saturating_sub(marker.len());
            tail.drain(..keep);
            let n = reader.read(&mut chunk).await.expect("read");
            assert!(n > 0, "connection closed after {received} bytes");
            received += n;
            tail.extend_from_slice(&chunk[..n]);
        }
    })
    .await;
    assert!(
        drained.is_ok(),
        "traffic stalled after {received} bytes of about {}",
        2 * FLOOD_LINES * 101
    );

    let writer = feed.await.expect("feed task");
    drop(writer);
    drop(reader);
    server
        .wait_for_event(|event| matches!(event, BridgeEvent::Disconnected { .. }))
        .await;

    let mut next = server.connect().await;
    assert_eq!(next.read_until(DEFAULT_BANNER).await, DEFAULT_BANNER);
    server.stop().await;
}
