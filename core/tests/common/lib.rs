//! Helpers shared by the `rfsh-core` integration suites: a supervisor on an
//! ephemeral TCP port and a line-oriented client for it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rfsh_core::BridgeConfig;
use rfsh_core::BridgeEvent;
use rfsh_core::BridgeMode;
use rfsh_core::ChannelEventSink;
use rfsh_core::EventSink;
use rfsh_core::ListenerSupervisor;
use rfsh_core::RestartPolicy;
use rfsh_core::SessionManager;
use rfsh_core::config::TransportKind;
use rfsh_core::transport::TcpTransport;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound for any single wait in the suites.
pub const IO_TIMEOUT: Duration = Duration::from_secs(15);

/// Defaults with a loopback TCP transport and a short command timeout.
pub fn test_config(mode: BridgeMode) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.mode = mode;
    config.transport.kind = TransportKind::Tcp;
    config.transport.address = "127.0.0.1:0".to_string();
    config.command.timeout_ms = 5_000;
    config.pty.shell = Some("/bin/sh".to_string());
    config
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub events: UnboundedReceiver<BridgeEvent>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Binds an ephemeral port and runs a supervisor on it in the background.
pub async fn start_server(config: BridgeConfig) -> TestServer {
    let listener = TcpTransport::bind(config.transport.address.as_str())
        .await
        .expect("bind test listener");
    let addr = listener.local_addr();
    let (sink, events) = ChannelEventSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let shutdown = CancellationToken::new();
    let supervisor = ListenerSupervisor::new(
        Box::new(listener),
        SessionManager::new(config.clone(), Arc::clone(&sink)),
        RestartPolicy::from_config(&config.supervisor),
        sink,
        shutdown.clone(),
    );
    TestServer {
        addr,
        events,
        shutdown,
        handle: tokio::spawn(supervisor.run()),
    }
}

impl TestServer {
    pub async fn connect(&self) -> TestClient {
        let stream = tokio::time::timeout(IO_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .expect("connect timed out")
            .expect("connect");
        TestClient {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Waits for the next event matching `predicate`, skipping others.
    pub async fn wait_for_event<F>(&mut self, mut predicate: F) -> BridgeEvent
    where
        F: FnMut(&BridgeEvent) -> bool,
    {
        tokio::time::timeout(IO_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("event stream closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Cancels the supervisor, waits for it to finish and hands back the
    /// events it emitted that were not consumed yet.
    pub async fn stop(self) -> UnboundedReceiver<BridgeEvent> {
        self.shutdown.cancel();
        tokio::time::timeout(IO_TIMEOUT, self.handle)
            .await
            .expect("supervisor did not stop")
            .expect("supervisor task panicked");
        self.events
    }
}

pub struct TestClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TestClient {
    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("send");
    }

    pub async fn send_line(&mut self, line: &str) {
        self.send(format!("{line}\n").as_bytes()).await;
    }

    /// Reads until `marker` has been received and returns everything up to
    /// and including it. Bytes after the marker stay buffered.
    pub async fn read_until(&mut self, marker: &str) -> String {
        self.try_read_until(marker, IO_TIMEOUT)
            .await
            .unwrap_or_else(|seen| panic!("did not receive {marker:?}; got {seen:?}"))
    }

    /// Like [`Self::read_until`] but returns what was seen instead of
    /// panicking when the marker does not arrive in time.
    pub async fn try_read_until(
        &mut self,
        marker: &str,
        wait: Duration,
    ) -> Result<String, String> {
        let marker = marker.as_bytes();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(pos) = find(&self.buffer, marker) {
                let rest = self.buffer.split_off(pos + marker.len());
                let found = std::mem::replace(&mut self.buffer, rest);
                return Ok(String::from_utf8_lossy(&found).into_owned());
            }
            let mut chunk = [0u8; 4096];
            match tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => {
                    return Err(String::from_utf8_lossy(&self.buffer).into_owned());
                }
                Ok(Ok(n)) => self.buffer.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Splits the connection for concurrent reading and writing. The first
    /// element holds bytes already received but not yet consumed.
    pub fn into_split(self) -> (Vec<u8>, OwnedReadHalf, OwnedWriteHalf) {
        let (reader, writer) = self.stream.into_split();
        (self.buffer, reader, writer)
    }

    /// Reads until the server closes the connection.
    pub async fn read_to_end(&mut self) -> String {
        let mut rest = std::mem::take(&mut self.buffer);
        let read = tokio::time::timeout(IO_TIMEOUT, async {
            let mut chunk = [0u8; 4096];
            loop {
                match self.stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => rest.extend_from_slice(&chunk[..n]),
                }
            }
        })
        .await;
        assert!(read.is_ok(), "connection was not closed");
        String::from_utf8_lossy(&rest).into_owned()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
