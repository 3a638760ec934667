//! One accepted connection, from greeting to teardown.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;

use crate::bridge::DuplexBridge;
use crate::bridge::LocalEndpoint;
use crate::bridge::TerminationReason;
use crate::config::BridgeConfig;
use crate::config::BridgeMode;
use crate::events::BridgeEvent;
use crate::events::EventSink;
use crate::exec::CommandExecutor;
use crate::pty::PtySession;
use crate::transport::Accepted;
use crate::transport::BoxedStream;

/// Upper bound on the orderly shutdown of a transport that is going away.
const TRANSPORT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    peer: String,
    started_at: DateTime<Utc>,
    mode: BridgeMode,
    state: SessionState,
    termination: Option<TerminationReason>,
}

impl Session {
    fn new(id: SessionId, peer: String, mode: BridgeMode) -> Self {
        Self {
            id,
            peer,
            started_at: Utc::now(),
            mode,
            state: SessionState::Connected,
            termination: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn mode(&self) -> BridgeMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set once the session reached [`SessionState::Closed`].
    pub fn termination(&self) -> Option<&TerminationReason> {
        self.termination.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn finish(&mut self, reason: TerminationReason) {
        self.termination = Some(reason);
        self.transition(SessionState::Closed);
    }
}

struct SessionContext {
    config: BridgeConfig,
    executor: CommandExecutor,
    events: Arc<dyn EventSink>,
    next_session_id: AtomicU32,
}

/// Runs accepted connections to completion, one at a time.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionContext>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("mode", &self.inner.config.mode)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(config: BridgeConfig, events: Arc<dyn EventSink>) -> Self {
        let executor = CommandExecutor::from_config(&config.command);
        Self {
            inner: Arc::new(SessionContext {
                config,
                executor,
                events,
                next_session_id: AtomicU32::new(1),
            }),
        }
    }

    pub fn mode(&self) -> BridgeMode {
        self.inner.config.mode
    }

    /// Drives `accepted` through its whole lifecycle and returns the closed
    /// session. Nothing that happens inside the session, including a panic,
    /// propagates to the caller.
    pub async fn run(&self, accepted: Accepted, shutdown: CancellationToken) -> Session {
        let id = SessionId(self.inner.next_session_id.fetch_add(1, Ordering::Relaxed));
        let Accepted { stream, peer } = accepted;
        let session = Session::new(id, peer, self.inner.config.mode);
        self.inner.events.emit(BridgeEvent::Connected {
            session_id: id,
            peer: session.peer.clone(),
            mode: session.mode,
        });

        let fallback = session.clone();
        let ctx = Arc::clone(&self.inner);
        let session = match tokio::spawn(drive(ctx, session, stream, shutdown)).await {
            Ok(session) => session,
            Err(err) => {
                error!(session_id = %id, error = %err, "session task failed");
                let mut session = fallback;
                session.finish(TerminationReason::LocalError(format!(
                    "session task failed: {err}"
                )));
                session
            }
        };

        let reason = session
            .termination
            .clone()
            .unwrap_or(TerminationReason::PeerClosed);
        self.inner.events.emit(BridgeEvent::Disconnected {
            session_id: id,
            peer: session.peer.clone(),
            reason,
            duration: session.elapsed(),
        });
        session
    }
}

async fn drive(
    ctx: Arc<SessionContext>,
    mut session: Session,
    mut stream: BoxedStream,
    shutdown: CancellationToken,
) -> Session {
    let config = &ctx.config;
    let mut pty = None;

    let greeting = config.session.greeting(session.mode);
    let reason = match write_flush(&mut stream, greeting.as_bytes()).await {
        Err(err) => {
            trace!(error = %err, "sending banner failed");
            TerminationReason::PeerClosed
        }
        Ok(()) => {
            session.transition(SessionState::Active);
            let bridge = DuplexBridge {
                session_id: session.id,
                config: &config.session,
                events: ctx.events.as_ref(),
                shutdown: &shutdown,
            };
            match session.mode {
                BridgeMode::CommandResponse => {
                    let local = LocalEndpoint::Commands {
                        executor: &ctx.executor,
                        timeout: config.command.timeout(),
                    };
                    bridge.run(&mut stream, local).await
                }
                BridgeMode::PassThrough => match PtySession::open(&config.pty) {
                    Ok(opened) => {
                        let terminal = pty.insert(opened);
                        bridge
                            .run(&mut stream, LocalEndpoint::Terminal(terminal))
                            .await
                    }
                    Err(err) => {
                        error!(session_id = %session.id, error = %err, "could not start shell");
                        let notice = format!("Error: {err}\r\n");
                        let _ = write_flush(&mut stream, notice.as_bytes()).await;
                        TerminationReason::LocalError(err.to_string())
                    }
                },
            }
        }
    };

    session.transition(SessionState::Closing);
    if let Some(mut pty) = pty.take() {
        pty.close();
    }
    release(stream).await;
    session.finish(reason);
    session
}

async fn write_flush(stream: &mut BoxedStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await
}

/// Best-effort orderly close; the descriptor is released on drop either way.
async fn release(mut stream: BoxedStream) {
    match tokio::time::timeout(TRANSPORT_SHUTDOWN_TIMEOUT, stream.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => trace!(error = %err, "transport shutdown failed"),
        Err(_) => trace!("transport shutdown timed out"),
    }
}
