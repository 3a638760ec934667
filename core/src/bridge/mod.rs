//! Moves data between a connected peer and the local endpoint until one of
//! them goes away.
//!
//! Read and write failures on the transport are not errors at this level:
//! they end the session and are reported as a [`TerminationReason`].

use std::fmt;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::events::EventSink;
use crate::exec::CommandExecutor;
use crate::pty::PtySession;
use crate::session::SessionId;

mod command;
mod line_reader;
mod pass_through;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The peer closed the connection, sent an empty line, or the transport
    /// failed.
    PeerClosed,
    /// The peer sent one of the configured exit words.
    ClientExit,
    /// The interactive shell ended on its own.
    ShellExited,
    LocalError(String),
    /// No input arrived within the idle timeout.
    Timeout,
    OperatorRequested,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::ClientExit => write!(f, "client exit"),
            Self::ShellExited => write!(f, "shell exited"),
            Self::LocalError(msg) => write!(f, "local error: {msg}"),
            Self::Timeout => write!(f, "idle timeout"),
            Self::OperatorRequested => write!(f, "operator requested"),
        }
    }
}

/// The local half of a session.
pub enum LocalEndpoint<'a> {
    /// Every line is executed and answered.
    Commands {
        executor: &'a CommandExecutor,
        timeout: Duration,
    },
    /// Raw bytes flow to and from an interactive shell.
    Terminal(&'a mut PtySession),
}

impl fmt::Debug for LocalEndpoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commands { timeout, .. } => f
                .debug_struct("Commands")
                .field("timeout", timeout)
                .finish_non_exhaustive(),
            Self::Terminal(pty) => f.debug_tuple("Terminal").field(pty).finish(),
        }
    }
}

pub struct DuplexBridge<'a> {
    pub session_id: SessionId,
    pub config: &'a SessionConfig,
    pub events: &'a dyn EventSink,
    pub shutdown: &'a CancellationToken,
}

impl DuplexBridge<'_> {
    /// Runs until the peer, the local endpoint, or the operator ends the
    /// session. The transport is left open; releasing it is the caller's
    /// job.
    pub async fn run<S>(&self, transport: &mut S, local: LocalEndpoint<'_>) -> TerminationReason
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + ?Sized,
    {
        match local {
            LocalEndpoint::Commands { executor, timeout } => {
                command::run(self, transport, executor, timeout).await
            }
            LocalEndpoint::Terminal(pty) => pass_through::run(self, transport, pty).await,
        }
    }
}
