//! Structured lifecycle events emitted by the supervisor and sessions.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::bridge::TerminationReason;
use crate::config::BridgeMode;
use crate::error::AcceptErrorKind;
use crate::exec::CommandStatus;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Listening {
        description: String,
    },
    Connected {
        session_id: SessionId,
        peer: String,
        mode: BridgeMode,
    },
    CommandCompleted {
        session_id: SessionId,
        command: String,
        status: CommandStatus,
        exit_code: Option<i32>,
        duration: Duration,
    },
    Disconnected {
        session_id: SessionId,
        peer: String,
        reason: TerminationReason,
        duration: Duration,
    },
    AcceptFailed {
        kind: AcceptErrorKind,
        error: String,
        retry_in: Duration,
    },
    ShutdownRequested,
}

/// Receives every [`BridgeEvent`]. Implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: BridgeEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Listening { description } => {
                info!(listener = %description, "waiting for connections");
            }
            BridgeEvent::Connected {
                session_id,
                peer,
                mode,
            } => {
                info!(%session_id, %peer, %mode, "client connected");
            }
            BridgeEvent::CommandCompleted {
                session_id,
                command,
                status,
                exit_code,
                duration,
            } => match status {
                CommandStatus::Success => info!(
                    %session_id,
                    %command,
                    status = status.label(),
                    ?exit_code,
                    ?duration,
                    "command completed"
                ),
                CommandStatus::Timeout | CommandStatus::ExecutionError => warn!(
                    %session_id,
                    %command,
                    status = status.label(),
                    ?duration,
                    "command failed"
                ),
            },
            BridgeEvent::Disconnected {
                session_id,
                peer,
                reason,
                duration,
            } => match &reason {
                TerminationReason::LocalError(_) => {
                    error!(%session_id, %peer, %reason, ?duration, "session ended with error");
                }
                _ => info!(%session_id, %peer, %reason, ?duration, "client disconnected"),
            },
            BridgeEvent::AcceptFailed {
                kind,
                error,
                retry_in,
            } => {
                error!(?kind, %error, ?retry_in, "accept failed");
            }
            BridgeEvent::ShutdownRequested => info!("shutdown requested"),
        }
    }
}

/// Forwards events to an unbounded channel. Events emitted after the
/// receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }
}
