use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::trace;

use super::DuplexBridge;
use super::TerminationReason;
use super::line_reader::LineReader;
use super::line_reader::ReadLine;
use crate::config::EmptyLinePolicy;
use crate::events::BridgeEvent;
use crate::exec::CommandExecutor;

const LINE_TOO_LONG: &str = "Error: line too long\n";

/// Request/response loop: one line in, the command's output and a prompt
/// out. Requests are answered strictly in order.
pub(super) async fn run<S>(
    bridge: &DuplexBridge<'_>,
    transport: &mut S,
    executor: &CommandExecutor,
    timeout: Duration,
) -> TerminationReason
where
    S: AsyncRead + AsyncWrite + Unpin + Send + ?Sized,
{
    let config = bridge.config;
    let mut lines = LineReader::new();

    loop {
        let read = tokio::select! {
            biased;
            _ = bridge.shutdown.cancelled() => return TerminationReason::OperatorRequested,
            read = next_line(&mut lines, transport, config.idle_timeout()) => read,
        };
        let line = match read {
            ReadOutcome::Line(line) => line,
            ReadOutcome::TooLong => {
                debug!(session_id = %bridge.session_id, "discarded overlong line");
                let response = format!("{LINE_TOO_LONG}{}", config.prompt);
                if send(transport, response.as_bytes()).await.is_err() {
                    return TerminationReason::PeerClosed;
                }
                continue;
            }
            ReadOutcome::Closed => return TerminationReason::PeerClosed,
            ReadOutcome::Idle => {
                debug!(session_id = %bridge.session_id, "no input before idle timeout");
                return TerminationReason::Timeout;
            }
        };

        let command = line.trim();
        if command.is_empty() {
            match config.empty_line {
                EmptyLinePolicy::Close => return TerminationReason::PeerClosed,
                EmptyLinePolicy::Prompt => {
                    if send(transport, config.prompt.as_bytes()).await.is_err() {
                        return TerminationReason::PeerClosed;
                    }
                    continue;
                }
            }
        }

        if config.is_exit_word(command) {
            let _ = send(transport, config.farewell.as_bytes()).await;
            return TerminationReason::ClientExit;
        }

        debug!(session_id = %bridge.session_id, %command, "executing command");
        let outcome = tokio::select! {
            biased;
            _ = bridge.shutdown.cancelled() => return TerminationReason::OperatorRequested,
            outcome = executor.execute(command, timeout) => outcome,
        };
        bridge.events.emit(BridgeEvent::CommandCompleted {
            session_id: bridge.session_id,
            command: command.to_string(),
            status: outcome.status,
            exit_code: outcome.exit_code,
            duration: outcome.duration,
        });

        let mut response = outcome.output;
        if !response.ends_with(b"\n") {
            response.push(b'\n');
        }
        response.extend_from_slice(config.prompt.as_bytes());
        if let Err(err) = send(transport, &response).await {
            trace!(error = %err, "writing response failed");
            return TerminationReason::PeerClosed;
        }
    }
}

enum ReadOutcome {
    Line(String),
    TooLong,
    Closed,
    Idle,
}

async fn next_line<R>(
    lines: &mut LineReader,
    transport: &mut R,
    idle_timeout: Option<Duration>,
) -> ReadOutcome
where
    R: AsyncRead + Unpin + ?Sized,
{
    let read = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, lines.next_line(transport)).await {
            Ok(read) => read,
            Err(_) => return ReadOutcome::Idle,
        },
        None => lines.next_line(transport).await,
    };
    match read {
        Ok(Some(ReadLine::Line(line))) => ReadOutcome::Line(line),
        Ok(Some(ReadLine::TooLong)) => ReadOutcome::TooLong,
        Ok(None) => ReadOutcome::Closed,
        Err(err) => {
            // A reset is just another way for the peer to leave.
            trace!(error = %err, "reading from transport failed");
            ReadOutcome::Closed
        }
    }
}

async fn send<W>(transport: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    transport.write_all(bytes).await?;
    transport.flush().await
}
