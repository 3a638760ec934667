//! Command executor used by command-response sessions.
//!
//! Each line a remote peer sends is handed to the configured interpreter
//! (`/bin/sh -c` by default) and runs with exactly the privileges of the
//! hosting process. There is no allow-list and no sandbox: anyone who can
//! open the transport has a shell as this user.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use std::time::Instant;

use async_channel::Sender;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::config::CommandConfig;
use crate::spawn::kill_process_tree;
use crate::spawn::spawn_interpreter;

pub const NO_OUTPUT_PLACEHOLDER: &str = "Command executed (no output)\n";

// I/O buffer sizing
const READ_CHUNK_SIZE: usize = 8192; // bytes per read
const AGGREGATE_BUFFER_INITIAL_CAPACITY: usize = 8 * 1024; // 8 KiB

/// How long the output pipes may stay open after the interpreter exited or
/// was killed before we stop waiting for them.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Timeout,
    ExecutionError,
}

impl CommandStatus {
    pub fn label(self) -> &'static str {
        match self {
            CommandStatus::Success => "success",
            CommandStatus::Timeout => "timeout",
            CommandStatus::ExecutionError => "execution_error",
        }
    }
}

/// Result of one command invocation. `output` is always what gets sent back
/// to the peer: captured bytes, the no-output placeholder, or an error line.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    pub output: Vec<u8>,
    /// `None` unless the interpreter ran to completion and exited normally.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    interpreter: Vec<String>,
}

impl CommandExecutor {
    pub fn new(interpreter: Vec<String>) -> Self {
        Self { interpreter }
    }

    pub fn from_config(config: &CommandConfig) -> Self {
        Self::new(config.interpreter.clone())
    }

    /// Runs `command_line` to completion or until `timeout` expires.
    ///
    /// Never fails: timeouts and spawn failures are reported through
    /// [`CommandOutcome::status`] with a descriptive `output`.
    pub async fn execute(&self, command_line: &str, timeout: Duration) -> CommandOutcome {
        let start = Instant::now();
        let result = self.run(command_line, timeout).await;
        let duration = start.elapsed();

        match result {
            Ok(raw) if raw.timed_out => CommandOutcome {
                status: CommandStatus::Timeout,
                output: format!(
                    "Error: command timed out after {}s\n",
                    format_secs(timeout)
                )
                .into_bytes(),
                exit_code: None,
                duration,
            },
            Ok(raw) => {
                let output = if raw.aggregated_output.is_empty() {
                    NO_OUTPUT_PLACEHOLDER.as_bytes().to_vec()
                } else {
                    raw.aggregated_output
                };
                CommandOutcome {
                    status: CommandStatus::Success,
                    output,
                    exit_code: raw.exit_status.and_then(|status| status.code()),
                    duration,
                }
            }
            Err(err) => {
                warn!(error = %err, "command execution failed");
                CommandOutcome {
                    status: CommandStatus::ExecutionError,
                    output: format!("Error: {err}\n").into_bytes(),
                    exit_code: None,
                    duration,
                }
            }
        }
    }

    async fn run(&self, command_line: &str, timeout: Duration) -> io::Result<RawCommandOutput> {
        let (program, args) = self.interpreter.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "command interpreter is empty")
        })?;
        let deadline = Instant::now() + timeout;
        let mut child = spawn_interpreter(program, args, command_line)?;

        // Both pipes were configured with `Stdio::piped()`, so `take()` only
        // returns `None` if something is badly wrong.
        let stdout_reader = child.stdout.take().ok_or_else(|| {
            io::Error::other("stdout pipe was unexpectedly not available")
        })?;
        let stderr_reader = child.stderr.take().ok_or_else(|| {
            io::Error::other("stderr pipe was unexpectedly not available")
        })?;

        let (agg_tx, agg_rx) = async_channel::unbounded::<Vec<u8>>();
        let stdout_handle = tokio::spawn(read_into(stdout_reader, agg_tx.clone()));
        let stderr_handle = tokio::spawn(read_into(stderr_reader, agg_tx));

        let (exit_status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                kill_process_tree(&mut child).await;
                (None, true)
            }
        };

        // A background job started by the command can hold the pipes open
        // long after the interpreter exited. Collect until the deadline, but
        // always allow at least the grace period after the exit.
        let drain_until = deadline.max(Instant::now() + DRAIN_GRACE);
        drain_readers([stdout_handle, stderr_handle], drain_until).await;

        let mut aggregated_output = Vec::with_capacity(AGGREGATE_BUFFER_INITIAL_CAPACITY);
        while let Ok(chunk) = agg_rx.try_recv() {
            aggregated_output.extend_from_slice(&chunk);
        }

        Ok(RawCommandOutput {
            exit_status,
            aggregated_output,
            timed_out,
        })
    }
}

#[derive(Debug)]
struct RawCommandOutput {
    exit_status: Option<ExitStatus>,
    aggregated_output: Vec<u8>,
    timed_out: bool,
}

async fn drain_readers(handles: [JoinHandle<io::Result<()>>; 2], until: Instant) {
    for handle in handles {
        let abort = handle.abort_handle();
        let remaining = until.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => debug!(error = %err, "reading command output failed"),
            Ok(Err(err)) => debug!(error = %err, "command output reader task failed"),
            Err(_) => {
                debug!("command output pipe still open; abandoning remaining output");
                abort.abort();
            }
        }
    }
}

/// Copies everything from `reader` into the shared aggregate channel so the
/// two streams interleave in arrival order.
async fn read_into<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    aggregate_tx: Sender<Vec<u8>>,
) -> io::Result<()> {
    let mut tmp = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        let _ = aggregate_tx.send(tmp[..n].to_vec()).await;
    }
    Ok(())
}

fn format_secs(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if duration.subsec_millis() == 0 {
        format!("{}", duration.as_secs())
    } else {
        format!("{secs:.1}")
    }
}
