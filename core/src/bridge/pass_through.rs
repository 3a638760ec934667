use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::trace;

use super::DuplexBridge;
use super::TerminationReason;
use crate::pty::PtySession;

const READ_CHUNK_SIZE: usize = 4096;

/// Copies raw bytes both ways between the transport and the pty master.
/// The first direction to end or fail ends the session.
pub(super) async fn run<S>(
    bridge: &DuplexBridge<'_>,
    transport: &mut S,
    pty: &mut PtySession,
) -> TerminationReason
where
    S: AsyncRead + AsyncWrite + Unpin + Send + ?Sized,
{
    let Some(mut output) = pty.take_output() else {
        return TerminationReason::LocalError("pty output already in use".to_string());
    };
    let input = pty.input_sender();
    let (mut inbound, mut outbound) = tokio::io::split(transport);

    // Each direction waits only on its own queue, so a full input queue
    // never stops shell output from being drained.
    tokio::select! {
        _ = bridge.shutdown.cancelled() => TerminationReason::OperatorRequested,
        reason = shell_to_peer(&mut output, &mut outbound) => reason,
        reason = peer_to_shell(&mut inbound, &input) => reason,
    }
}

async fn shell_to_peer<W>(
    output: &mut mpsc::Receiver<Vec<u8>>,
    outbound: &mut W,
) -> TerminationReason
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while let Some(bytes) = output.recv().await {
        let written = async {
            outbound.write_all(&bytes).await?;
            outbound.flush().await
        }
        .await;
        if let Err(err) = written {
            trace!(error = %err, "writing to transport failed");
            return TerminationReason::PeerClosed;
        }
    }
    TerminationReason::ShellExited
}

async fn peer_to_shell<R>(
    inbound: &mut R,
    input: &mpsc::Sender<Vec<u8>>,
) -> TerminationReason
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match inbound.read(&mut buf).await {
            Ok(0) => return TerminationReason::PeerClosed,
            Ok(n) => {
                if input.send(buf[..n].to_vec()).await.is_err() {
                    // The writer task stops once the master is gone.
                    return TerminationReason::ShellExited;
                }
            }
            Err(err) => {
                trace!(error = %err, "reading from transport failed");
                return TerminationReason::PeerClosed;
            }
        }
    }
}
