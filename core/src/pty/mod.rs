//! Interactive shell on a pseudo-terminal, used by pass-through sessions.
//!
//! The master side is exposed as a pair of channels: an input sender drained
//! by a single writer task, and an output receiver fed by a blocking reader
//! thread. Output is delivered in order and never dropped.

use std::fmt;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;

use crate::config::PtyConfig;

mod errors;

pub use errors::PtyError;

const READ_CHUNK_SIZE: usize = 8192;
const INPUT_QUEUE_DEPTH: usize = 128;
const OUTPUT_QUEUE_DEPTH: usize = 256;

pub struct PtySession {
    shell: String,
    process_id: Option<u32>,
    writer_tx: mpsc::Sender<Vec<u8>>,
    output_rx: Option<mpsc::Receiver<Vec<u8>>>,
    killer: Option<Box<dyn ChildKiller + Send + Sync>>,
    master: Option<Box<dyn MasterPty + Send>>,
    writer_handle: JoinHandle<()>,
    exited: Arc<AtomicBool>,
    closed: bool,
}

impl fmt::Debug for PtySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtySession")
            .field("shell", &self.shell)
            .field("process_id", &self.process_id)
            .field("exited", &self.has_exited())
            .field("closed", &self.closed)
            .finish()
    }
}

impl PtySession {
    /// Allocates a terminal pair and starts the configured shell on the
    /// slave side. Must be called from within a Tokio runtime.
    pub fn open(config: &PtyConfig) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::open)?;

        // Nothing fallible may follow the spawn below.
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(PtyError::open)?;
        let writer = pair.master.take_writer().map_err(PtyError::open)?;

        let shell = config.resolved_shell();
        let mut command_builder = CommandBuilder::new(&shell);
        command_builder.args(&config.args);
        command_builder.env("TERM", &config.term);
        if let Some(home) = dirs::home_dir() {
            command_builder.cwd(home);
        }

        let mut child = pair
            .slave
            .spawn_command(command_builder)
            .map_err(|err| PtyError::spawn_shell(&shell, err))?;
        // Keeping the slave open here would stop the master from ever
        // reporting end-of-file once the shell exits.
        drop(pair.slave);

        let process_id = child.process_id();
        let killer = child.clone_killer();

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_QUEUE_DEPTH);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    // Linux reports EIO once the last slave descriptor closes.
                    Err(_) => break,
                }
            }
        });

        let writer = Arc::new(StdMutex::new(writer));
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(INPUT_QUEUE_DEPTH);
        let writer_handle = tokio::spawn(async move {
            while let Some(bytes) = writer_rx.recv().await {
                let writer = Arc::clone(&writer);
                let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                    let mut guard = writer
                        .lock()
                        .map_err(|_| std::io::Error::other("pty writer poisoned"))?;
                    guard.write_all(&bytes)?;
                    guard.flush()
                })
                .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(error = %err, "writing to pty master failed");
                        break;
                    }
                    Err(err) => {
                        debug!(error = %err, "pty writer task failed");
                        break;
                    }
                }
            }
        });

        let exited = Arc::new(AtomicBool::new(false));
        let wait_exited = Arc::clone(&exited);
        tokio::task::spawn_blocking(move || {
            let _ = child.wait();
            wait_exited.store(true, Ordering::SeqCst);
        });

        debug!(shell = %shell, ?process_id, "pty session opened");

        Ok(Self {
            shell,
            process_id,
            writer_tx,
            output_rx: Some(output_rx),
            killer: Some(killer),
            master: Some(pair.master),
            writer_handle,
            exited,
            closed: false,
        })
    }

    /// Bytes sent here are written to the master in order by one writer.
    pub fn input_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.writer_tx.clone()
    }

    /// Output of the shell. Can be taken once; the receiver closes when the
    /// shell (and everything else holding the terminal) has exited.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.output_rx.take()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Kills the shell if it is still running and releases both terminal
    /// descriptors. Safe to call repeatedly and after the shell exited;
    /// failures are ignored.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(mut killer) = self.killer.take()
            && !self.has_exited()
            && let Err(err) = killer.kill()
        {
            trace!(error = %err, "killing pty shell failed");
        }
        self.writer_handle.abort();
        self.output_rx.take();
        drop(self.master.take());
        debug!(shell = %self.shell, process_id = ?self.process_id, "pty session closed");
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close();
    }
}
