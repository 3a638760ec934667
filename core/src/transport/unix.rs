use std::io;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::net::UnixListener;
use tracing::trace;

use super::Accepted;
use super::Listener;

/// Unix-domain stream listener. Removes a stale socket file before binding
/// and its own socket file on drop.
#[derive(Debug)]
pub struct UnixTransport {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixTransport {
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => trace!(path = %path.display(), "removed stale socket"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Listener for UnixTransport {
    async fn accept(&mut self) -> io::Result<Accepted> {
        let (stream, addr) = self.listener.accept().await?;
        let peer = addr
            .as_pathname()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("unix:{}", self.path.display()));
        Ok(Accepted::new(stream, peer))
    }

    fn description(&self) -> String {
        format!("unix {}", self.path.display())
    }
}

impl Drop for UnixTransport {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
