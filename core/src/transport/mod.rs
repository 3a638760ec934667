//! Stream transports a peer can connect over.
//!
//! The supervisor only ever calls [`Listener::accept`]; how the socket was
//! bound and advertised is the provisioner's business.

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

#[cfg(target_os = "linux")]
mod rfcomm;
mod tcp;
#[cfg(unix)]
mod unix;

#[cfg(target_os = "linux")]
pub use rfcomm::RfcommListener;
#[cfg(target_os = "linux")]
pub use rfcomm::RfcommStream;
pub use tcp::TcpTransport;
#[cfg(unix)]
pub use unix::UnixTransport;

/// A connected, bidirectional byte stream.
pub trait TransportStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedStream = Box<dyn TransportStream>;

/// A freshly accepted connection.
pub struct Accepted {
    pub stream: BoxedStream,
    /// Opaque peer identifier, e.g. a Bluetooth or socket address.
    pub peer: String,
}

impl Accepted {
    pub fn new(stream: impl TransportStream, peer: impl Into<String>) -> Self {
        Self {
            stream: Box::new(stream),
            peer: peer.into(),
        }
    }
}

impl fmt::Debug for Accepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accepted")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// A bound, listening endpoint. Implementations must make `accept`
/// cancel-safe: dropping the future must not lose a connection.
#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> io::Result<Accepted>;

    /// Human-readable description for logs, e.g. `rfcomm channel 1`.
    fn description(&self) -> String;
}
