use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::net::ToSocketAddrs;

use super::Accepted;
use super::Listener;

/// TCP listener, handy for serial-over-IP adapters and local testing.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Listener for TcpTransport {
    async fn accept(&mut self) -> io::Result<Accepted> {
        let (stream, peer) = self.listener.accept().await?;
        // Interactive traffic: small writes should not wait for Nagle.
        let _ = stream.set_nodelay(true);
        Ok(Accepted::new(stream, peer.to_string()))
    }

    fn description(&self) -> String {
        format!("tcp {}", self.local_addr)
    }
}
