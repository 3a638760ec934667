// RFCOMM (Bluetooth serial port) listener on top of raw BlueZ sockets.
// libc exposes AF_BLUETOOTH but not the RFCOMM protocol number or address
// layout, so both are declared here from <bluetooth/rfcomm.h>.

use std::io;
use std::mem::size_of;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio::io::unix::AsyncFd;

use super::Accepted;
use super::Listener;

const BTPROTO_RFCOMM: libc::c_int = 3;

/// At most one peer waits behind the active session.
const LISTEN_BACKLOG: libc::c_int = 1;

/// `struct sockaddr_rc`: family, 6-byte little-endian device address and
/// channel number.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct SockaddrRc {
    rc_family: libc::sa_family_t,
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

#[derive(Debug)]
pub struct RfcommListener {
    fd: AsyncFd<OwnedFd>,
    channel: u8,
}

impl RfcommListener {
    /// Binds to `channel` on every local adapter (`BDADDR_ANY`). Must be
    /// called from within a Tokio runtime.
    pub fn bind(channel: u8) -> io::Result<Self> {
        let fd = new_socket()?;
        let addr = SockaddrRc {
            rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            rc_bdaddr: [0; 6],
            rc_channel: channel,
        };
        // SAFETY: `addr` is a valid sockaddr_rc and the length matches it.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const SockaddrRc).cast::<libc::sockaddr>(),
                size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: plain syscall on a descriptor we own.
        if unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: AsyncFd::new(fd)?,
            channel,
        })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

#[async_trait]
impl Listener for RfcommListener {
    async fn accept(&mut self) -> io::Result<Accepted> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| accept_raw(inner.as_raw_fd())) {
                Ok(result) => {
                    let (fd, peer) = result?;
                    return Ok(Accepted::new(RfcommStream::new(fd)?, peer));
                }
                Err(_would_block) => continue,
            }
        }
    }

    fn description(&self) -> String {
        format!("rfcomm channel {}", self.channel)
    }
}

fn new_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain syscall; the result is checked before use.
    let raw = unsafe {
        libc::socket(
            libc::AF_BLUETOOTH,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            BTPROTO_RFCOMM,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` is a fresh descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

fn accept_raw(listener: RawFd) -> io::Result<(OwnedFd, String)> {
    let mut addr = SockaddrRc::default();
    let mut len = size_of::<SockaddrRc>() as libc::socklen_t;
    // SAFETY: `addr`/`len` describe a writable sockaddr_rc.
    let raw = unsafe {
        libc::accept4(
            listener,
            (&mut addr as *mut SockaddrRc).cast::<libc::sockaddr>(),
            &mut len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` is a fresh descriptor nobody else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    Ok((fd, format_bdaddr(&addr.rc_bdaddr)))
}

/// BlueZ stores device addresses least-significant byte first.
fn format_bdaddr(bdaddr: &[u8; 6]) -> String {
    bdaddr
        .iter()
        .rev()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// An accepted RFCOMM connection.
#[derive(Debug)]
pub struct RfcommStream {
    fd: AsyncFd<OwnedFd>,
}

impl RfcommStream {
    fn new(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }
}

impl AsyncRead for RfcommStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                // SAFETY: `unfilled` is valid for writes of its length.
                let n = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        unfilled.as_mut_ptr().cast::<libc::c_void>(),
                        unfilled.len(),
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for RfcommStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|inner| {
                // MSG_NOSIGNAL: a vanished peer must surface as EPIPE, not
                // kill the process with SIGPIPE.
                // SAFETY: `buf` is valid for reads of its length.
                let n = unsafe {
                    libc::send(
                        inner.as_raw_fd(),
                        buf.as_ptr().cast::<libc::c_void>(),
                        buf.len(),
                        libc::MSG_NOSIGNAL,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // SAFETY: plain syscall on a descriptor we own.
        if unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_WR) } < 0 {
            return Poll::Ready(Err(io::Error::last_os_error()));
        }
        Poll::Ready(Ok(()))
    }
}
