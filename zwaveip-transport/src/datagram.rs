//! Datagram transport trait

use crate::error::ZipResult;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

/// Largest datagram the transports will read
pub const MAX_DATAGRAM_SIZE: usize = 1 << 16;

/// Uniform result of a bounded receive
///
/// Both transports map their native read results onto these four cases so
/// the connection driver can treat them alike.
#[derive(Debug)]
pub enum RecvOutcome {
    /// A datagram of this many bytes was written into the buffer
    Data(usize),
    /// The receive timeout elapsed without data
    NoData,
    /// A transient error occurred; polling again is safe
    Retry(crate::error::ZipError),
    /// The transport is unusable
    Fatal(crate::error::ZipError),
}

/// Datagram channel carrying Z/IP frames
///
/// Implemented by the raw UDP binding and the DTLS binding. All methods take
/// `&self` so a single owner can poll for data while writing queued frames.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram
    ///
    /// # Errors
    /// Returns the socket or record-layer error. Use
    /// [`is_transient`](crate::error::is_transient) to decide whether the
    /// transport is still usable.
    async fn send(&self, frame: &[u8]) -> ZipResult<()>;

    /// Wait up to `timeout` for one datagram
    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> RecvOutcome;

    /// Release the transport
    ///
    /// Secured transports send a close notification first. Calling `close`
    /// more than once is harmless.
    async fn close(&self) -> ZipResult<()>;

    /// Address of the peer, if known
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Whether datagrams are protected by DTLS
    fn is_secure(&self) -> bool;
}

#[async_trait]
impl<T: DatagramTransport + ?Sized> DatagramTransport for Box<T> {
    async fn send(&self, frame: &[u8]) -> ZipResult<()> {
        (**self).send(frame).await
    }

    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> RecvOutcome {
        (**self).recv(buf, timeout).await
    }

    async fn close(&self) -> ZipResult<()> {
        (**self).close().await
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        (**self).remote_addr()
    }

    fn is_secure(&self) -> bool {
        (**self).is_secure()
    }
}

/// Unspecified local address of the same family as `remote`, with an ephemeral port
pub fn unspecified_for(remote: &SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}
