//! UDP transport implementation

use crate::datagram::{unspecified_for, DatagramTransport, RecvOutcome};
use crate::error::{is_transient_kind, ZipError, ZipResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::UdpSocket;

/// UDP transport layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpSettings {
    /// Local address to bind
    pub local_address: SocketAddr,
    /// Peer to connect to; `None` for a listening socket that answers whoever wrote last
    pub remote_address: Option<SocketAddr>,
    /// Upper bound on a single send
    pub send_timeout: Duration,
}

impl UdpSettings {
    /// Settings for a client socket connected to `remote_address`
    pub fn client(remote_address: SocketAddr) -> Self {
        Self {
            local_address: unspecified_for(&remote_address),
            remote_address: Some(remote_address),
            send_timeout: Duration::from_secs(2),
        }
    }

    /// Settings for a listening socket bound to `local_address`
    pub fn server(local_address: SocketAddr) -> Self {
        Self {
            local_address,
            remote_address: None,
            send_timeout: Duration::from_secs(5),
        }
    }

    /// Replace the send timeout
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }
}

/// Plain UDP transport
///
/// A client socket is connected, so the kernel filters datagrams from other
/// peers. A server socket is only bound; it records the source of every
/// datagram it receives and sends replies there.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    settings: UdpSettings,
    peer: Mutex<Option<SocketAddr>>,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Bind and, if the settings name a peer, connect a socket
    pub async fn open(settings: UdpSettings) -> ZipResult<Self> {
        let socket = UdpSocket::bind(settings.local_address).await?;
        if let Some(remote) = settings.remote_address {
            socket.connect(remote).await?;
            log::debug!(
                "UDP socket {} connected to {}",
                socket.local_addr()?,
                remote
            );
        } else {
            log::debug!("UDP socket listening on {}", socket.local_addr()?);
        }

        Ok(Self {
            peer: Mutex::new(settings.remote_address),
            socket,
            settings,
            closed: AtomicBool::new(false),
        })
    }

    /// Create a client transport from an address string such as `"192.168.1.10:4123"`
    pub async fn connect(address: &str) -> ZipResult<Self> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ZipError::InvalidData(format!("Invalid UDP address: {}", e)))?;
        Self::open(UdpSettings::client(addr)).await
    }

    /// Local address of the socket
    pub fn local_addr(&self) -> ZipResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn is_connected(&self) -> bool {
        self.settings.remote_address.is_some()
    }

    fn current_peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember_peer(&self, addr: SocketAddr) {
        let mut peer = self.peer.lock().unwrap_or_else(|e| e.into_inner());
        if *peer != Some(addr) {
            log::debug!("UDP peer is now {}", addr);
            *peer = Some(addr);
        }
    }

    fn closed_error() -> ZipError {
        ZipError::Connection(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "UDP transport is closed",
        ))
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send(&self, frame: &[u8]) -> ZipResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::closed_error());
        }

        let sent = if self.is_connected() {
            tokio::time::timeout(self.settings.send_timeout, self.socket.send(frame)).await
        } else {
            let Some(peer) = self.current_peer() else {
                log::warn!("Dropping {} byte frame: no UDP peer known yet", frame.len());
                return Ok(());
            };
            tokio::time::timeout(self.settings.send_timeout, self.socket.send_to(frame, peer)).await
        };

        let written = sent.map_err(|_| ZipError::Timeout)??;
        log::trace!("UDP sent {} bytes", written);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> RecvOutcome {
        if self.closed.load(Ordering::Acquire) {
            return RecvOutcome::Fatal(Self::closed_error());
        }

        let received = if self.is_connected() {
            tokio::time::timeout(timeout, self.socket.recv(buf))
                .await
                .map(|res| res.map(|n| (n, None)))
        } else {
            tokio::time::timeout(timeout, self.socket.recv_from(buf))
                .await
                .map(|res| res.map(|(n, addr)| (n, Some(addr))))
        };

        match received {
            Err(_) => RecvOutcome::NoData,
            Ok(Ok((n, source))) => {
                if let Some(addr) = source {
                    self.remember_peer(addr);
                }
                RecvOutcome::Data(n)
            }
            Ok(Err(e)) if is_transient_kind(e.kind()) => RecvOutcome::Retry(ZipError::Connection(e)),
            Ok(Err(e)) => RecvOutcome::Fatal(ZipError::Connection(e)),
        }
    }

    async fn close(&self) -> ZipResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("UDP transport closed");
        }
        Ok(())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.current_peer()
    }

    fn is_secure(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_settings() {
        let addr: SocketAddr = "127.0.0.1:4123".parse().unwrap();
        let settings = UdpSettings::client(addr);
        assert_eq!(settings.remote_address, Some(addr));
        assert_eq!(settings.local_address, "0.0.0.0:0".parse().unwrap());

        let v6: SocketAddr = "[fd00::3]:4123".parse().unwrap();
        assert!(UdpSettings::client(v6).local_address.is_ipv6());
    }

    #[tokio::test]
    async fn test_recv_times_out_without_data() {
        let transport = UdpTransport::open(UdpSettings::server("127.0.0.1:0".parse().unwrap()))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let outcome = transport.recv(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(outcome, RecvOutcome::NoData));
    }

    #[tokio::test]
    async fn test_server_replies_to_last_sender() {
        let server = UdpTransport::open(UdpSettings::server("127.0.0.1:0".parse().unwrap()))
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpTransport::open(UdpSettings::client(server_addr)).await.unwrap();

        client.send(&[0x23, 0x03, 0x80]).await.unwrap();

        let mut buf = [0u8; 16];
        let outcome = server.recv(&mut buf, Duration::from_secs(1)).await;
        assert!(matches!(outcome, RecvOutcome::Data(3)));
        let peer = server.remote_addr().unwrap();
        assert_eq!(peer.port(), client.local_addr().unwrap().port());

        server.send(&[0x23, 0x03, 0x40]).await.unwrap();
        let outcome = client.recv(&mut buf, Duration::from_secs(1)).await;
        assert!(matches!(outcome, RecvOutcome::Data(3)));
        assert_eq!(&buf[..3], &[0x23, 0x03, 0x40]);
    }

    #[tokio::test]
    async fn test_closed_transport_is_fatal() {
        let transport = UdpTransport::open(UdpSettings::server("127.0.0.1:0".parse().unwrap()))
            .await
            .unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let mut buf = [0u8; 16];
        let outcome = transport.recv(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(outcome, RecvOutcome::Fatal(_)));
        assert!(transport.send(&[0x00]).await.is_err());
    }
}
