//! DTLS transport implementation
//!
//! Z/IP Gateways protect their datagrams with DTLS using a pre-shared key.
//! The cipher suite is pinned to a single PSK suite so captures can be
//! decrypted by packet analysers that are given the key.
//!
//! Clients complete the handshake in [`DtlsTransport::connect`] before any
//! Z/IP frame is exchanged. Servers use [`DtlsListener`], whose `accept`
//! answers the first ClientHello with a HelloVerifyRequest cookie and only
//! returns once the full handshake has completed. Handshake floods from
//! spoofed addresses therefore never reach a connection driver.

use crate::datagram::{unspecified_for, DatagramTransport, RecvOutcome};
use crate::error::{io_error_kind, is_transient_kind, ZipError, ZipResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use webrtc_dtls::cipher_suite::CipherSuiteId;
use webrtc_dtls::config::Config;
use webrtc_dtls::conn::DTLSConn;
use webrtc_util::conn::{Conn, Listener};
use zwaveip_core::{Psk, DTLS_PSK_IDENTITY};

/// PSK cipher suites a session may be pinned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PskCipherSuite {
    /// TLS_PSK_WITH_AES_128_CCM_8
    #[default]
    Aes128Ccm8,
    /// TLS_PSK_WITH_AES_128_CCM
    Aes128Ccm,
    /// TLS_PSK_WITH_AES_128_GCM_SHA256
    Aes128GcmSha256,
}

impl PskCipherSuite {
    fn id(self) -> CipherSuiteId {
        match self {
            PskCipherSuite::Aes128Ccm8 => CipherSuiteId::Tls_Psk_With_Aes_128_Ccm_8,
            PskCipherSuite::Aes128Ccm => CipherSuiteId::Tls_Psk_With_Aes_128_Ccm,
            PskCipherSuite::Aes128GcmSha256 => CipherSuiteId::Tls_Psk_With_Aes_128_Gcm_Sha256,
        }
    }
}

/// DTLS transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtlsSettings {
    /// Pre-shared key
    pub psk: Psk,
    /// PSK identity sent by clients
    pub identity: Vec<u8>,
    /// The only cipher suite offered or accepted
    pub cipher_suite: PskCipherSuite,
    /// Upper bound on a client handshake
    pub handshake_timeout: Duration,
    /// Upper bound on a single record write
    pub send_timeout: Duration,
    /// Upper bound on each close-notify attempt
    pub close_timeout: Duration,
    /// Number of close-notify attempts before giving up
    pub close_attempts: u8,
}

impl DtlsSettings {
    /// Settings using `psk` and defaults for everything else
    pub fn new(psk: Psk) -> Self {
        Self {
            psk,
            ..Self::default()
        }
    }

    /// Pin a different cipher suite
    pub fn with_cipher_suite(mut self, cipher_suite: PskCipherSuite) -> Self {
        self.cipher_suite = cipher_suite;
        self
    }

    fn base_config(&self) -> Config {
        let key = self.psk.as_bytes().to_vec();
        Config {
            psk: Some(Arc::new(move |hint: &[u8]| -> Result<Vec<u8>, webrtc_dtls::Error> {
                log::trace!("PSK requested (hint {} bytes)", hint.len());
                Ok(key.clone())
            })),
            cipher_suites: vec![self.cipher_suite.id()],
            ..Default::default()
        }
    }

    fn client_config(&self) -> Config {
        Config {
            psk_identity_hint: Some(self.identity.clone()),
            ..self.base_config()
        }
    }

    fn server_config(&self) -> Config {
        self.base_config()
    }
}

impl Default for DtlsSettings {
    fn default() -> Self {
        Self {
            psk: Psk::default(),
            identity: DTLS_PSK_IDENTITY.to_vec(),
            cipher_suite: PskCipherSuite::default(),
            handshake_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(2),
            close_timeout: Duration::from_millis(500),
            close_attempts: 3,
        }
    }
}

/// DTLS-protected datagram transport
pub struct DtlsTransport {
    conn: Arc<dyn Conn + Send + Sync>,
    remote: SocketAddr,
    settings: DtlsSettings,
    closed: AtomicBool,
}

impl std::fmt::Debug for DtlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsTransport")
            .field("remote", &self.remote)
            .field("cipher_suite", &self.settings.cipher_suite)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl DtlsTransport {
    /// Open a socket to `remote` and run the client handshake
    ///
    /// # Errors
    /// Returns `ZipError::Connection` if the socket cannot be created and
    /// `ZipError::Handshake` if the handshake fails or does not finish within
    /// `settings.handshake_timeout`.
    pub async fn connect(remote: SocketAddr, settings: DtlsSettings) -> ZipResult<Self> {
        let socket = UdpSocket::bind(unspecified_for(&remote)).await?;
        socket.connect(remote).await?;
        log::debug!("Starting DTLS handshake with {}", remote);

        let udp: Arc<dyn Conn + Send + Sync> = Arc::new(socket);
        let handshake = DTLSConn::new(udp, settings.client_config(), true, None);
        let conn = tokio::time::timeout(settings.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                ZipError::Handshake(format!(
                    "DTLS handshake with {} did not complete within {:?}",
                    remote, settings.handshake_timeout
                ))
            })?
            .map_err(|e| ZipError::Handshake(format!("DTLS handshake with {} failed: {}", remote, e)))?;

        log::info!("DTLS session established with {}", remote);
        Ok(Self {
            conn: Arc::new(conn),
            remote,
            settings,
            closed: AtomicBool::new(false),
        })
    }

    fn from_accepted(conn: Arc<dyn Conn + Send + Sync>, remote: SocketAddr, settings: DtlsSettings) -> Self {
        Self {
            conn,
            remote,
            settings,
            closed: AtomicBool::new(false),
        }
    }

    fn closed_error() -> ZipError {
        ZipError::Connection(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "DTLS transport is closed",
        ))
    }
}

/// Map a DTLS stack error onto the Z/IP error taxonomy
///
/// Errors caused by the socket keep their I/O kind so they can be classified
/// as transient; record-layer and alert errors become `ZipError::Security`.
fn map_dtls_error(error: webrtc_util::Error) -> ZipError {
    match io_error_kind(&error) {
        Some(kind) => ZipError::Connection(std::io::Error::new(kind, error.to_string())),
        None => ZipError::Security(error.to_string()),
    }
}

#[async_trait]
impl DatagramTransport for DtlsTransport {
    async fn send(&self, frame: &[u8]) -> ZipResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::closed_error());
        }

        let written = tokio::time::timeout(self.settings.send_timeout, self.conn.send(frame))
            .await
            .map_err(|_| ZipError::Timeout)?
            .map_err(map_dtls_error)?;
        log::trace!("DTLS sent {} bytes to {}", written, self.remote);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> RecvOutcome {
        if self.closed.load(Ordering::Acquire) {
            return RecvOutcome::Fatal(Self::closed_error());
        }

        match tokio::time::timeout(timeout, self.conn.recv(buf)).await {
            Err(_) => RecvOutcome::NoData,
            Ok(Ok(n)) => RecvOutcome::Data(n),
            Ok(Err(e)) => {
                let error = map_dtls_error(e);
                match &error {
                    ZipError::Connection(io) if is_transient_kind(io.kind()) => RecvOutcome::Retry(error),
                    _ => RecvOutcome::Fatal(error),
                }
            }
        }
    }

    /// Send a close notification, retrying a bounded number of times
    ///
    /// Only the local side is shut down; the peer's close notification is not
    /// awaited.
    async fn close(&self) -> ZipResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut last_error = None;
        for attempt in 1..=self.settings.close_attempts.max(1) {
            match tokio::time::timeout(self.settings.close_timeout, self.conn.close()).await {
                Ok(Ok(())) => {
                    log::debug!("DTLS session with {} closed", self.remote);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    let error = map_dtls_error(e);
                    let retry = crate::error::is_transient(&error);
                    log::debug!("DTLS close attempt {} failed: {}", attempt, error);
                    last_error = Some(error);
                    if !retry {
                        break;
                    }
                }
                Err(_) => {
                    log::debug!("DTLS close attempt {} timed out", attempt);
                    last_error = Some(ZipError::Timeout);
                }
            }
        }

        Err(last_error.unwrap_or(ZipError::Timeout))
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }

    fn is_secure(&self) -> bool {
        true
    }
}

/// DTLS server socket accepting one handshake at a time
pub struct DtlsListener {
    inner: Box<dyn Listener + Send + Sync>,
    local: SocketAddr,
    settings: DtlsSettings,
}

impl DtlsListener {
    /// Bind a listening socket
    pub async fn bind(local: SocketAddr, settings: DtlsSettings) -> ZipResult<Self> {
        let listener = webrtc_dtls::listener::listen(local, settings.server_config())
            .await
            .map_err(|e| {
                ZipError::Connection(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("Failed to bind DTLS listener to {}: {}", local, e),
                ))
            })?;
        let local = listener.addr().await.unwrap_or(local);
        log::info!("Listening for DTLS handshakes on {}", local);

        Ok(Self {
            inner: Box::new(listener),
            local,
            settings,
        })
    }

    /// Wait for the next client and complete its handshake
    ///
    /// # Errors
    /// Returns `ZipError::Handshake` if a handshake fails; the listener stays
    /// usable and `accept` may be called again.
    pub async fn accept(&self) -> ZipResult<DtlsTransport> {
        let (conn, remote) = self
            .inner
            .accept()
            .await
            .map_err(|e| ZipError::Handshake(format!("DTLS accept failed: {}", e)))?;
        log::info!("DTLS session accepted from {}", remote);
        Ok(DtlsTransport::from_accepted(conn, remote, self.settings.clone()))
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Stop accepting handshakes
    pub async fn close(&self) -> ZipResult<()> {
        self.inner.close().await.map_err(map_dtls_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = DtlsSettings::default();
        assert_eq!(settings.identity, b"Client_identity".to_vec());
        assert_eq!(settings.psk.len(), 16);
        assert_eq!(settings.cipher_suite, PskCipherSuite::Aes128Ccm8);
    }

    #[test]
    fn test_configs_pin_single_suite() {
        let settings = DtlsSettings::default().with_cipher_suite(PskCipherSuite::Aes128GcmSha256);
        let client = settings.client_config();
        assert_eq!(client.cipher_suites.len(), 1);
        assert!(client.psk_identity_hint.is_some());
        assert!(settings.server_config().psk_identity_hint.is_none());
    }

    #[test]
    fn test_map_dtls_error_keeps_io_kind() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let mapped = map_dtls_error(webrtc_util::Error::from(io));
        assert!(crate::error::is_transient(&mapped));
    }
}
