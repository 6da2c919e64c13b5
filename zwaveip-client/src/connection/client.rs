//! Client connection to a Z/IP gateway

use super::config::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zwaveip_core::{ZipError, ZipResult};
use zwaveip_session::{
    ConnectionDriver, DriverConfig, DriverExit, Endpoints, Role, SessionHandle, SessionHandler,
    Transmission,
};
use zwaveip_transport::{DatagramTransport, DtlsTransport, Security, UdpSettings, UdpTransport};

/// A running client connection
///
/// Owns the background driver task of one session. Dropping the client stops
/// the driver; [`stop`](ZipClient::stop) does the same and waits for it.
///
/// # Lifecycle
/// 1. [`start`](ZipClient::start) resolves the address, opens the transport
///    (completing the DTLS handshake if configured) and spawns the driver
/// 2. commands go out through [`send`](ZipClient::send) or the session handle
/// 3. [`stop`](ZipClient::stop) cancels the driver; an in-flight transmission
///    completes with `NotOk`
#[derive(Debug)]
pub struct ZipClient {
    session: SessionHandle,
    remote: SocketAddr,
    secure: bool,
    shutdown: CancellationToken,
    task: Option<JoinHandle<DriverExit>>,
}

impl ZipClient {
    /// Connect to a gateway and start the connection driver
    ///
    /// # Arguments
    /// * `config` - Address, protection and timing
    /// * `handler` - Receives application commands and transmission results
    ///
    /// # Errors
    /// - `ZipError::Config` if the address does not resolve
    /// - `ZipError::Connection` if the socket cannot be opened
    /// - `ZipError::Handshake` if the DTLS handshake fails or times out
    pub async fn start(config: ClientConfig, handler: Arc<dyn SessionHandler>) -> ZipResult<Self> {
        let remote = config.remote_addr().await?;
        log::info!(
            "Connecting to Z/IP gateway {} ({})",
            remote,
            if config.security.is_secure() { "DTLS" } else { "UDP" }
        );

        match &config.security {
            Security::Dtls(settings) => {
                let transport = DtlsTransport::connect(remote, settings.clone()).await?;
                Ok(Self::spawn(transport, handler, config.driver.clone(), remote))
            }
            Security::Udp => {
                let settings = UdpSettings::client(remote).with_send_timeout(config.send_timeout);
                let transport = UdpTransport::open(settings).await?;
                Ok(Self::spawn(transport, handler, config.driver.clone(), remote))
            }
        }
    }

    fn spawn<T>(transport: T, handler: Arc<dyn SessionHandler>, config: DriverConfig, remote: SocketAddr) -> Self
    where
        T: DatagramTransport + 'static,
    {
        let secure = transport.is_secure();
        let (driver, session) = ConnectionDriver::new(transport, handler, Role::Client, config);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(driver.run(shutdown.clone()));
        Self {
            session,
            remote,
            secure,
            shutdown,
            task: Some(task),
        }
    }

    /// Handle of the client's session
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Check if the driver is still serving the connection
    pub fn is_running(&self) -> bool {
        self.session.is_connected() && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Send a command with explicit endpoints
    ///
    /// See [`SessionHandle::send`].
    pub fn send(&self, payload: &[u8], endpoints: Endpoints, response_expected: bool) -> ZipResult<Transmission> {
        self.session.send(payload, endpoints, response_expected)
    }

    /// Send a command using the session's current endpoints
    pub fn send_command(&self, payload: &[u8], response_expected: bool) -> ZipResult<Transmission> {
        self.session.send_command(payload, response_expected)
    }

    /// Stop the driver and wait for it to exit
    ///
    /// # Returns
    /// Why the driver exited; `DriverExit::Stopped` unless it had already
    /// ended on its own
    pub async fn stop(mut self) -> ZipResult<DriverExit> {
        self.shutdown.cancel();
        let Some(task) = self.task.take() else {
            return Ok(DriverExit::Stopped);
        };
        let exit = task
            .await
            .map_err(|e| ZipError::Connection(std::io::Error::other(format!("Driver task failed: {}", e))))?;
        log::debug!("Client for {} stopped ({})", self.remote, exit);
        Ok(exit)
    }
}

impl Drop for ZipClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
