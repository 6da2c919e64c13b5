//! Z/IP server listener implementation
//!
//! This module accepts sessions from Z/IP clients (gateways reporting
//! unsolicited commands, or other controllers).
//!
//! # Acceptance
//! - **DTLS**: every handshake completes inside the acceptor; the session
//!   then gets its own detached driver task and the acceptor goes back to
//!   waiting for the next client.
//! - **UDP**: there is no handshake to demultiplex on, so the bound socket is
//!   served by a single session whose driver runs in the acceptor. When that
//!   driver ends the socket is bound again.

use crate::config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zwaveip_core::ZipResult;
use zwaveip_session::{ConnectionDriver, DriverExit, Role, SessionHandler};
use zwaveip_transport::{DatagramTransport, DtlsListener, Security, UdpSettings, UdpTransport};

enum Acceptor {
    Dtls(DtlsListener),
    Udp(UdpTransport),
}

/// Server listener for accepting Z/IP sessions
///
/// Every accepted session is driven with the same [`SessionHandler`]. The
/// listener stops when its cancellation token is cancelled; sessions it
/// spawned are stopped with it.
///
/// # Usage Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use zwaveip_server::{ServerConfig, ServerListener};
///
/// # async fn run(handler: Arc<dyn zwaveip_session::SessionHandler>) -> zwaveip_core::ZipResult<()> {
/// let listener = ServerListener::bind(ServerConfig::default(), handler).await?;
/// let stop = listener.shutdown_token();
/// tokio::spawn(listener.run());
/// // ...
/// stop.cancel();
/// # Ok(())
/// # }
/// ```
pub struct ServerListener {
    config: ServerConfig,
    handler: Arc<dyn SessionHandler>,
    shutdown: CancellationToken,
    local: SocketAddr,
    acceptor: Acceptor,
}

impl ServerListener {
    /// Bind the listening socket
    ///
    /// # Arguments
    /// * `config` - Listen address, protection and session timing
    /// * `handler` - Application callbacks shared by every session
    ///
    /// # Errors
    /// Returns `ZipError::Connection` if the address cannot be bound
    pub async fn bind(config: ServerConfig, handler: Arc<dyn SessionHandler>) -> ZipResult<Self> {
        let (acceptor, local) = match &config.security {
            Security::Dtls(settings) => {
                let listener = DtlsListener::bind(config.address, settings.clone()).await?;
                let local = listener.local_addr();
                (Acceptor::Dtls(listener), local)
            }
            Security::Udp => {
                let transport = Self::open_udp(&config, config.address).await?;
                let local = transport.local_addr()?;
                (Acceptor::Udp(transport), local)
            }
        };

        log::info!(
            "Z/IP server listening on {} ({})",
            local,
            if config.security.is_secure() { "DTLS" } else { "UDP" }
        );
        Ok(Self {
            config,
            handler,
            shutdown: CancellationToken::new(),
            local,
            acceptor,
        })
    }

    /// Use an externally owned stop token
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Token that stops the listener and its sessions when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn open_udp(config: &ServerConfig, address: SocketAddr) -> ZipResult<UdpTransport> {
        let settings = UdpSettings::server(address).with_send_timeout(config.send_timeout);
        UdpTransport::open(settings).await
    }

    /// Accept sessions until the stop token is cancelled
    ///
    /// Failed handshakes and fatal session errors are logged and lead to the
    /// next accept cycle.
    pub async fn run(self) -> ZipResult<()> {
        let ServerListener {
            config,
            handler,
            shutdown,
            local,
            acceptor,
        } = self;

        match acceptor {
            Acceptor::Dtls(listener) => Self::serve_dtls(listener, &config, &handler, &shutdown).await,
            Acceptor::Udp(transport) => Self::serve_udp(transport, local, &config, &handler, &shutdown).await,
        }
    }

    async fn serve_dtls(
        listener: DtlsListener,
        config: &ServerConfig,
        handler: &Arc<dyn SessionHandler>,
        shutdown: &CancellationToken,
    ) -> ZipResult<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(transport) => Self::spawn_session(transport, config, handler, shutdown),
                    Err(e) => log::warn!("Rejected DTLS client: {}", e),
                },
            }
        }

        log::info!("Z/IP server on {} stopping", listener.local_addr());
        if let Err(e) = listener.close().await {
            log::debug!("Error closing DTLS listener: {}", e);
        }
        Ok(())
    }

    fn spawn_session<T>(
        transport: T,
        config: &ServerConfig,
        handler: &Arc<dyn SessionHandler>,
        shutdown: &CancellationToken,
    ) where
        T: DatagramTransport + 'static,
    {
        let peer = transport.remote_addr();
        let (driver, _session) =
            ConnectionDriver::new(transport, handler.clone(), Role::Server, config.driver.clone());
        let stop = shutdown.child_token();
        tokio::spawn(async move {
            let exit = driver.run(stop).await;
            log::info!("Session with {:?} ended ({})", peer, exit);
        });
    }

    async fn serve_udp(
        transport: UdpTransport,
        local: SocketAddr,
        config: &ServerConfig,
        handler: &Arc<dyn SessionHandler>,
        shutdown: &CancellationToken,
    ) -> ZipResult<()> {
        let mut next = Some(transport);

        while !shutdown.is_cancelled() {
            let transport = match next.take() {
                Some(transport) => transport,
                None => match Self::open_udp(config, local).await {
                    Ok(transport) => transport,
                    Err(e) => {
                        log::error!("Failed to rebind UDP socket on {}: {}", local, e);
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(config.driver.poll_interval) => continue,
                        }
                    }
                },
            };

            let (driver, _session) =
                ConnectionDriver::new(transport, handler.clone(), Role::Server, config.driver.clone());
            match driver.run(shutdown.child_token()).await {
                DriverExit::Stopped => break,
                exit => log::info!("UDP session on {} ended ({}), rebinding", local, exit),
            }
        }

        log::info!("Z/IP server on {} stopped", local);
        Ok(())
    }
}

impl std::fmt::Debug for ServerListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerListener")
            .field("local", &self.local)
            .field("secure", &self.config.security.is_secure())
            .finish_non_exhaustive()
    }
}
