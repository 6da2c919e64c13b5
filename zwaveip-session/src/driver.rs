//! Connection driver
//!
//! One driver task runs per connection. It owns the transport and multiplexes
//! four event sources with `tokio::select!`: the stop token, frames queued by
//! [`SessionHandle::send`], datagrams from the peer and a periodic tick.
//!
//! # Timing
//! - the acknowledgement countdown advances on every poll interval (100 ms)
//! - secured clients send a keep-alive after 30 s without received data
//! - secured server sessions end after 25 minutes without received data;
//!   unsecured server sessions and all client sessions never idle out

use crate::handle::{SessionHandle, SessionHandler};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use zwaveip_core::ZipError;
use zwaveip_transport::{is_transient, DatagramTransport, RecvOutcome, MAX_DATAGRAM_SIZE};

/// Side of the connection a driver serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Connection opened by this side, normally towards a gateway
    Client,
    /// Connection accepted by a listener
    Server,
}

/// Connection driver timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Bounded receive and tick interval
    pub poll_interval: Duration,
    /// Inactivity after which a secured client sends a keep-alive
    pub keep_alive_interval: Duration,
    /// Inactivity after which a secured server session ends
    pub idle_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            keep_alive_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(25 * 60),
        }
    }
}

/// Why a driver stopped
#[derive(Debug)]
pub enum DriverExit {
    /// The stop token was cancelled
    Stopped,
    /// No data arrived within the idle budget
    IdleTimeout,
    /// The transport failed
    Fatal(ZipError),
}

impl fmt::Display for DriverExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverExit::Stopped => f.write_str("stopped"),
            DriverExit::IdleTimeout => f.write_str("idle timeout"),
            DriverExit::Fatal(e) => write!(f, "fatal transport error: {}", e),
        }
    }
}

/// Per-connection I/O loop
pub struct ConnectionDriver<T: DatagramTransport> {
    transport: T,
    session: SessionHandle,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    role: Role,
    config: DriverConfig,
}

impl<T: DatagramTransport> ConnectionDriver<T> {
    /// Create a driver and the handle of its session
    ///
    /// # Arguments
    /// * `transport` - Connected transport; the driver takes ownership
    /// * `handler` - Application callbacks
    /// * `role` - Whether this side opened or accepted the connection
    /// * `config` - Timing parameters
    pub fn new(
        transport: T,
        handler: Arc<dyn SessionHandler>,
        role: Role,
        config: DriverConfig,
    ) -> (Self, SessionHandle) {
        let (session, outbound) = SessionHandle::new(handler, transport.remote_addr());
        let driver = Self {
            transport,
            session: session.clone(),
            outbound,
            role,
            config,
        };
        (driver, session)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn sends_keep_alives(&self) -> bool {
        self.role == Role::Client && self.transport.is_secure()
    }

    fn idles_out(&self) -> bool {
        self.role == Role::Server && self.transport.is_secure()
    }

    /// Run until stopped, idle or failed
    ///
    /// On every exit path the queued frames are discarded, the in-flight
    /// transmission completes with `NotOk`, and the transport is closed.
    pub async fn run(mut self, shutdown: CancellationToken) -> DriverExit {
        log::debug!(
            "Connection driver started ({:?}, {}, peer {:?})",
            self.role,
            if self.transport.is_secure() { "DTLS" } else { "UDP" },
            self.transport.remote_addr()
        );

        let exit = self.poll_loop(&shutdown).await;

        self.outbound.close();
        self.session.shutdown();
        if let Err(e) = self.transport.close().await {
            log::debug!("Error while closing transport: {}", e);
        }

        match &exit {
            DriverExit::Fatal(e) => log::error!("Connection driver exited: {}", e),
            other => log::info!("Connection driver exited: {}", other),
        }
        exit
    }

    async fn poll_loop(&mut self, shutdown: &CancellationToken) -> DriverExit {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_tick = Instant::now();
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return DriverExit::Stopped,

                Some(frame) = self.outbound.recv() => {
                    if let Err(e) = self.write(&frame).await {
                        return DriverExit::Fatal(e);
                    }
                }

                // Polled before receives; a steady stream of datagrams must not hold off ticks
                now = ticker.tick() => {
                    let elapsed = now.saturating_duration_since(last_tick);
                    last_tick = now;
                    self.session.tick(u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX));

                    let idle = now.saturating_duration_since(last_activity);
                    if self.sends_keep_alives() && idle >= self.config.keep_alive_interval {
                        log::trace!("Sending keep-alive");
                        let frame = self.session.keep_alive_frame();
                        if let Err(e) = self.write(&frame).await {
                            return DriverExit::Fatal(e);
                        }
                        last_activity = now;
                    }
                    if self.idles_out() && idle >= self.config.idle_timeout {
                        return DriverExit::IdleTimeout;
                    }
                }

                outcome = self.transport.recv(&mut buf, self.config.poll_interval) => match outcome {
                    RecvOutcome::Data(n) => {
                        last_activity = Instant::now();
                        self.session.set_remote_addr(self.transport.remote_addr());
                        let (reply, delivery) = self.session.receive(&buf[..n]);
                        if let Some(reply) = reply {
                            if let Err(e) = self.write(&reply).await {
                                return DriverExit::Fatal(e);
                            }
                        }
                        self.session.deliver(delivery);
                    }
                    RecvOutcome::NoData => {}
                    RecvOutcome::Retry(e) => log::debug!("Transient receive error: {}", e),
                    RecvOutcome::Fatal(e) => return DriverExit::Fatal(e),
                },
            }
        }
    }

    /// Write a frame, swallowing transient errors
    async fn write(&self, frame: &[u8]) -> Result<(), ZipError> {
        match self.transport.send(frame).await {
            Ok(()) => {
                log::trace!("Sent {} byte frame", frame.len());
                Ok(())
            }
            Err(e) if is_transient(&e) => {
                log::debug!("Transient send error: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
