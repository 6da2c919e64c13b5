//! Shared session handle
//!
//! A [`SessionHandle`] is the application's view of one connection. Every
//! operation takes the per-session lock, so a timeout expiring in the driver
//! and an ACK arriving at the same moment cannot both complete a
//! transmission: whichever takes the lock first settles it and the other
//! finds the session idle.
//!
//! Frames produced by `send` are queued to the connection driver, which owns
//! the transport. Handler callbacks always run after the lock is released.

use crate::packet::ImaData;
use crate::session::{Endpoints, ZipSession};
use crate::state::{SessionState, TransmitStatus};
use crate::statistics::SessionStatistics;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};
use zwaveip_core::{ZipError, ZipResult};

/// Application callbacks of a session
///
/// Callbacks are invoked from the connection driver task and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait SessionHandler: Send + Sync + 'static {
    /// A Z-Wave command arrived embedded in a Z/IP packet
    fn on_application_command(&self, session: &SessionHandle, payload: &[u8]);

    /// An accepted transmission progressed
    ///
    /// Called exactly once with a terminal status per accepted send,
    /// possibly preceded by `Wait`.
    fn on_transmit_done(&self, _session: &SessionHandle, _status: TransmitStatus) {}
}

/// Status stream of one accepted transmission
///
/// Returned by [`SessionHandle::send`]. Dropping it does not cancel the
/// transmission; the handler is still notified.
#[derive(Debug)]
pub struct Transmission {
    seq: u8,
    statuses: mpsc::UnboundedReceiver<TransmitStatus>,
}

impl Transmission {
    /// Sequence number the command was sent with
    pub fn sequence(&self) -> u8 {
        self.seq
    }

    /// Wait for the next status, `None` once the terminal status was taken
    pub async fn next_status(&mut self) -> Option<TransmitStatus> {
        self.statuses.recv().await
    }

    /// Wait for the terminal status, skipping `Wait`
    ///
    /// Resolves to `NotOk` if the session is torn down without settling the
    /// transmission.
    pub async fn completion(mut self) -> TransmitStatus {
        while let Some(status) = self.statuses.recv().await {
            if status.is_terminal() {
                return status;
            }
        }
        TransmitStatus::NotOk
    }
}

type StatusSender = mpsc::UnboundedSender<TransmitStatus>;

/// Deferred side effects of a received datagram
///
/// Produced under the lock, delivered after the reply frame is written.
#[derive(Default)]
pub(crate) struct Delivery {
    status: Option<(TransmitStatus, Option<StatusSender>)>,
    command: Option<Bytes>,
}

struct Core {
    session: ZipSession,
    pending: Option<StatusSender>,
    remote_addr: Option<SocketAddr>,
}

impl Core {
    /// Pair a status with the channel of the in-flight transmission
    fn route(&mut self, status: TransmitStatus) -> (TransmitStatus, Option<StatusSender>) {
        let sender = if status.is_terminal() {
            self.pending.take()
        } else {
            self.pending.clone()
        };
        (status, sender)
    }
}

struct Inner {
    core: Mutex<Core>,
    outbound: mpsc::UnboundedSender<Bytes>,
    handler: Arc<dyn SessionHandler>,
    idle: Notify,
    connected: AtomicBool,
    user_context: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

/// Cloneable handle to a Z/IP session
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    /// Create a session whose outbound frames appear on the returned receiver
    pub(crate) fn new(
        handler: Arc<dyn SessionHandler>,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, frames) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    session: ZipSession::new(),
                    pending: None,
                    remote_addr,
                }),
                outbound,
                handler,
                idle: Notify::new(),
                connected: AtomicBool::new(true),
                user_context: Mutex::new(None),
            }),
        };
        (handle, frames)
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a Z-Wave command to the given endpoints
    ///
    /// # Arguments
    /// * `payload` - Z-Wave command, starting with its command class
    /// * `endpoints` - Local and remote multi-channel endpoints
    /// * `response_expected` - Whether the command solicits a report
    ///
    /// # Returns
    /// The [`Transmission`] carrying the completion status
    ///
    /// # Errors
    /// * `ZipError::Busy` - Another transmission is in progress
    /// * `ZipError::ConnectionClosed` - The connection driver has exited
    /// * `ZipError::InvalidData` - The payload is empty or too large
    pub fn send(&self, payload: &[u8], endpoints: Endpoints, response_expected: bool) -> ZipResult<Transmission> {
        self.start(payload, Some(endpoints), response_expected)
    }

    /// Send a Z-Wave command to the current endpoints
    ///
    /// See [`set_remote_endpoint`](Self::set_remote_endpoint).
    pub fn send_command(&self, payload: &[u8], response_expected: bool) -> ZipResult<Transmission> {
        self.start(payload, None, response_expected)
    }

    fn start(&self, payload: &[u8], endpoints: Option<Endpoints>, response_expected: bool) -> ZipResult<Transmission> {
        if !self.is_connected() || self.inner.outbound.is_closed() {
            return Err(ZipError::ConnectionClosed);
        }

        let mut core = self.lock();
        let frame = core.session.prepare_send(payload, endpoints, response_expected)?;
        let seq = core.session.sequence();

        if self.inner.outbound.send(frame).is_err() {
            core.session.abort();
            return Err(ZipError::ConnectionClosed);
        }

        let (sender, statuses) = mpsc::unbounded_channel();
        core.pending = Some(sender);
        Ok(Transmission { seq, statuses })
    }

    /// Wait until no transmission is in progress
    ///
    /// Returns immediately if the session is idle.
    pub async fn wait_for_transmission(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    /// Check if a transmission is in progress
    pub fn is_busy(&self) -> bool {
        self.lock().session.is_busy()
    }

    pub fn state(&self) -> SessionState {
        self.lock().session.state()
    }

    /// Check if the connection driver is still running
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Seconds the peer asked to wait, from the last Z/IP packet
    pub fn expected_delay(&self) -> u32 {
        self.lock().session.expected_delay()
    }

    /// Installation and maintenance data last reported by the peer
    pub fn ima(&self) -> ImaData {
        self.lock().session.ima()
    }

    /// Encapsulation format info from the last Z/IP packet
    pub fn encapsulation(&self) -> (u8, u8) {
        self.lock().session.encapsulation()
    }

    pub fn endpoints(&self) -> Endpoints {
        self.lock().session.endpoints()
    }

    /// Set the endpoint used by [`send_command`](Self::send_command)
    pub fn set_remote_endpoint(&self, endpoint: u8) {
        self.lock().session.set_remote_endpoint(endpoint);
    }

    pub fn statistics(&self) -> SessionStatistics {
        self.lock().session.statistics().clone()
    }

    /// Address of the peer, if known
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.lock().remote_addr
    }

    /// Attach an application value to the session
    pub fn set_user_context(&self, context: Arc<dyn Any + Send + Sync>) {
        *self
            .inner
            .user_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(context);
    }

    pub fn user_context(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner
            .user_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The attached application value, if it has type `T`
    pub fn user_context_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.user_context().and_then(|ctx| ctx.downcast::<T>().ok())
    }

    /// Check if two handles refer to the same session
    pub fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_remote_addr(&self, addr: Option<SocketAddr>) {
        if addr.is_some() {
            self.lock().remote_addr = addr;
        }
    }

    /// Feed a datagram to the session
    ///
    /// Returns the reply to write before calling [`deliver`](Self::deliver).
    pub(crate) fn receive(&self, raw: &[u8]) -> (Option<Bytes>, Delivery) {
        let mut core = self.lock();
        let outcome = core.session.handle_datagram(raw);
        let status = outcome.status.map(|status| core.route(status));
        (
            outcome.reply,
            Delivery {
                status,
                command: outcome.command,
            },
        )
    }

    /// Run the callbacks of a received datagram
    pub(crate) fn deliver(&self, delivery: Delivery) {
        if let Some((status, sender)) = delivery.status {
            self.complete(status, sender);
        }
        if let Some(command) = delivery.command {
            log::trace!("Delivering {} byte command", command.len());
            self.inner.handler.on_application_command(self, &command);
        }
    }

    /// Advance the acknowledgement countdown by `elapsed_ms`
    pub(crate) fn tick(&self, elapsed_ms: u32) {
        let routed = {
            let mut core = self.lock();
            core.session.tick(elapsed_ms).map(|status| core.route(status))
        };
        if let Some((status, sender)) = routed {
            self.complete(status, sender);
        }
    }

    pub(crate) fn keep_alive_frame(&self) -> Bytes {
        self.lock().session.keep_alive()
    }

    /// Mark the connection gone and fail any in-flight transmission
    pub(crate) fn shutdown(&self) {
        self.inner.connected.store(false, Ordering::Release);
        let routed = {
            let mut core = self.lock();
            core.session.abort().map(|status| core.route(status))
        };
        if let Some((status, sender)) = routed {
            self.complete(status, sender);
        }
        self.inner.idle.notify_waiters();
    }

    fn complete(&self, status: TransmitStatus, sender: Option<StatusSender>) {
        log::debug!("Transmission completed with status {}", status);
        if let Some(sender) = sender {
            let _ = sender.send(status);
        }
        if status.is_terminal() {
            self.inner.idle.notify_waiters();
        }
        self.inner.handler.on_transmit_done(self, status);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.lock();
        f.debug_struct("SessionHandle")
            .field("state", &core.session.state())
            .field("sequence", &core.session.sequence())
            .field("remote_addr", &core.remote_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
