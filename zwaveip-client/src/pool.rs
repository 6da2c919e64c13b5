//! Bounded pool of client connections
//!
//! Applications that talk to several gateways keep one client per address.
//! The pool holds at most `capacity` clients. When a new address needs a slot
//! and the pool is full, the oldest client that has no transmission in
//! progress is stopped to make room; if every client is busy the request is
//! refused with `ZipError::Busy`.
//!
//! The pool lock only guards the entry list. No session lock is taken and no
//! client is stopped while it is held: the entries of interest are copied
//! out, the lock is released, and only then are the sessions consulted.

use crate::connection::{ClientConfig, ZipClient};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use zwaveip_core::{ZipError, ZipResult};
use zwaveip_session::{Endpoints, SessionHandle, SessionHandler, Transmission};

/// Default number of concurrent client sessions
pub const DEFAULT_POOL_CAPACITY: usize = 4;

struct PoolEntry {
    address: String,
    client: ZipClient,
}

/// Pool of client connections keyed by gateway address
pub struct ClientPool {
    config: ClientConfig,
    handler: Arc<dyn SessionHandler>,
    capacity: usize,
    entries: Mutex<Vec<PoolEntry>>,
}

impl ClientPool {
    /// Create a pool with the default capacity
    ///
    /// # Arguments
    /// * `config` - Template for new clients; its address is replaced per entry
    /// * `handler` - Shared by every session of the pool
    pub fn new(config: ClientConfig, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            config,
            handler,
            capacity: DEFAULT_POOL_CAPACITY,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Change the capacity (at least one)
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Addresses currently held, oldest first
    pub fn addresses(&self) -> Vec<String> {
        self.lock().iter().map(|entry| entry.address.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PoolEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session for `address` if a live client exists
    ///
    /// A client whose driver has exited is removed on the way.
    pub fn get(&self, address: &str) -> Option<SessionHandle> {
        let mut entries = self.lock();
        let index = entries.iter().position(|entry| entry.address == address)?;
        if entries[index].client.is_running() {
            return Some(entries[index].client.session().clone());
        }
        let dead = entries.remove(index);
        drop(entries);
        log::debug!("Dropping stopped client for {}", dead.address);
        None
    }

    /// Session for `address`, connecting a new client if needed
    ///
    /// # Errors
    /// - `ZipError::Busy` if the pool is full and every client is busy
    /// - any error from [`ZipClient::start`]
    pub async fn session(&self, address: &str) -> ZipResult<SessionHandle> {
        if let Some(session) = self.get(address) {
            return Ok(session);
        }

        if self.len() >= self.capacity {
            if let Some(victim) = self.evict_idle()? {
                log::info!("Client pool full, stopping client for {}", victim.address);
                if let Err(e) = victim.client.stop().await {
                    log::warn!("Error stopping client for {}: {}", victim.address, e);
                }
            }
        }

        let client = ZipClient::start(self.config.with_address(address), self.handler.clone()).await?;
        let session = client.session().clone();

        let rejected = {
            let mut entries = self.lock();
            if let Some(existing) = entries.iter().find(|entry| entry.address == address) {
                Some((client, Ok(existing.client.session().clone())))
            } else if entries.len() >= self.capacity {
                Some((client, Err(ZipError::Busy)))
            } else {
                entries.push(PoolEntry {
                    address: address.to_string(),
                    client,
                });
                None
            }
        };

        match rejected {
            Some((client, result)) => {
                if let Err(e) = client.stop().await {
                    log::debug!("Error stopping surplus client for {}: {}", address, e);
                }
                result
            }
            None => Ok(session),
        }
    }

    /// Remove the oldest idle client
    ///
    /// # Returns
    /// `Ok(None)` if a slot freed up concurrently, the removed entry otherwise
    fn evict_idle(&self) -> ZipResult<Option<PoolEntry>> {
        let snapshot: Vec<(String, SessionHandle)> = self
            .lock()
            .iter()
            .map(|entry| (entry.address.clone(), entry.client.session().clone()))
            .collect();

        let victim = snapshot
            .into_iter()
            .find(|(_, session)| !session.is_busy())
            .map(|(address, _)| address)
            .ok_or(ZipError::Busy)?;

        let mut entries = self.lock();
        if entries.len() < self.capacity {
            return Ok(None);
        }
        match entries.iter().position(|entry| entry.address == victim) {
            Some(index) => Ok(Some(entries.remove(index))),
            None => Ok(None),
        }
    }

    /// Send a command to the gateway at `address`
    ///
    /// # Arguments
    /// * `address` - Gateway address, used as the pool key
    /// * `payload` - Z-Wave command
    /// * `endpoints` - Explicit endpoints, or `None` for the session's current ones
    /// * `response_expected` - Whether the command solicits a report
    ///
    /// # Errors
    /// - `ZipError::Busy` if the gateway's session is busy or no slot can be freed
    /// - connection errors if a new client cannot be started
    pub async fn send(
        &self,
        address: &str,
        payload: &[u8],
        endpoints: Option<Endpoints>,
        response_expected: bool,
    ) -> ZipResult<Transmission> {
        let session = self.session(address).await?;
        match endpoints {
            Some(endpoints) => session.send(payload, endpoints, response_expected),
            None => session.send_command(payload, response_expected),
        }
    }

    /// Stop the client for `address`
    ///
    /// # Returns
    /// `true` if a client was held for the address
    pub async fn stop(&self, address: &str) -> bool {
        let removed = {
            let mut entries = self.lock();
            entries
                .iter()
                .position(|entry| entry.address == address)
                .map(|index| entries.remove(index))
        };
        match removed {
            Some(entry) => {
                if let Err(e) = entry.client.stop().await {
                    log::warn!("Error stopping client for {}: {}", entry.address, e);
                }
                true
            }
            None => false,
        }
    }

    /// Stop the held clients
    ///
    /// # Arguments
    /// * `stop_busy` - Also stop clients with a transmission in progress;
    ///   those transmissions complete with `NotOk`
    ///
    /// # Returns
    /// The number of clients stopped
    pub async fn stop_all(&self, stop_busy: bool) -> usize {
        let snapshot: Vec<(String, SessionHandle)> = self
            .lock()
            .iter()
            .map(|entry| (entry.address.clone(), entry.client.session().clone()))
            .collect();

        let selected: Vec<String> = snapshot
            .into_iter()
            .filter(|(_, session)| stop_busy || !session.is_busy())
            .map(|(address, _)| address)
            .collect();

        let mut stopped = 0;
        for address in selected {
            if self.stop(&address).await {
                stopped += 1;
            }
        }
        log::info!("Stopped {} pooled client(s)", stopped);
        stopped
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("capacity", &self.capacity)
            .field("addresses", &self.addresses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Security;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use zwaveip_session::TransmitStatus;

    struct Quiet;

    impl SessionHandler for Quiet {
        fn on_application_command(&self, _session: &SessionHandle, _payload: &[u8]) {}
    }

    async fn gateway() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap().to_string();
        (socket, address)
    }

    /// Gateway that parks every command in its mailbox (NACK+WAIT)
    async fn waiting_gateway() -> String {
        let (socket, address) = gateway().await;
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                if n >= 7 && buf[0] == 0x23 && buf[1] == 0x02 && buf[2] & 0x80 != 0 {
                    let wait = [0x23, 0x02, 0x30, 0x00, buf[4], buf[6], buf[5]];
                    let _ = socket.send_to(&wait, from).await;
                }
            }
        });
        address
    }

    fn pool(capacity: usize) -> ClientPool {
        let config = ClientConfig::new("", Security::Udp);
        ClientPool::new(config, Arc::new(Quiet)).with_capacity(capacity)
    }

    #[tokio::test]
    async fn test_same_address_reuses_session() {
        let (_gw, address) = gateway().await;
        let pool = pool(2);

        let first = pool.session(&address).await.unwrap();
        let second = pool.session(&address).await.unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(pool.len(), 1);

        assert_eq!(pool.stop_all(true).await, 1);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_full_pool_evicts_oldest_idle() {
        let (_a, addr_a) = gateway().await;
        let (_b, addr_b) = gateway().await;
        let (_c, addr_c) = gateway().await;
        let pool = pool(2);

        let a = pool.session(&addr_a).await.unwrap();
        pool.session(&addr_b).await.unwrap();
        pool.session(&addr_c).await.unwrap();

        assert_eq!(pool.addresses(), vec![addr_b.clone(), addr_c.clone()]);
        assert!(!a.is_connected());

        pool.stop_all(true).await;
    }

    #[tokio::test]
    async fn test_full_pool_of_busy_sessions_refuses() {
        let addr_a = waiting_gateway().await;
        let addr_b = waiting_gateway().await;
        let (_c, addr_c) = gateway().await;
        let pool = pool(2);

        let mut a = pool.send(&addr_a, &[0x20, 0x02], None, false).await.unwrap();
        let mut b = pool.send(&addr_b, &[0x20, 0x02], None, false).await.unwrap();
        assert_eq!(a.next_status().await, Some(TransmitStatus::Wait));
        assert_eq!(b.next_status().await, Some(TransmitStatus::Wait));

        // Mailboxed commands hold their sessions well past the 400 ms ACK budget
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(pool.get(&addr_a).is_some_and(|s| s.is_busy()));

        let result = pool.session(&addr_c).await;
        assert!(matches!(result, Err(ZipError::Busy)));
        assert_eq!(pool.len(), 2);

        // Busy sessions survive a gentle stop
        assert_eq!(pool.stop_all(false).await, 0);
        assert_eq!(pool.stop_all(true).await, 2);
        assert_eq!(a.completion().await, TransmitStatus::NotOk);
        assert_eq!(b.completion().await, TransmitStatus::NotOk);
    }

    #[tokio::test]
    async fn test_send_to_busy_session_is_busy() {
        let address = waiting_gateway().await;
        let pool = pool(4);

        let mut first = pool.send(&address, &[0x20, 0x02], None, false).await.unwrap();
        assert_eq!(first.next_status().await, Some(TransmitStatus::Wait));
        let second = pool.send(&address, &[0x20, 0x02], None, false).await;
        assert!(matches!(second, Err(ZipError::Busy)));

        pool.stop_all(true).await;
    }
}
