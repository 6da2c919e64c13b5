//! Server configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use zwaveip_session::DriverConfig;
use zwaveip_transport::Security;

/// Server listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Local address to listen on
    pub address: SocketAddr,
    /// Transport protection
    pub security: Security,
    /// Upper bound on a single UDP send
    pub send_timeout: Duration,
    /// Driver timing of every accepted session
    pub driver: DriverConfig,
}

impl ServerConfig {
    /// Listen on all IPv4 interfaces at the default port for `security`
    pub fn new(security: Security) -> Self {
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), security.default_port());
        Self {
            address,
            security,
            send_timeout: Duration::from_secs(5),
            driver: DriverConfig::default(),
        }
    }

    /// Set the listen address
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = address;
        self
    }

    /// Replace the driver timing
    pub fn with_driver_config(mut self, driver: DriverConfig) -> Self {
        self.driver = driver;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Security::Udp)
    }
}
