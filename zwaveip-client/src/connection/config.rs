//! Client connection configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use zwaveip_core::{ZipError, ZipResult};
use zwaveip_session::DriverConfig;
use zwaveip_transport::Security;

/// Configuration of a single client connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway address: a socket address, a bare IP or a host name, with or without port
    pub address: String,
    /// Transport protection
    pub security: Security,
    /// Upper bound on a single UDP send
    pub send_timeout: Duration,
    /// Driver timing
    pub driver: DriverConfig,
}

impl ClientConfig {
    /// Create a configuration for `address` with the given protection
    pub fn new(address: impl Into<String>, security: Security) -> Self {
        Self {
            address: address.into(),
            security,
            send_timeout: Duration::from_secs(2),
            driver: DriverConfig::default(),
        }
    }

    /// Copy of this configuration pointed at another gateway
    pub fn with_address(&self, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..self.clone()
        }
    }

    /// Resolve the configured address to a socket address
    pub async fn remote_addr(&self) -> ZipResult<SocketAddr> {
        resolve(&self.address, self.security.default_port()).await
    }
}

/// Resolve a gateway address
///
/// Accepts `"192.168.1.10:4123"`, `"[fd00::1]:41230"`, a bare IP such as
/// `"fd00::1"`, or a host name with or without a port. The default port is
/// used whenever the address does not carry one.
///
/// # Errors
/// Returns `ZipError::Config` if the name does not resolve to any address.
pub async fn resolve(address: &str, default_port: u16) -> ZipResult<SocketAddr> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ZipError::Config("Empty gateway address".to_string()));
    }
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    let query = if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:{}", address, default_port)
    };
    let mut candidates = tokio::net::lookup_host(query.as_str())
        .await
        .map_err(|e| ZipError::Config(format!("Cannot resolve {}: {}", address, e)))?;
    candidates
        .next()
        .ok_or_else(|| ZipError::Config(format!("No address found for {}", address)))
}
