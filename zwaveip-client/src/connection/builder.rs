//! Client builder
//!
//! Collects the gateway address, transport protection and timing, then
//! either produces a [`ClientConfig`] or starts a [`ZipClient`] directly.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zwaveip_client::ClientBuilder;
//! use zwaveip_core::Psk;
//!
//! # async fn run(handler: Arc<dyn zwaveip_session::SessionHandler>) -> zwaveip_core::ZipResult<()> {
//! // DTLS to the default port 41230
//! let client = ClientBuilder::new()
//!     .address("192.168.1.10")
//!     .dtls(Psk::from_hex("123456789012345678901234567890AA")?)
//!     .connect(handler)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use super::client::ZipClient;
use super::config::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use zwaveip_core::{Psk, ZipError, ZipResult};
use zwaveip_session::{DriverConfig, SessionHandler};
use zwaveip_transport::{DtlsSettings, Security};

/// Builder for client connections
///
/// # Default Settings
/// - Security: plain UDP
/// - UDP send timeout: 2 seconds
/// - Driver: 100 ms poll, 30 s keep-alive
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    address: Option<String>,
    security: Security,
    send_timeout: Duration,
    driver: DriverConfig,
}

impl ClientBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self {
            address: None,
            security: Security::Udp,
            send_timeout: Duration::from_secs(2),
            driver: DriverConfig::default(),
        }
    }

    /// Set the gateway address
    ///
    /// # Arguments
    /// * `address` - Socket address, bare IP or host name; the port defaults
    ///   to 4123 for UDP and 41230 for DTLS
    ///
    /// # Returns
    /// Self for method chaining
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Use plain UDP
    ///
    /// # Returns
    /// Self for method chaining
    pub fn udp(mut self) -> Self {
        self.security = Security::Udp;
        self
    }

    /// Use DTLS with `psk` and default DTLS settings
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dtls(mut self, psk: Psk) -> Self {
        self.security = Security::Dtls(DtlsSettings::new(psk));
        self
    }

    /// Use DTLS with fully specified settings
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dtls_settings(mut self, settings: DtlsSettings) -> Self {
        self.security = Security::Dtls(settings);
        self
    }

    /// Set the upper bound on a single UDP send
    ///
    /// # Returns
    /// Self for method chaining
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Replace the driver timing
    ///
    /// # Returns
    /// Self for method chaining
    pub fn driver_config(mut self, config: DriverConfig) -> Self {
        self.driver = config;
        self
    }

    /// Set the inactivity interval after which a DTLS client sends a keep-alive
    ///
    /// # Returns
    /// Self for method chaining
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.driver.keep_alive_interval = interval;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Returns `ZipError::Config` if no address was set
    pub fn build(self) -> ZipResult<ClientConfig> {
        let address = self
            .address
            .ok_or_else(|| ZipError::Config("Gateway address not configured".to_string()))?;
        Ok(ClientConfig {
            address,
            security: self.security,
            send_timeout: self.send_timeout,
            driver: self.driver,
        })
    }

    /// Build the configuration and start a client with it
    pub async fn connect(self, handler: Arc<dyn SessionHandler>) -> ZipResult<ZipClient> {
        ZipClient::start(self.build()?, handler).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_address() {
        let result = ClientBuilder::new().build();
        assert!(matches!(result, Err(ZipError::Config(_))));
    }

    #[test]
    fn test_build_dtls() {
        let config = ClientBuilder::new()
            .address("gateway.local")
            .dtls(Psk::default())
            .keep_alive_interval(Duration::from_secs(10))
            .build()
            .unwrap();

        assert_eq!(config.address, "gateway.local");
        assert!(config.security.is_secure());
        assert_eq!(config.driver.keep_alive_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_last_security_choice_wins() {
        let config = ClientBuilder::new()
            .address("10.0.0.1")
            .dtls(Psk::default())
            .udp()
            .build()
            .unwrap();
        assert!(!config.security.is_secure());
    }
}
