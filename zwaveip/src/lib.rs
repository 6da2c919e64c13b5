//! zwaveip - Rust implementation of the Z/IP transport and session layer
//!
//! Z/IP carries Z-Wave commands between an application and a Z/IP gateway
//! over UDP or DTLS, with acknowledgements, timeouts, keep-alives and
//! variable-length header extensions.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `zwaveip-core`: Error types, pre-shared keys, protocol constants
//! - `zwaveip-transport`: Datagram transports (UDP, DTLS)
//! - `zwaveip-session`: Wire codec, session state machine, connection driver
//! - `zwaveip-client`: Client connections and the client pool
//! - `zwaveip-server`: Server listener
//!
//! # Usage
//!
//! ```no_run
//! use zwaveip::client::ClientBuilder;
//! use zwaveip::server::ServerListener;
//! ```

// Re-export core types
pub use zwaveip_core::{Psk, ZipError, ZipResult, DEFAULT_PSK, ZGW_DTLS_PORT, ZGW_UDP_PORT};

// Re-export the session API shared by clients and servers
pub use zwaveip_session::{
    Endpoints, ImaData, SessionHandle, SessionHandler, SessionState, SessionStatistics, Transmission,
    TransmitStatus,
};

// Re-export transport configuration
pub mod transport {
    pub use zwaveip_transport::*;
}

// Re-export session internals (codec, driver)
pub mod session {
    pub use zwaveip_session::*;
}

// Re-export client API
pub mod client {
    pub use zwaveip_client::*;
}

// Re-export server API
pub mod server {
    pub use zwaveip_server::*;
}
