//! Session layer module for Z/IP
//!
//! This crate provides the Z/IP wire codec, the acknowledgement state
//! machine of a session and the connection driver that runs it over a
//! datagram transport.

pub mod driver;
pub mod handle;
pub mod packet;
pub mod session;
pub mod state;
pub mod statistics;

pub use driver::{ConnectionDriver, DriverConfig, DriverExit, Role};
pub use handle::{SessionHandle, SessionHandler, Transmission};
pub use packet::{ImaData, Packet, ZipHeader, ZipPacket, MAX_FRAME_SIZE};
pub use session::{Endpoints, ZipSession, ACK_TIMEOUT_MS, DEFAULT_EXPECTED_DELAY, WAIT_TIMEOUT_MS};
pub use state::{SessionState, TransmitStatus};
pub use statistics::SessionStatistics;
pub use zwaveip_core::{ZipError, ZipResult};
