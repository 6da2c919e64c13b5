//! Transport layer module for Z/IP
//!
//! This crate provides the datagram transports Z/IP frames travel over:
//! plain UDP and DTLS with a pre-shared key.

pub mod datagram;
pub mod dtls;
pub mod error;
pub mod security;
pub mod udp;

pub use datagram::{unspecified_for, DatagramTransport, RecvOutcome, MAX_DATAGRAM_SIZE};
pub use dtls::{DtlsListener, DtlsSettings, DtlsTransport, PskCipherSuite};
pub use error::{is_transient, is_transient_kind, ZipError, ZipResult};
pub use security::Security;
pub use udp::{UdpSettings, UdpTransport};
