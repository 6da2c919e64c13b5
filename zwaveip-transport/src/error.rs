//! Error classification for datagram transports
//!
//! Socket errors fall into two groups. Transient ones (an interrupted call,
//! ICMP host-down or connection-reset noise, a firewall refusing a single
//! packet) leave the session usable and the read loop simply polls again.
//! Everything else terminates the connection driver.

use std::error::Error as StdError;
use std::io::ErrorKind;

pub use zwaveip_core::{ZipError, ZipResult};

/// Check whether an I/O error kind is worth retrying
pub fn is_transient_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::PermissionDenied
    )
}

/// Check whether a transport error leaves the connection usable
pub fn is_transient(error: &ZipError) -> bool {
    match error {
        ZipError::Connection(e) => is_transient_kind(e.kind()),
        ZipError::Timeout => true,
        _ => false,
    }
}

/// Find the I/O error kind at the root of an error chain, if there is one
///
/// DTLS errors wrap socket errors several layers deep, so the whole
/// `source()` chain is searched.
pub fn io_error_kind(error: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        current = e.source();
    }
    None
}
