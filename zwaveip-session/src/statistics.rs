//! Z/IP session statistics collection

use serde::{Deserialize, Serialize};

/// Z/IP session statistics
///
/// Counters are updated by the session under its lock and can be read at any
/// time through [`SessionHandle::statistics`](crate::SessionHandle::statistics).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatistics {
    /// Command frames handed to the transport
    pub frames_sent: u64,
    /// Datagrams fed to the session
    pub frames_received: u64,
    /// Datagrams dropped because they failed to decode
    pub frames_dropped: u64,
    /// Transmissions completed by an ACK
    pub acks: u64,
    /// Transmissions completed by a NACK
    pub nacks: u64,
    /// NACK+WAIT responses
    pub waits: u64,
    /// Transmissions that timed out
    pub timeouts: u64,
    /// Sends rejected because a transmission was in progress
    pub busy_rejections: u64,
    /// ACK/NACK frames that did not match the in-flight sequence number
    pub stale_responses: u64,
    /// Keep-alive requests sent
    pub keep_alives_sent: u64,
}

impl SessionStatistics {
    /// Create new statistics with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all statistics counters
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Share of completed transmissions that failed, as a percentage
    ///
    /// Returns 0.0 if nothing has completed yet.
    pub fn failure_rate(&self) -> f64 {
        let completed = self.acks + self.nacks + self.timeouts;
        if completed == 0 {
            0.0
        } else {
            ((self.nacks + self.timeouts) as f64 / completed as f64) * 100.0
        }
    }
}
