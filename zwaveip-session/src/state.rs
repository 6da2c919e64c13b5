//! Z/IP session state machine

use std::fmt;

/// Transmission state of a Z/IP session
///
/// A session carries at most one command at a time.
///
/// # State Transitions
/// ```text
/// Idle -> TransmissionInProgress (on send)
/// TransmissionInProgress -> Idle (on ACK, NACK, timeout or abort)
/// TransmissionInProgress -> TransmissionInProgress (on NACK+WAIT)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No command in flight; `send` is accepted
    #[default]
    Idle,
    /// A command was sent and its acknowledgement is outstanding
    ///
    /// In this state:
    /// - `send` is rejected with `ZipError::Busy`
    /// - ACK/NACK frames carrying the in-flight sequence number complete it
    /// - the timeout countdown is running
    TransmissionInProgress,
}

impl SessionState {
    /// Check if a transmission is outstanding
    ///
    /// # Returns
    /// `true` if the session is in `TransmissionInProgress`, `false` otherwise
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::TransmissionInProgress)
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::TransmissionInProgress => "TransmissionInProgress",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an accepted transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitStatus {
    /// The peer acknowledged the command
    Ok,
    /// The peer rejected the command, or the connection went away first
    NotOk,
    /// The peer queued the command in a mailbox; a terminal status follows
    Wait,
    /// No acknowledgement arrived in time
    Timeout,
}

impl TransmitStatus {
    /// Check if no further status will follow for the transmission
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransmitStatus::Wait)
    }
}

impl fmt::Display for TransmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransmitStatus::Ok => "OK",
            TransmitStatus::NotOk => "NOT_OK",
            TransmitStatus::Wait => "WAIT",
            TransmitStatus::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}
