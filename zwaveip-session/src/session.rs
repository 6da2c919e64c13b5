//! Synchronous Z/IP session core
//!
//! [`ZipSession`] holds the acknowledgement bookkeeping of one logical
//! connection. It performs no I/O: outbound frames and completion statuses are
//! returned to the caller, which is [`SessionHandle`](crate::SessionHandle)
//! holding the session behind its lock.

use crate::packet::{self, HeaderExtension, ImaData, Packet, ZipHeader, ZipOption, ZipPacket, MAX_FRAME_SIZE};
use crate::state::{SessionState, TransmitStatus};
use crate::statistics::SessionStatistics;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use zwaveip_core::{ZipError, ZipResult, COMMAND_CLASS_ZIP_ND};

/// Budget for the acknowledgement of a new transmission
pub const ACK_TIMEOUT_MS: i64 = 400;

/// Budget after a NACK+WAIT; the gateway refreshes it every 60 seconds
pub const WAIT_TIMEOUT_MS: i64 = 90_000;

/// Expected delay assumed when a NACK+WAIT carries no EXPECTED_DELAY option
pub const DEFAULT_EXPECTED_DELAY: u32 = 90;

/// Multi-channel endpoints of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Endpoints {
    pub local: u8,
    pub remote: u8,
}

impl Endpoints {
    pub fn new(local: u8, remote: u8) -> Self {
        Self { local, remote }
    }
}

/// What the caller must do after feeding a datagram to the session
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Frame to send back immediately (ACK or keep-alive response)
    pub reply: Option<Bytes>,
    /// Status of the in-flight transmission, if the datagram settled it
    pub status: Option<TransmitStatus>,
    /// Embedded Z-Wave command for the application
    pub command: Option<Bytes>,
}

/// Z/IP session state
#[derive(Debug, Default)]
pub struct ZipSession {
    state: SessionState,
    seq: u8,
    endpoints: Endpoints,
    encapsulation: (u8, u8),
    expected_delay: u32,
    timeout_remaining_ms: i64,
    ima: ImaData,
    statistics: SessionStatistics,
}

impl ZipSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Sequence number of the most recent transmission
    pub fn sequence(&self) -> u8 {
        self.seq
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    /// Endpoint used by [`prepare_send`](Self::prepare_send) when no endpoints are given
    pub fn set_remote_endpoint(&mut self, endpoint: u8) {
        self.endpoints.remote = endpoint;
    }

    /// Seconds the peer asked the caller to wait, from the last Z/IP packet
    pub fn expected_delay(&self) -> u32 {
        self.expected_delay
    }

    /// Encapsulation format info from the last Z/IP packet
    pub fn encapsulation(&self) -> (u8, u8) {
        self.encapsulation
    }

    pub fn ima(&self) -> ImaData {
        self.ima
    }

    /// Remaining acknowledgement budget; only meaningful while busy
    pub fn timeout_remaining_ms(&self) -> i64 {
        self.timeout_remaining_ms
    }

    pub fn statistics(&self) -> &SessionStatistics {
        &self.statistics
    }

    /// Start a transmission and build its frame
    ///
    /// The frame requests an acknowledgement and carries a MAINTENANCE_GET
    /// option. When `response_expected` is set, a critical
    /// ENCAPSULATION_FORMAT_INFO option echoes the encapsulation last reported
    /// by the peer. Z/IP ND commands are sent without Z/IP encapsulation.
    ///
    /// # Arguments
    /// * `payload` - Z-Wave command, starting with its command class
    /// * `endpoints` - Endpoints for this command, or `None` to keep the current ones
    /// * `response_expected` - Whether the command solicits a report
    ///
    /// # Returns
    /// The frame to hand to the transport
    ///
    /// # Errors
    /// Returns `ZipError::Busy` while a transmission is in progress and
    /// `ZipError::InvalidData` for an empty or oversized payload. The session
    /// is left untouched on error.
    pub fn prepare_send(
        &mut self,
        payload: &[u8],
        endpoints: Option<Endpoints>,
        response_expected: bool,
    ) -> ZipResult<Bytes> {
        if self.is_busy() {
            self.statistics.busy_rejections += 1;
            return Err(ZipError::Busy);
        }
        let Some(&command_class) = payload.first() else {
            return Err(ZipError::InvalidData("Empty command payload".to_string()));
        };

        let endpoints = endpoints.unwrap_or(self.endpoints);
        let seq = self.seq.wrapping_add(1);

        let frame = if command_class == COMMAND_CLASS_ZIP_ND {
            if payload.len() > MAX_FRAME_SIZE {
                return Err(ZipError::InvalidData(format!(
                    "Frame of {} bytes exceeds the {} byte limit",
                    payload.len(),
                    MAX_FRAME_SIZE
                )));
            }
            Bytes::copy_from_slice(payload)
        } else {
            let header = ZipHeader::command(seq, endpoints.local, endpoints.remote);
            let mut extensions = vec![HeaderExtension::new(ZipOption::MaintenanceGet)];
            if response_expected {
                let (security, flags) = self.encapsulation;
                extensions.push(HeaderExtension::critical(ZipOption::EncapsulationFormatInfo {
                    security,
                    flags,
                }));
            }
            packet::encode(&header, &extensions, payload)?
        };

        self.seq = seq;
        self.endpoints = endpoints;
        self.state = SessionState::TransmissionInProgress;
        self.timeout_remaining_ms = ACK_TIMEOUT_MS;
        self.statistics.frames_sent += 1;
        log::trace!(
            "Transmission {} started to endpoint {} ({} bytes)",
            seq,
            endpoints.remote,
            frame.len()
        );
        Ok(frame)
    }

    /// Process a received datagram
    ///
    /// Frames that fail to decode are dropped without a reply. An
    /// acknowledgement is produced for every frame that requests one,
    /// whatever the session state.
    pub fn handle_datagram(&mut self, raw: &[u8]) -> ReceiveOutcome {
        self.statistics.frames_received += 1;

        match packet::decode(raw) {
            Ok(Packet::Zip(packet)) => self.handle_zip_packet(&packet),
            Ok(Packet::KeepAlive { flags0 }) => {
                let reply = (flags0 & packet::flags0::ACK_REQ != 0).then(packet::keep_alive_response);
                ReceiveOutcome {
                    reply,
                    ..Default::default()
                }
            }
            Err(e) => {
                self.statistics.frames_dropped += 1;
                log::debug!("Dropping {} byte frame: {}", raw.len(), e);
                ReceiveOutcome::default()
            }
        }
    }

    fn handle_zip_packet(&mut self, packet: &ZipPacket<'_>) -> ReceiveOutcome {
        let header = packet.header;
        log::trace!(
            "Got Z/IP packet: flags0:0x{:02x}, flags1:0x{:02x}, seq:{}, send:0x{:02x}, dend:0x{:02x}",
            header.flags0,
            header.flags1,
            header.seq,
            header.source_endpoint,
            header.dest_endpoint
        );

        let reply = header.ack_requested().then(|| packet::encode_ack(&header));

        self.encapsulation = packet.encapsulation().unwrap_or((0, 0));
        self.expected_delay = packet.expected_delay().unwrap_or(0);
        let ima: Vec<_> = packet.ima_entries().cloned().collect();
        self.ima.update(&ima);

        let status = if self.is_busy() && header.seq == self.seq {
            self.settle(&header)
        } else {
            if header.is_ack() || header.is_nack() {
                self.statistics.stale_responses += 1;
                log::debug!(
                    "Ignoring response with sequence {} (state {}, in-flight sequence {})",
                    header.seq,
                    self.state,
                    self.seq
                );
            }
            None
        };

        let command = (header.has_command() && !packet.payload.is_empty())
            .then(|| Bytes::copy_from_slice(packet.payload));

        ReceiveOutcome {
            reply,
            status,
            command,
        }
    }

    fn settle(&mut self, header: &ZipHeader) -> Option<TransmitStatus> {
        if header.is_ack() {
            self.state = SessionState::Idle;
            self.statistics.acks += 1;
            log::trace!("Transmission {} acknowledged", self.seq);
            Some(TransmitStatus::Ok)
        } else if header.is_nack_waiting() {
            self.timeout_remaining_ms = WAIT_TIMEOUT_MS;
            if self.expected_delay == 0 {
                self.expected_delay = DEFAULT_EXPECTED_DELAY;
            }
            self.statistics.waits += 1;
            log::trace!(
                "Transmission {} waiting, expected delay {} s",
                self.seq,
                self.expected_delay
            );
            Some(TransmitStatus::Wait)
        } else if header.is_nack() {
            self.state = SessionState::Idle;
            self.statistics.nacks += 1;
            log::trace!("Transmission {} rejected (flags0 0x{:02x})", self.seq, header.flags0);
            Some(TransmitStatus::NotOk)
        } else {
            None
        }
    }

    /// Advance the acknowledgement countdown
    ///
    /// # Returns
    /// `Some(TransmitStatus::Timeout)` when the in-flight transmission expires
    pub fn tick(&mut self, elapsed_ms: u32) -> Option<TransmitStatus> {
        if !self.is_busy() {
            return None;
        }

        self.timeout_remaining_ms -= i64::from(elapsed_ms);
        if self.timeout_remaining_ms > 0 {
            return None;
        }

        self.state = SessionState::Idle;
        self.statistics.timeouts += 1;
        log::debug!("Transmission {} timed out", self.seq);
        Some(TransmitStatus::Timeout)
    }

    /// Keep-alive request frame
    pub fn keep_alive(&mut self) -> Bytes {
        self.statistics.keep_alives_sent += 1;
        packet::keep_alive_request()
    }

    /// Give up on the in-flight transmission
    ///
    /// # Returns
    /// `Some(TransmitStatus::NotOk)` if a transmission was in progress
    pub fn abort(&mut self) -> Option<TransmitStatus> {
        if !self.is_busy() {
            return None;
        }
        self.state = SessionState::Idle;
        log::debug!("Transmission {} aborted", self.seq);
        Some(TransmitStatus::NotOk)
    }
}
