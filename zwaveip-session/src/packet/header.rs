//! Fixed Z/IP packet header

use bytes::BufMut;
use zwaveip_core::{DecodeError, COMMAND_CLASS_ZIP, COMMAND_ZIP_PACKET};

/// Length of the fixed Z/IP packet header
pub const HEADER_LEN: usize = 7;

/// Bits of the first flags byte
pub mod flags0 {
    pub const ACK_REQ: u8 = 0x80;
    pub const ACK_RES: u8 = 0x40;
    pub const NACK_RES: u8 = 0x20;
    pub const WAIT_RES: u8 = 0x10;
    pub const NACK_QUEUE_FULL: u8 = 0x08;
    pub const NACK_OPTION_ERROR: u8 = 0x04;
}

/// Bits of the second flags byte
pub mod flags1 {
    pub const HDR_EXT_INCLUDED: u8 = 0x80;
    pub const ZW_CMD_INCLUDED: u8 = 0x40;
    pub const MORE_INFORMATION: u8 = 0x20;
    pub const SECURE_ORIGIN: u8 = 0x10;
}

/// The 7-byte header of a Z/IP packet
///
/// ```text
/// byte0 0x23 COMMAND_CLASS_ZIP
/// byte1 0x02 COMMAND_ZIP_PACKET
/// byte2 flags0
/// byte3 flags1
/// byte4 sequence number
/// byte5 source endpoint
/// byte6 destination endpoint
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZipHeader {
    pub flags0: u8,
    pub flags1: u8,
    pub seq: u8,
    pub source_endpoint: u8,
    pub dest_endpoint: u8,
}

impl ZipHeader {
    /// Header of an outbound command frame
    ///
    /// Requests an acknowledgement and announces an embedded command, a
    /// header extension and a secure origin.
    pub fn command(seq: u8, source_endpoint: u8, dest_endpoint: u8) -> Self {
        Self {
            flags0: flags0::ACK_REQ,
            flags1: flags1::ZW_CMD_INCLUDED | flags1::HDR_EXT_INCLUDED | flags1::SECURE_ORIGIN,
            seq,
            source_endpoint,
            dest_endpoint,
        }
    }

    /// Header acknowledging `self`
    ///
    /// The sequence number is mirrored and the endpoints are swapped.
    pub fn ack_response(&self) -> Self {
        Self {
            flags0: flags0::ACK_RES,
            flags1: 0,
            seq: self.seq,
            source_endpoint: self.dest_endpoint,
            dest_endpoint: self.source_endpoint,
        }
    }

    pub fn ack_requested(&self) -> bool {
        self.flags0 & flags0::ACK_REQ != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags0 & flags0::ACK_RES != 0
    }

    pub fn is_nack(&self) -> bool {
        self.flags0 & flags0::NACK_RES != 0
    }

    /// NACK with the waiting bit: the peer holds the command in a mailbox
    pub fn is_nack_waiting(&self) -> bool {
        self.is_nack() && self.flags0 & flags0::WAIT_RES != 0
    }

    pub fn has_extension(&self) -> bool {
        self.flags1 & flags1::HDR_EXT_INCLUDED != 0
    }

    pub fn has_command(&self) -> bool {
        self.flags1 & flags1::ZW_CMD_INCLUDED != 0
    }

    /// Decode the fixed header from the start of `frame`
    ///
    /// # Errors
    /// Returns `DecodeError::TooShort` for frames shorter than seven bytes and
    /// `DecodeError::NotZip` if the frame is not a Z/IP packet.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < HEADER_LEN {
            return Err(DecodeError::TooShort {
                expected: HEADER_LEN,
                actual: frame.len(),
            });
        }
        if frame[0] != COMMAND_CLASS_ZIP || frame[1] != COMMAND_ZIP_PACKET {
            return Err(DecodeError::NotZip {
                class: frame[0],
                command: frame[1],
            });
        }

        Ok(Self {
            flags0: frame[2],
            flags1: frame[3],
            seq: frame[4],
            source_endpoint: frame[5],
            dest_endpoint: frame[6],
        })
    }

    /// Append the seven header bytes to `buf`
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(COMMAND_CLASS_ZIP);
        buf.put_u8(COMMAND_ZIP_PACKET);
        buf.put_u8(self.flags0);
        buf.put_u8(self.flags1);
        buf.put_u8(self.seq);
        buf.put_u8(self.source_endpoint);
        buf.put_u8(self.dest_endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_header_flags() {
        let header = ZipHeader::command(5, 0, 2);
        assert!(header.ack_requested());
        assert!(header.has_command());
        assert!(header.has_extension());
        assert_eq!(header.flags1, 0xD0);
    }

    #[test]
    fn test_ack_response_swaps_endpoints() {
        let header = ZipHeader {
            flags0: flags0::ACK_REQ,
            flags1: flags1::ZW_CMD_INCLUDED,
            seq: 0x42,
            source_endpoint: 1,
            dest_endpoint: 3,
        };
        let mut buf = Vec::new();
        header.ack_response().encode(&mut buf);
        assert_eq!(buf, vec![0x23, 0x02, 0x40, 0x00, 0x42, 0x03, 0x01]);
    }

    #[test]
    fn test_nack_waiting() {
        let header = ZipHeader {
            flags0: flags0::NACK_RES | flags0::WAIT_RES,
            ..Default::default()
        };
        assert!(header.is_nack());
        assert!(header.is_nack_waiting());
        assert!(!header.is_ack());
    }

    #[test]
    fn test_decode_rejects_short_and_foreign_frames() {
        assert_eq!(
            ZipHeader::decode(&[0x23, 0x02, 0x40]),
            Err(DecodeError::TooShort { expected: 7, actual: 3 })
        );
        assert_eq!(
            ZipHeader::decode(&[0x20, 0x02, 0, 0, 0, 0, 0]),
            Err(DecodeError::NotZip { class: 0x20, command: 0x02 })
        );
    }
}
