//! Z/IP wire codec
//!
//! Decoding works on borrowed datagrams and never reads past the buffer or
//! the declared extension length. Encoding writes into `BytesMut` and
//! refuses frames larger than the send buffer.

pub mod extension;
pub mod header;

pub use extension::{HeaderExtension, ImaData, ImaEntry, ZipOption};
pub use header::{flags0, flags1, ZipHeader, HEADER_LEN};

use bytes::{BufMut, Bytes, BytesMut};
use zwaveip_core::{
    DecodeError, ZipError, ZipResult, COMMAND_CLASS_ZIP, COMMAND_ZIP_KEEP_ALIVE, COMMAND_ZIP_PACKET,
};

/// Largest frame the encoder produces
pub const MAX_FRAME_SIZE: usize = 512;

/// Keep-alive frames are class, command and flags only
pub const KEEP_ALIVE_LEN: usize = 3;

/// A decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    Zip(ZipPacket<'a>),
    KeepAlive { flags0: u8 },
}

/// A decoded Z/IP packet borrowing its payload from the datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipPacket<'a> {
    pub header: ZipHeader,
    pub extensions: Vec<HeaderExtension>,
    /// Fixed header plus extension block
    pub header_len: usize,
    pub payload: &'a [u8],
}

impl ZipPacket<'_> {
    /// Expected delay carried by the packet, if any
    pub fn expected_delay(&self) -> Option<u32> {
        self.extensions.iter().find_map(|ext| match ext.option {
            ZipOption::ExpectedDelay(seconds) => Some(seconds),
            _ => None,
        })
    }

    /// Encapsulation format info carried by the packet, if any
    pub fn encapsulation(&self) -> Option<(u8, u8)> {
        self.extensions.iter().find_map(|ext| match ext.option {
            ZipOption::EncapsulationFormatInfo { security, flags } => Some((security, flags)),
            _ => None,
        })
    }

    /// All maintenance report entries carried by the packet
    pub fn ima_entries(&self) -> impl Iterator<Item = &ImaEntry> {
        self.extensions.iter().flat_map(|ext| match &ext.option {
            ZipOption::MaintenanceReport(entries) => entries.as_slice(),
            _ => &[][..],
        })
    }
}

/// Decode a received datagram
///
/// # Errors
/// Any [`DecodeError`]; the caller drops the frame without acknowledging it.
pub fn decode(frame: &[u8]) -> Result<Packet<'_>, DecodeError> {
    match frame {
        [COMMAND_CLASS_ZIP, COMMAND_ZIP_KEEP_ALIVE, flags0, ..] => Ok(Packet::KeepAlive { flags0: *flags0 }),
        [COMMAND_CLASS_ZIP, COMMAND_ZIP_KEEP_ALIVE] => Err(DecodeError::TooShort {
            expected: KEEP_ALIVE_LEN,
            actual: frame.len(),
        }),
        _ => decode_zip_packet(frame).map(Packet::Zip),
    }
}

/// Decode a Z/IP packet (command 0x02)
pub fn decode_zip_packet(frame: &[u8]) -> Result<ZipPacket<'_>, DecodeError> {
    let header = ZipHeader::decode(frame)?;

    if !header.has_extension() {
        return Ok(ZipPacket {
            header,
            extensions: Vec::new(),
            header_len: HEADER_LEN,
            payload: &frame[HEADER_LEN..],
        });
    }

    let Some(&ext_len) = frame.get(HEADER_LEN) else {
        return Err(DecodeError::ExtensionOverrun {
            declared: 1,
            available: 0,
        });
    };
    if ext_len < 1 {
        return Err(DecodeError::ExtensionLength(ext_len));
    }

    let header_len = HEADER_LEN + ext_len as usize;
    if header_len > frame.len() {
        return Err(DecodeError::ExtensionOverrun {
            declared: ext_len as usize,
            available: frame.len() - HEADER_LEN,
        });
    }

    let extensions = extension::decode_extensions(&frame[HEADER_LEN + 1..header_len])?;
    Ok(ZipPacket {
        header,
        extensions,
        header_len,
        payload: &frame[header_len..],
    })
}

/// Encode a Z/IP packet
///
/// An extension block is written whenever `header` announces one or
/// `extensions` is non-empty, and the header flag is set to match.
///
/// # Errors
/// Returns `ZipError::InvalidData` if an option value does not fit its field,
/// the extension block does not fit its length byte or the frame exceeds
/// [`MAX_FRAME_SIZE`].
pub fn encode(header: &ZipHeader, extensions: &[HeaderExtension], payload: &[u8]) -> ZipResult<Bytes> {
    let mut header = *header;
    let with_extension = header.has_extension() || !extensions.is_empty();

    let ext_len = if with_extension {
        extension::validate_extensions(extensions)?;
        header.flags1 |= flags1::HDR_EXT_INCLUDED;
        let len = extension::block_len(extensions);
        if len > u8::MAX as usize {
            return Err(ZipError::InvalidData(format!(
                "Header extension of {} bytes does not fit its length field",
                len
            )));
        }
        len
    } else {
        0
    };

    let total = HEADER_LEN + ext_len + payload.len();
    if total > MAX_FRAME_SIZE {
        return Err(ZipError::InvalidData(format!(
            "Frame of {} bytes exceeds the {} byte limit",
            total, MAX_FRAME_SIZE
        )));
    }

    let mut buf = BytesMut::with_capacity(total);
    header.encode(&mut buf);
    if with_extension {
        extension::encode_extensions(extensions, &mut buf);
    }
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Acknowledgement of a received packet: `23 02 40 00 seq dend send`
pub fn encode_ack(received: &ZipHeader) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    received.ack_response().encode(&mut buf);
    buf.freeze()
}

/// Keep-alive frame with the given first flags byte
pub fn encode_keep_alive(flags0: u8) -> Bytes {
    Bytes::copy_from_slice(&[COMMAND_CLASS_ZIP, COMMAND_ZIP_KEEP_ALIVE, flags0])
}

/// Keep-alive request: `23 03 80`
pub fn keep_alive_request() -> Bytes {
    encode_keep_alive(flags0::ACK_REQ)
}

/// Keep-alive acknowledgement: `23 03 40`
pub fn keep_alive_response() -> Bytes {
    encode_keep_alive(flags0::ACK_RES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_command_with_extension() {
        let frame = [
            0x23, 0x02, 0x80, 0xD0, 0x07, 0x00, 0x01, // header
            0x03, 0x02, 0x00, // MAINTENANCE_GET
            0x20, 0x02, // Basic Get
        ];
        let Packet::Zip(packet) = decode(&frame).unwrap() else {
            panic!("expected a Z/IP packet");
        };
        assert_eq!(packet.header.seq, 7);
        assert_eq!(packet.header.dest_endpoint, 1);
        assert_eq!(packet.header_len, 10);
        assert_eq!(packet.payload, &[0x20, 0x02]);
        assert_eq!(packet.extensions, vec![HeaderExtension::new(ZipOption::MaintenanceGet)]);
    }

    #[test]
    fn test_decode_without_extension() {
        let frame = [0x23, 0x02, 0x40, 0x00, 0x01, 0x00, 0x00];
        let Packet::Zip(packet) = decode(&frame).unwrap() else {
            panic!("expected a Z/IP packet");
        };
        assert!(packet.header.is_ack());
        assert!(packet.payload.is_empty());
        assert_eq!(packet.header_len, HEADER_LEN);
    }

    #[test]
    fn test_decode_keep_alive() {
        assert_eq!(decode(&[0x23, 0x03, 0x80]), Ok(Packet::KeepAlive { flags0: 0x80 }));
        assert!(decode(&[0x23, 0x03]).is_err());
    }

    #[test]
    fn test_extension_length_validation() {
        let zero = [0x23, 0x02, 0x00, 0x80, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(decode(&zero), Err(DecodeError::ExtensionLength(0)));

        let overrun = [0x23, 0x02, 0x00, 0x80, 0x01, 0x00, 0x00, 0x09, 0x02, 0x00];
        assert_eq!(
            decode(&overrun),
            Err(DecodeError::ExtensionOverrun {
                declared: 9,
                available: 3
            })
        );

        let missing = [0x23, 0x02, 0x00, 0x80, 0x01, 0x00, 0x00];
        assert!(decode(&missing).is_err());
    }

    #[test]
    fn test_critical_unknown_option_rejects_packet() {
        let frame = [
            0x23, 0x02, 0x80, 0xC0, 0x01, 0x00, 0x00, // header
            0x04, 0x85, 0x01, 0xFF, // critical option type 5
            0x20, 0x02,
        ];
        assert_eq!(decode(&frame), Err(DecodeError::UnsupportedCriticalOption(5)));
    }

    #[test]
    fn test_round_trip() {
        let header = ZipHeader {
            flags0: flags0::NACK_RES | flags0::WAIT_RES,
            flags1: flags1::HDR_EXT_INCLUDED,
            seq: 0xFF,
            source_endpoint: 2,
            dest_endpoint: 0,
        };
        let extensions = vec![
            HeaderExtension::new(ZipOption::ExpectedDelay(30)),
            HeaderExtension::new(ZipOption::MaintenanceReport(vec![
                ImaEntry::RouteChanged(0),
                ImaEntry::TransmissionTime(120),
            ])),
            HeaderExtension::new(ZipOption::Unknown {
                option_type: 0x33,
                value: vec![1, 2, 3],
            }),
        ];
        let payload = [0x25, 0x03, 0xFF];

        let frame = encode(&header, &extensions, &payload).unwrap();
        let Packet::Zip(packet) = decode(&frame).unwrap() else {
            panic!("expected a Z/IP packet");
        };
        assert_eq!(packet.header, header);
        assert_eq!(packet.extensions, extensions);
        assert_eq!(packet.payload, &payload);
        assert_eq!(packet.expected_delay(), Some(30));
    }

    #[test]
    fn test_encode_sets_extension_flag() {
        let header = ZipHeader {
            flags1: flags1::ZW_CMD_INCLUDED,
            ..Default::default()
        };
        let frame = encode(&header, &[HeaderExtension::new(ZipOption::MaintenanceGet)], &[]).unwrap();
        assert_eq!(frame[3], flags1::ZW_CMD_INCLUDED | flags1::HDR_EXT_INCLUDED);
        assert_eq!(&frame[7..], &[0x03, 0x02, 0x00]);
    }

    #[test]
    fn test_encode_rejects_oversized_frames() {
        let header = ZipHeader::command(1, 0, 0);
        let payload = vec![0u8; MAX_FRAME_SIZE];
        assert!(matches!(
            encode(&header, &[], &payload),
            Err(ZipError::InvalidData(_))
        ));

        let huge = HeaderExtension::new(ZipOption::Unknown {
            option_type: 0x40,
            value: vec![0u8; 254],
        });
        assert!(encode(&header, &[huge], &[]).is_err());
    }

    #[test]
    fn test_encode_rejects_expected_delay_beyond_24_bits() {
        let header = ZipHeader::command(1, 0, 0);
        let too_long = HeaderExtension::new(ZipOption::ExpectedDelay(0x0100_0005));
        assert!(matches!(
            encode(&header, &[too_long], &[]),
            Err(ZipError::InvalidData(_))
        ));

        let longest = HeaderExtension::new(ZipOption::ExpectedDelay(extension::MAX_EXPECTED_DELAY));
        let frame = encode(&header, &[longest], &[]).unwrap();
        let Packet::Zip(packet) = decode(&frame).unwrap() else {
            panic!("expected a Z/IP packet");
        };
        assert_eq!(packet.expected_delay(), Some(extension::MAX_EXPECTED_DELAY));
    }

    #[test]
    fn test_fixed_frames() {
        assert_eq!(keep_alive_request().as_ref(), &[0x23, 0x03, 0x80]);
        assert_eq!(keep_alive_response().as_ref(), &[0x23, 0x03, 0x40]);

        let received = ZipHeader::command(9, 0, 4);
        assert_eq!(encode_ack(&received).as_ref(), &[0x23, 0x02, 0x40, 0x00, 0x09, 0x04, 0x00]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_ima_entry() -> impl Strategy<Value = ImaEntry> {
            (0u8..=4, prop::collection::vec(any::<u8>(), 0..8)).prop_map(|(ima_type, value)| ImaEntry::new(ima_type, &value))
        }

        fn arb_option() -> impl Strategy<Value = ZipOption> {
            prop_oneof![
                (0..=extension::MAX_EXPECTED_DELAY).prop_map(ZipOption::ExpectedDelay),
                Just(ZipOption::MaintenanceGet),
                prop::collection::vec(arb_ima_entry(), 0..4).prop_map(ZipOption::MaintenanceReport),
                (any::<u8>(), any::<u8>())
                    .prop_map(|(security, flags)| ZipOption::EncapsulationFormatInfo { security, flags }),
                (5u8..=extension::OPTION_TYPE_MASK, prop::collection::vec(any::<u8>(), 0..16))
                    .prop_map(|(option_type, value)| ZipOption::Unknown { option_type, value }),
            ]
        }

        // Unknown options are only accepted when they are not critical
        fn arb_extension() -> impl Strategy<Value = HeaderExtension> {
            (arb_option(), any::<bool>()).prop_map(|(option, critical)| HeaderExtension {
                critical: critical && !matches!(option, ZipOption::Unknown { .. }),
                option,
            })
        }

        fn arb_header() -> impl Strategy<Value = ZipHeader> {
            any::<[u8; 5]>().prop_map(|[f0, f1, seq, source_endpoint, dest_endpoint]| ZipHeader {
                flags0: f0,
                flags1: f1,
                seq,
                source_endpoint,
                dest_endpoint,
            })
        }

        proptest! {
            #[test]
            fn zip_packet_round_trip(
                header in arb_header(),
                extensions in prop::collection::vec(arb_extension(), 0..6),
                payload in prop::collection::vec(any::<u8>(), 0..=(MAX_FRAME_SIZE - HEADER_LEN - u8::MAX as usize)),
            ) {
                let frame = encode(&header, &extensions, &payload).unwrap();
                prop_assert!(frame.len() <= MAX_FRAME_SIZE);

                let Packet::Zip(packet) = decode(&frame).unwrap() else {
                    panic!("expected a Z/IP packet");
                };

                let mut expected = header;
                if !extensions.is_empty() {
                    expected.flags1 |= flags1::HDR_EXT_INCLUDED;
                }
                prop_assert_eq!(packet.header, expected);
                prop_assert_eq!(&packet.extensions, &extensions);
                prop_assert_eq!(packet.payload, &payload[..]);
            }
        }
    }
}
