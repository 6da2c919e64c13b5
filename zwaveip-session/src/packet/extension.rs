//! Header extension options
//!
//! The extension block starts with a length byte that counts itself and all
//! options. Each option is `type(1) + length(1) + value(length)`, where the
//! top bit of the type byte marks the option as critical.

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use zwaveip_core::{DecodeError, ZipError, ZipResult};

pub const OPTION_EXPECTED_DELAY: u8 = 1;
pub const OPTION_MAINTENANCE_GET: u8 = 2;
pub const OPTION_MAINTENANCE_REPORT: u8 = 3;
pub const OPTION_ENCAPSULATION_FORMAT_INFO: u8 = 4;

pub const OPTION_TYPE_MASK: u8 = 0x7F;
pub const OPTION_CRITICAL: u8 = 0x80;

pub const IMA_ROUTE_CHANGED: u8 = 0;
pub const IMA_TRANSMISSION_TIME: u8 = 1;
pub const IMA_LAST_WORKING_ROUTE: u8 = 2;

/// Largest value an EXPECTED_DELAY option can carry (24 bits)
pub const MAX_EXPECTED_DELAY: u32 = 0x00FF_FFFF;

/// One option of the header extension block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExtension {
    /// The receiver must drop the packet if it does not understand the option
    pub critical: bool,
    pub option: ZipOption,
}

impl HeaderExtension {
    pub fn new(option: ZipOption) -> Self {
        Self {
            critical: false,
            option,
        }
    }

    pub fn critical(option: ZipOption) -> Self {
        Self {
            critical: true,
            option,
        }
    }

    fn encoded_len(&self) -> usize {
        2 + self.option.value_len()
    }
}

/// Option payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZipOption {
    /// Seconds until the peer expects to deliver a mailboxed command
    ExpectedDelay(u32),
    /// Ask the peer to attach installation and maintenance data to its reply
    MaintenanceGet,
    /// Installation and maintenance data
    MaintenanceReport(Vec<ImaEntry>),
    /// Security scheme of the command, echoed back in responses
    EncapsulationFormatInfo { security: u8, flags: u8 },
    /// Unrecognised non-critical option, skipped
    Unknown { option_type: u8, value: Vec<u8> },
}

impl ZipOption {
    pub fn option_type(&self) -> u8 {
        match self {
            ZipOption::ExpectedDelay(_) => OPTION_EXPECTED_DELAY,
            ZipOption::MaintenanceGet => OPTION_MAINTENANCE_GET,
            ZipOption::MaintenanceReport(_) => OPTION_MAINTENANCE_REPORT,
            ZipOption::EncapsulationFormatInfo { .. } => OPTION_ENCAPSULATION_FORMAT_INFO,
            ZipOption::Unknown { option_type, .. } => *option_type & OPTION_TYPE_MASK,
        }
    }

    fn value_len(&self) -> usize {
        match self {
            ZipOption::ExpectedDelay(_) => 3,
            ZipOption::MaintenanceGet => 0,
            ZipOption::MaintenanceReport(entries) => entries.iter().map(ImaEntry::encoded_len).sum(),
            ZipOption::EncapsulationFormatInfo { .. } => 2,
            ZipOption::Unknown { value, .. } => value.len(),
        }
    }
}

/// One sub-option of a MAINTENANCE_REPORT
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImaEntry {
    RouteChanged(u8),
    /// Milliseconds the last transmission took
    TransmissionTime(u16),
    LastWorkingRoute { repeaters: [u8; 4], speed: u8 },
    /// Sub-option of an unknown type, or of a known type with an unexpected length
    ///
    /// A known type with its canonical length decodes as the typed variant;
    /// build entries with [`ImaEntry::new`] to get the same normal form.
    Raw { ima_type: u8, value: Vec<u8> },
}

impl ImaEntry {
    fn encoded_len(&self) -> usize {
        2 + match self {
            ImaEntry::RouteChanged(_) => 1,
            ImaEntry::TransmissionTime(_) => 2,
            ImaEntry::LastWorkingRoute { .. } => 5,
            ImaEntry::Raw { value, .. } => value.len(),
        }
    }

    /// Entry for a sub-option type and value, typed where the length allows
    pub fn new(ima_type: u8, value: &[u8]) -> Self {
        match (ima_type, value) {
            (IMA_ROUTE_CHANGED, [flag]) => ImaEntry::RouteChanged(*flag),
            (IMA_TRANSMISSION_TIME, [hi, lo]) => ImaEntry::TransmissionTime(u16::from_be_bytes([*hi, *lo])),
            (IMA_LAST_WORKING_ROUTE, [r1, r2, r3, r4, speed]) => ImaEntry::LastWorkingRoute {
                repeaters: [*r1, *r2, *r3, *r4],
                speed: *speed,
            },
            _ => ImaEntry::Raw {
                ima_type,
                value: value.to_vec(),
            },
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            ImaEntry::RouteChanged(flag) => {
                buf.put_u8(IMA_ROUTE_CHANGED);
                buf.put_u8(1);
                buf.put_u8(*flag);
            }
            ImaEntry::TransmissionTime(ms) => {
                buf.put_u8(IMA_TRANSMISSION_TIME);
                buf.put_u8(2);
                buf.put_u16(*ms);
            }
            ImaEntry::LastWorkingRoute { repeaters, speed } => {
                buf.put_u8(IMA_LAST_WORKING_ROUTE);
                buf.put_u8(5);
                buf.put_slice(repeaters);
                buf.put_u8(*speed);
            }
            ImaEntry::Raw { ima_type, value } => {
                buf.put_u8(*ima_type);
                buf.put_u8(value.len() as u8);
                buf.put_slice(value);
            }
        }
    }
}

/// Installation and maintenance data last reported by the peer
///
/// Fields keep their previous value when a report omits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImaData {
    pub route_changed: u8,
    pub transmission_time: u16,
    pub last_working_route: [u8; 4],
    pub speed: u8,
}

impl ImaData {
    /// Fold a maintenance report into the stored values
    ///
    /// Sub-options longer than their field are read from their prefix;
    /// shorter ones are ignored.
    pub fn update(&mut self, entries: &[ImaEntry]) {
        for entry in entries {
            match entry {
                ImaEntry::RouteChanged(flag) => self.route_changed = *flag,
                ImaEntry::TransmissionTime(ms) => self.transmission_time = *ms,
                ImaEntry::LastWorkingRoute { repeaters, speed } => {
                    self.last_working_route = *repeaters;
                    self.speed = *speed;
                }
                ImaEntry::Raw { ima_type, value } => match (*ima_type, value.as_slice()) {
                    (IMA_ROUTE_CHANGED, [flag, ..]) => self.route_changed = *flag,
                    (IMA_TRANSMISSION_TIME, [hi, lo, ..]) => {
                        self.transmission_time = u16::from_be_bytes([*hi, *lo]);
                    }
                    (IMA_LAST_WORKING_ROUTE, [r1, r2, r3, r4, speed, ..]) => {
                        self.last_working_route = [*r1, *r2, *r3, *r4];
                        self.speed = *speed;
                    }
                    _ => {}
                },
            }
        }
    }
}

/// Decode the options of an extension block
///
/// `block` is the extension block without its leading length byte.
///
/// # Errors
/// Fails if an option runs past the block, a recognised option has the wrong
/// length, or an unrecognised option is marked critical.
pub fn decode_extensions(block: &[u8]) -> Result<Vec<HeaderExtension>, DecodeError> {
    let mut extensions = Vec::new();
    let mut offset = 0;

    while offset < block.len() {
        let type_byte = block[offset];
        let option_type = type_byte & OPTION_TYPE_MASK;
        let critical = type_byte & OPTION_CRITICAL != 0;

        let Some(&len) = block.get(offset + 1) else {
            return Err(DecodeError::OptionOverrun { option_type });
        };
        let start = offset + 2;
        let end = start + len as usize;
        let Some(value) = block.get(start..end) else {
            return Err(DecodeError::OptionOverrun { option_type });
        };

        let option = match option_type {
            OPTION_EXPECTED_DELAY => {
                expect_len(option_type, value, 3)?;
                ZipOption::ExpectedDelay(u32::from_be_bytes([0, value[0], value[1], value[2]]))
            }
            OPTION_MAINTENANCE_GET => {
                expect_len(option_type, value, 0)?;
                ZipOption::MaintenanceGet
            }
            OPTION_MAINTENANCE_REPORT => ZipOption::MaintenanceReport(decode_ima(value)?),
            OPTION_ENCAPSULATION_FORMAT_INFO => {
                expect_len(option_type, value, 2)?;
                ZipOption::EncapsulationFormatInfo {
                    security: value[0],
                    flags: value[1],
                }
            }
            _ if critical => return Err(DecodeError::UnsupportedCriticalOption(option_type)),
            _ => ZipOption::Unknown {
                option_type,
                value: value.to_vec(),
            },
        };

        extensions.push(HeaderExtension { critical, option });
        offset = end;
    }

    Ok(extensions)
}

fn expect_len(option_type: u8, value: &[u8], expected: usize) -> Result<(), DecodeError> {
    if value.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::OptionLength {
            option_type,
            expected,
            actual: value.len(),
        })
    }
}

fn decode_ima(mut value: &[u8]) -> Result<Vec<ImaEntry>, DecodeError> {
    let mut entries = Vec::new();
    while let [ima_type, rest @ ..] = value {
        let Some((&len, rest)) = rest.split_first() else {
            return Err(DecodeError::ImaOverrun(*ima_type));
        };
        if rest.len() < len as usize {
            return Err(DecodeError::ImaOverrun(*ima_type));
        }
        let (entry, rest) = rest.split_at(len as usize);
        entries.push(ImaEntry::new(*ima_type, entry));
        value = rest;
    }
    Ok(entries)
}

/// Size of the extension block, including its length byte
pub fn block_len(extensions: &[HeaderExtension]) -> usize {
    1 + extensions.iter().map(HeaderExtension::encoded_len).sum::<usize>()
}

/// Check option values against their wire fields
///
/// # Errors
/// Returns `ZipError::InvalidData` for an EXPECTED_DELAY beyond 24 bits.
pub fn validate_extensions(extensions: &[HeaderExtension]) -> ZipResult<()> {
    for extension in extensions {
        if let ZipOption::ExpectedDelay(seconds) = extension.option {
            if seconds > MAX_EXPECTED_DELAY {
                return Err(ZipError::InvalidData(format!(
                    "Expected delay of {} s does not fit 24 bits",
                    seconds
                )));
            }
        }
    }
    Ok(())
}

/// Append a complete extension block, length byte first
///
/// The caller checks the block with [`validate_extensions`] and that
/// [`block_len`] fits in a byte.
pub fn encode_extensions<B: BufMut>(extensions: &[HeaderExtension], buf: &mut B) {
    buf.put_u8(block_len(extensions) as u8);
    for extension in extensions {
        let type_byte = extension.option.option_type() | if extension.critical { OPTION_CRITICAL } else { 0 };
        buf.put_u8(type_byte);
        buf.put_u8(extension.option.value_len() as u8);
        match &extension.option {
            ZipOption::ExpectedDelay(seconds) => {
                let bytes = seconds.to_be_bytes();
                buf.put_slice(&bytes[1..]);
            }
            ZipOption::MaintenanceGet => {}
            ZipOption::MaintenanceReport(entries) => {
                for entry in entries {
                    entry.encode(buf);
                }
            }
            ZipOption::EncapsulationFormatInfo { security, flags } => {
                buf.put_u8(*security);
                buf.put_u8(*flags);
            }
            ZipOption::Unknown { value, .. } => buf.put_slice(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_maintenance_get_and_encap_info() {
        let extensions = decode_extensions(&[0x02, 0x00, 0x84, 0x02, 0x11, 0x22]).unwrap();
        assert_eq!(
            extensions,
            vec![
                HeaderExtension::new(ZipOption::MaintenanceGet),
                HeaderExtension::critical(ZipOption::EncapsulationFormatInfo {
                    security: 0x11,
                    flags: 0x22
                }),
            ]
        );
    }

    #[test]
    fn test_decode_expected_delay() {
        let extensions = decode_extensions(&[0x01, 0x03, 0x00, 0x01, 0x2C]).unwrap();
        assert_eq!(extensions[0].option, ZipOption::ExpectedDelay(300));
    }

    #[test]
    fn test_expected_delay_wrong_length_is_rejected() {
        assert_eq!(
            decode_extensions(&[0x01, 0x02, 0x00, 0x1E]),
            Err(DecodeError::OptionLength {
                option_type: 1,
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_option_overrun_is_rejected() {
        assert_eq!(
            decode_extensions(&[0x04, 0x02, 0x11]),
            Err(DecodeError::OptionOverrun { option_type: 4 })
        );
        assert_eq!(
            decode_extensions(&[0x02]),
            Err(DecodeError::OptionOverrun { option_type: 2 })
        );
    }

    #[test]
    fn test_unknown_options() {
        let extensions = decode_extensions(&[0x10, 0x01, 0xAA]).unwrap();
        assert_eq!(
            extensions[0].option,
            ZipOption::Unknown {
                option_type: 0x10,
                value: vec![0xAA]
            }
        );

        assert_eq!(
            decode_extensions(&[0x90, 0x01, 0xAA]),
            Err(DecodeError::UnsupportedCriticalOption(0x10))
        );
    }

    #[test]
    fn test_maintenance_report() {
        let block = [
            0x03, 0x0E, // MAINTENANCE_REPORT, 14 bytes
            0x00, 0x01, 0x01, // route changed
            0x01, 0x02, 0x01, 0xF4, // 500 ms
            0x02, 0x05, 0x0A, 0x0B, 0x00, 0x00, 0x03, // route + speed
        ];
        let extensions = decode_extensions(&block).unwrap();
        let ZipOption::MaintenanceReport(entries) = &extensions[0].option else {
            panic!("expected a maintenance report");
        };

        let mut ima = ImaData::default();
        ima.update(entries);
        assert_eq!(ima.route_changed, 1);
        assert_eq!(ima.transmission_time, 500);
        assert_eq!(ima.last_working_route, [0x0A, 0x0B, 0x00, 0x00]);
        assert_eq!(ima.speed, 3);
    }

    #[test]
    fn test_short_ima_entries_are_ignored() {
        let extensions = decode_extensions(&[0x03, 0x03, 0x01, 0x01, 0x07]).unwrap();
        let ZipOption::MaintenanceReport(entries) = &extensions[0].option else {
            panic!("expected a maintenance report");
        };

        let mut ima = ImaData {
            transmission_time: 42,
            ..Default::default()
        };
        ima.update(entries);
        assert_eq!(ima.transmission_time, 42);
    }

    #[test]
    fn test_ima_overrun_is_rejected() {
        assert_eq!(
            decode_extensions(&[0x03, 0x03, 0x02, 0x05, 0x01]),
            Err(DecodeError::ImaOverrun(2))
        );
    }

    #[test]
    fn test_encode_block_counts_length_byte() {
        let mut buf = Vec::new();
        encode_extensions(&[HeaderExtension::new(ZipOption::MaintenanceGet)], &mut buf);
        assert_eq!(buf, vec![0x03, 0x02, 0x00]);

        let mut buf = Vec::new();
        encode_extensions(
            &[
                HeaderExtension::new(ZipOption::MaintenanceGet),
                HeaderExtension::critical(ZipOption::EncapsulationFormatInfo { security: 1, flags: 2 }),
            ],
            &mut buf,
        );
        assert_eq!(buf, vec![0x07, 0x02, 0x00, 0x84, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn test_ima_entry_new_prefers_typed_variants() {
        assert_eq!(ImaEntry::new(IMA_TRANSMISSION_TIME, &[0x00, 0x78]), ImaEntry::TransmissionTime(120));
        assert_eq!(
            ImaEntry::new(IMA_TRANSMISSION_TIME, &[0x00, 0x78, 0x01]),
            ImaEntry::Raw {
                ima_type: IMA_TRANSMISSION_TIME,
                value: vec![0x00, 0x78, 0x01]
            }
        );

        // A canonical-length Raw entry comes back typed
        let raw = HeaderExtension::new(ZipOption::MaintenanceReport(vec![ImaEntry::Raw {
            ima_type: IMA_ROUTE_CHANGED,
            value: vec![0x01],
        }]));
        let mut buf = Vec::new();
        encode_extensions(std::slice::from_ref(&raw), &mut buf);
        assert_eq!(
            decode_extensions(&buf[1..]).unwrap()[0].option,
            ZipOption::MaintenanceReport(vec![ImaEntry::new(IMA_ROUTE_CHANGED, &[0x01])])
        );
    }

    #[test]
    fn test_validate_rejects_expected_delay_overflow() {
        let ok = [HeaderExtension::new(ZipOption::ExpectedDelay(MAX_EXPECTED_DELAY))];
        assert!(validate_extensions(&ok).is_ok());

        let too_long = [HeaderExtension::new(ZipOption::ExpectedDelay(MAX_EXPECTED_DELAY + 1))];
        assert!(matches!(validate_extensions(&too_long), Err(ZipError::InvalidData(_))));
    }
}
