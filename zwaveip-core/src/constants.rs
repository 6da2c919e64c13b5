//! Z/IP protocol constants

/// Port the Z/IP Gateway listens on for plain UDP
pub const ZGW_UDP_PORT: u16 = 4123;

/// Port the Z/IP Gateway listens on for DTLS
pub const ZGW_DTLS_PORT: u16 = 41230;

/// Maximum pre-shared key length (RFC 4279)
pub const MAX_PSK_LEN: usize = 64;

/// PSK identity announced by clients during the DTLS handshake
pub const DTLS_PSK_IDENTITY: &[u8] = b"Client_identity";

pub const COMMAND_CLASS_ZIP: u8 = 0x23;
pub const COMMAND_ZIP_PACKET: u8 = 0x02;
pub const COMMAND_ZIP_KEEP_ALIVE: u8 = 0x03;

/// Z/IP Naming and Node Discovery; frames of this class are never Z/IP encapsulated
pub const COMMAND_CLASS_ZIP_ND: u8 = 0x58;
