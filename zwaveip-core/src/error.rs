use thiserror::Error;

/// Main error type for Z/IP operations
#[derive(Error, Debug)]
pub enum ZipError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A transmission is already in progress on the session
    #[error("Session busy: a transmission is already in progress")]
    Busy,

    #[error("Timeout")]
    Timeout,

    /// The connection driver behind the session has exited
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reasons a received datagram is rejected by the packet decoder
///
/// Every variant leads to the frame being dropped without an acknowledgement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("not a Z/IP frame: command class 0x{class:02X}, command 0x{command:02X}")]
    NotZip { class: u8, command: u8 },

    #[error("invalid header extension length {0}")]
    ExtensionLength(u8),

    #[error("header extension of {declared} bytes exceeds the {available} bytes available")]
    ExtensionOverrun { declared: usize, available: usize },

    #[error("header extension option 0x{option_type:02X} runs past the extension block")]
    OptionOverrun { option_type: u8 },

    #[error("header extension option 0x{option_type:02X} has length {actual}, expected {expected}")]
    OptionLength {
        option_type: u8,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported critical header extension option 0x{0:02X}")]
    UnsupportedCriticalOption(u8),

    #[error("maintenance report sub-option 0x{0:02X} runs past its option")]
    ImaOverrun(u8),
}

/// Result type alias for Z/IP operations
pub type ZipResult<T> = Result<T, ZipError>;
