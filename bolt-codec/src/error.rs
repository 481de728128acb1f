use std::io;

/// Errors raised while reassembling or parsing frames.
///
/// Every variant is fatal to the connection that produced the bytes.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Bad sync byte {0:#04x}")]
    BadSync(u8),
    #[error("Invalid frame size {0}")]
    InvalidSize(i32),
    #[error("Frame size {size} exceeds the maximum of {max}")]
    MaxSizeExceeded { size: usize, max: usize },
    #[error("Invalid length")]
    InvalidLength,
    #[error("Invalid {kind} value {value}")]
    InvalidValue { kind: &'static str, value: u8 },
    #[error("Invalid property size mode {0}")]
    InvalidSizeMode(u8),
    #[error("Invalid property count {0}")]
    InvalidPropertyCount(i32),
    #[error("Meta size mismatch, declared {declared} bytes but {consumed} consumed")]
    MetaSizeMismatch { declared: usize, consumed: usize },
    #[error("Malformed packet")]
    MalformedPacket,
    #[error("utf8 error")]
    Utf8Error,
    #[error("Unpacker has already failed")]
    Failed,
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> DecodeError {
        DecodeError::Io(e)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Property payload of {0} bytes is too large")]
    PropertyTooLarge(usize),
    #[error("Property name of {0} bytes is too long")]
    NameTooLong(usize),
    #[error("Too many properties: {0}")]
    TooManyProperties(usize),
    #[error("Frame of {0} bytes is too large")]
    FrameTooLarge(usize),
    #[error("io error, {:?}", _0)]
    Io(io::Error),
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> EncodeError {
        EncodeError::Io(e)
    }
}
