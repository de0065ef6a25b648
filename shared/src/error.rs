/*!
Common error types for the voltlink protocol layer.
*/

use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while building or interpreting protocol data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Buffer failed the inbound framing checks
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Inbound checksum did not match the recomputed value
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// Outbound payload does not fit in a single frame
    #[error("Frame too large: {len} bytes exceeds limit of {limit}")]
    FrameTooLarge { len: usize, limit: usize },

    /// Calibration values outside the plausible range
    #[error("Implausible calibration for range {range}: slope {slope}")]
    ImplausibleCalibration { range: u8, slope: f32 },

    /// Payload too short for the notification it claims to be
    #[error("Short payload for command {code:#04x}: {len} bytes, need {need}")]
    ShortPayload { code: u8, len: usize, need: usize },

    /// Caller supplied an argument no frame can be built from
    #[error("Invalid command argument: {0}")]
    InvalidCommandArgument(String),
}

impl ProtocolError {
    /// Create a new malformed frame error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a new invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidCommandArgument(msg.into())
    }

    /// Whether the error concerns framing of inbound data
    pub fn is_framing(&self) -> bool {
        matches!(self, Self::MalformedFrame(_) | Self::ChecksumMismatch { .. })
    }
}
