/*!
# Shared Protocol Types

Wire-level building blocks for talking to the wireless voltage sensor.

## Core Types

- [`Frame`] - Command code plus payload, with envelope encode/parse
- [`CalibrationTable`] - Per-range linear calibration
- [`Notification`] - Decoded inbound notification
- [`Command`] - Caller intent

## Modules

- [`crc`] - CRC-16/MODBUS checksum
- [`frame`] - Frame envelope
- [`calibration`] - Calibration entries and decoding
- [`notification`] - Sample decoding and inbound routing
- [`command`] - Command parsing and validation
- [`error`] - Common error types
*/

pub mod calibration;
pub mod command;
pub mod crc;
pub mod error;
pub mod frame;
pub mod notification;

// Re-export commonly used types
pub use calibration::{CalibrationEntry, CalibrationTable, CalibrationUpdate};
pub use command::Command;
pub use error::{ProtocolError, Result};
pub use frame::Frame;
pub use notification::{Notification, Sample};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// First byte of every frame
    pub const HEADER: u8 = 0xAA;

    /// Second byte of every frame
    pub const RESERVED: u8 = 0x00;

    /// Last byte of every frame
    pub const TRAILER: u8 = 0x7E;

    /// Envelope bytes around the payload
    pub const FRAME_OVERHEAD: usize = 8;

    /// Checksum plus trailer
    pub const FOOTER_LEN: usize = 3;

    /// Shortest buffer accepted as an inbound frame
    pub const MIN_FRAME_LEN: usize = 9;

    /// Command codes
    pub mod codes {
        /// Set sample period
        pub const SET_PERIOD: u8 = 0x31;

        /// Select measurement range
        pub const SELECT_RANGE: u8 = 0x32;

        /// Request (host) or deliver (device) calibration
        pub const CALIBRATION: u8 = 0x35;

        /// Enable measurement (host) or deliver a sample (device)
        pub const MEASUREMENT: u8 = 0x37;
    }
}
