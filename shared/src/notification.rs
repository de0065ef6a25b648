/*!
Inbound notification routing.

The device pushes two kinds of notifications over the same channel:
calibration reports (`0x35`) and measurement samples (`0x37`). Anything
else is ignored.
*/

use crate::calibration::CalibrationUpdate;
use crate::error::{ProtocolError, Result};
use crate::frame::Frame;
use crate::protocol::codes;

/// Minimum payload length of a sample notification
pub const SAMPLE_PAYLOAD_LEN: usize = 10;

/// A single raw ADC sample tagged with the range it was taken on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub range: u8,
    pub raw: u16,
}

impl Sample {
    /// Decode a sample payload.
    ///
    /// Byte 0 is the range; bytes 8..10 hold the raw count little-endian.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < SAMPLE_PAYLOAD_LEN {
            return Err(ProtocolError::ShortPayload {
                code: codes::MEASUREMENT,
                len: payload.len(),
                need: SAMPLE_PAYLOAD_LEN,
            });
        }

        Ok(Self {
            range: payload[0],
            raw: u16::from_le_bytes([payload[8], payload[9]]),
        })
    }

    /// Encode as a notification payload (device side)
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = vec![0u8; SAMPLE_PAYLOAD_LEN];
        payload[0] = self.range;
        payload[8..10].copy_from_slice(&self.raw.to_le_bytes());
        payload
    }
}

/// A decoded inbound notification
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Calibration(CalibrationUpdate),
    Sample(Sample),
}

impl Notification {
    /// Route a parsed frame by command code.
    ///
    /// Returns `Ok(None)` for codes the host does not consume.
    pub fn decode(frame: &Frame) -> Result<Option<Self>> {
        match frame.code {
            codes::CALIBRATION => CalibrationUpdate::decode(&frame.payload)
                .map(|update| Some(Self::Calibration(update))),
            codes::MEASUREMENT => Sample::decode(&frame.payload).map(|sample| Some(Self::Sample(sample))),
            _ => Ok(None),
        }
    }
}
