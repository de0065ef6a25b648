/*!
Frame encoding and parsing.

Every exchange with the sensor is wrapped in the same envelope:

```text
0xAA 0x00 len_hi len_lo code payload... crc_lo crc_hi 0x7E
```

`len` is big-endian and counts the whole frame, envelope included. The
checksum is CRC-16/MODBUS over everything before the checksum field.
*/

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::crc16;
use crate::error::{ProtocolError, Result};
use crate::protocol::{codes, FOOTER_LEN, FRAME_OVERHEAD, HEADER, MIN_FRAME_LEN, RESERVED, TRAILER};

/// A command code with its payload, detached from the envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame from a command code and payload
    pub fn new(code: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Set the device sample period in microseconds
    pub fn set_period(period_us: u32) -> Self {
        Self::new(codes::SET_PERIOD, period_us.to_le_bytes())
    }

    /// Select the active measurement range
    pub fn select_range(range: u8) -> Self {
        Self::new(codes::SELECT_RANGE, [range])
    }

    /// Ask the device to report calibration for a range
    pub fn calibration_request(range: u8) -> Self {
        Self::new(codes::CALIBRATION, [range])
    }

    /// Switch on sample streaming
    pub fn enable_measurement() -> Self {
        Self::new(codes::MEASUREMENT, [0x01, 0x01])
    }

    /// Total size of the encoded frame
    pub fn encoded_len(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }

    /// Encode the frame, rejecting payloads whose length cannot be expressed
    pub fn encode(&self) -> Result<Bytes> {
        self.encode_with_limit(u16::MAX as usize)
    }

    /// Encode the frame, rejecting anything longer than `limit` bytes
    pub fn encode_with_limit(&self, limit: usize) -> Result<Bytes> {
        let total = self.encoded_len();
        let limit = limit.min(u16::MAX as usize);
        if total > limit {
            return Err(ProtocolError::FrameTooLarge { len: total, limit });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(HEADER);
        buf.put_u8(RESERVED);
        buf.put_u16(total as u16);
        buf.put_u8(self.code);
        buf.put_slice(&self.payload);

        let crc = crc16(&buf);
        buf.put_u16_le(crc);
        buf.put_u8(TRAILER);

        Ok(buf.freeze())
    }

    /// Parse an inbound buffer without checking its checksum.
    ///
    /// Only the minimum length and header byte are validated; the footer is
    /// stripped as-is.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_FRAME_LEN {
            return Err(ProtocolError::malformed(format!(
                "{} bytes, need at least {}",
                data.len(),
                MIN_FRAME_LEN
            )));
        }
        if data[0] != HEADER {
            return Err(ProtocolError::malformed(format!("bad header byte {:#04x}", data[0])));
        }

        Ok(Self {
            code: data[4],
            payload: data[5..data.len() - FOOTER_LEN].to_vec(),
        })
    }

    /// Parse an inbound buffer and verify its trailing checksum
    pub fn parse_verified(data: &[u8]) -> Result<Self> {
        let frame = Self::parse(data)?;

        let split = data.len() - FOOTER_LEN;
        let expected = crc16(&data[..split]);
        let actual = u16::from_le_bytes([data[split], data[split + 1]]);
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        Ok(frame)
    }

    /// Parse with or without checksum verification
    pub fn parse_with(data: &[u8], verify_checksum: bool) -> Result<Self> {
        if verify_checksum {
            Self::parse_verified(data)
        } else {
            Self::parse(data)
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#04x}] {}", self.code, hex::encode(&self.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_golden_vector() {
        let encoded = Frame::set_period(2000).encode().unwrap();
        assert_eq!(
            encoded.as_ref(),
            &[0xAA, 0x00, 0x00, 0x0C, 0x31, 0xD0, 0x07, 0x00, 0x00, 0x78, 0x5E, 0x7E]
        );
    }

    #[test]
    fn test_calibration_request_golden_vector() {
        let encoded = Frame::calibration_request(0).encode().unwrap();
        assert_eq!(encoded.as_ref(), &[0xAA, 0x00, 0x00, 0x09, 0x35, 0x00, 0xDF, 0x43, 0x7E]);

        let encoded = Frame::calibration_request(1).encode().unwrap();
        assert_eq!(encoded.as_ref(), &[0xAA, 0x00, 0x00, 0x09, 0x35, 0x01, 0x1E, 0x83, 0x7E]);
    }

    #[test]
    fn test_enable_measurement_golden_vector() {
        let encoded = Frame::enable_measurement().encode().unwrap();
        assert_eq!(encoded.as_ref(), &[0xAA, 0x00, 0x00, 0x0A, 0x37, 0x01, 0x01, 0x63, 0x4C, 0x7E]);
    }

    #[test]
    fn test_length_field_covers_whole_frame() {
        let frame = Frame::new(0x40, vec![0u8; 300]);
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), 308);
        assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), 308);
    }

    #[test]
    fn test_parse_recovers_encoded_frame() {
        let original = Frame::select_range(1);
        let encoded = original.encode().unwrap();

        assert_eq!(Frame::parse(&encoded).unwrap(), original);
        assert_eq!(Frame::parse_verified(&encoded).unwrap(), original);
    }

    #[test]
    fn test_parse_rejects_short_buffers() {
        let encoded = Frame::calibration_request(0).encode().unwrap();
        for len in 0..MIN_FRAME_LEN {
            let err = Frame::parse(&encoded[..len]).unwrap_err();
            assert!(err.is_framing());
        }
    }

    #[test]
    fn test_parse_rejects_wrong_header() {
        let mut raw = Frame::calibration_request(0).encode().unwrap().to_vec();
        raw[0] = 0xAB;
        assert!(matches!(Frame::parse(&raw), Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_lenient_parse_ignores_checksum() {
        let mut raw = Frame::calibration_request(0).encode().unwrap().to_vec();
        raw[6] ^= 0xFF;

        assert!(Frame::parse(&raw).is_ok());
        assert!(matches!(
            Frame::parse_verified(&raw),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
        assert!(Frame::parse_with(&raw, true).is_err());
        assert!(Frame::parse_with(&raw, false).is_ok());
    }

    #[test]
    fn test_write_limit_enforced() {
        let frame = Frame::new(0x31, vec![0u8; 20]);
        assert!(frame.encode_with_limit(28).is_ok());
        assert_eq!(
            frame.encode_with_limit(20).unwrap_err(),
            ProtocolError::FrameTooLarge { len: 28, limit: 20 }
        );
    }

    #[test]
    fn test_display_uses_hex_payload() {
        assert_eq!(Frame::set_period(2000).to_string(), "[0x31] d0070000");
    }
}
