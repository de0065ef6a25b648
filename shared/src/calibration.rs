/*!
Per-range linear calibration.

The sensor reports one `(slope, intercept)` pair per measurement range. A
raw ADC count converts to volts as `raw * slope + intercept`.
*/

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::protocol::codes;

/// Slopes at or above this magnitude are treated as noise
pub const MAX_ABS_SLOPE: f32 = 100.0;

/// Slope the device reports before it has been calibrated
pub const UNCALIBRATED_SLOPE: f32 = 1.0;

/// Minimum payload length of a calibration notification
pub const CALIBRATION_PAYLOAD_LEN: usize = 9;

/// A single accepted calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub slope: f32,
    pub intercept: f32,
}

impl CalibrationEntry {
    /// Build an entry, rejecting implausible values
    pub fn new(range: u8, slope: f32, intercept: f32) -> Result<Self> {
        if !is_plausible_slope(slope) || !intercept.is_finite() {
            return Err(ProtocolError::ImplausibleCalibration { range, slope });
        }
        Ok(Self { slope, intercept })
    }

    /// Convert a raw sample to volts, before tare
    pub fn apply(&self, raw: u16) -> f64 {
        raw as f64 * self.slope as f64 + self.intercept as f64
    }

    /// Whether the device has not produced a real calibration yet
    pub fn is_placeholder(&self) -> bool {
        self.slope == UNCALIBRATED_SLOPE
    }
}

/// Whether a slope is nonzero and below [`MAX_ABS_SLOPE`] in magnitude
pub fn is_plausible_slope(slope: f32) -> bool {
    slope != 0.0 && slope.abs() < MAX_ABS_SLOPE
}

/// A decoded calibration notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationUpdate {
    pub range: u8,
    pub entry: CalibrationEntry,
}

impl CalibrationUpdate {
    /// Decode a calibration notification payload.
    ///
    /// Layout: `range:u8, slope:f32le, intercept:f32le`. Trailing bytes are
    /// ignored.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < CALIBRATION_PAYLOAD_LEN {
            return Err(ProtocolError::ShortPayload {
                code: codes::CALIBRATION,
                len: payload.len(),
                need: CALIBRATION_PAYLOAD_LEN,
            });
        }

        let range = payload[0];
        let slope = f32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
        let intercept = f32::from_le_bytes([payload[5], payload[6], payload[7], payload[8]]);

        Ok(Self {
            range,
            entry: CalibrationEntry::new(range, slope, intercept)?,
        })
    }

    /// Encode as a notification payload (device side)
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(CALIBRATION_PAYLOAD_LEN);
        payload.push(self.range);
        payload.extend_from_slice(&self.entry.slope.to_le_bytes());
        payload.extend_from_slice(&self.entry.intercept.to_le_bytes());
        payload
    }
}

/// Most recently accepted calibration for each range
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationTable {
    entries: BTreeMap<u8, Option<CalibrationEntry>>,
}

impl CalibrationTable {
    /// Create a table with an empty slot for each range
    pub fn new(ranges: &[u8]) -> Self {
        Self {
            entries: ranges.iter().map(|&range| (range, None)).collect(),
        }
    }

    /// Calibration for a range, if one has been accepted
    pub fn get(&self, range: u8) -> Option<CalibrationEntry> {
        self.entries.get(&range).copied().flatten()
    }

    /// Store an entry, replacing whatever the range held
    pub fn set(&mut self, range: u8, entry: CalibrationEntry) {
        self.entries.insert(range, Some(entry));
    }

    /// Store a decoded notification
    pub fn apply(&mut self, update: CalibrationUpdate) {
        self.set(update.range, update.entry);
    }

    /// Whether the range holds a real (non-placeholder) calibration
    pub fn is_calibrated(&self, range: u8) -> bool {
        self.get(range).is_some_and(|entry| !entry.is_placeholder())
    }

    /// Known range ids in ascending order
    pub fn ranges(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.keys().copied()
    }

    /// Iterate over every slot
    pub fn iter(&self) -> impl Iterator<Item = (u8, Option<CalibrationEntry>)> + '_ {
        self.entries.iter().map(|(&range, &entry)| (range, entry))
    }
}
