/*!
Measurement pipeline.

Turns raw notification bytes into state changes: calibration reports land in
the [`CalibrationTable`], samples become the published voltage. This is the
only code that writes [`RuntimeState::voltage`].
*/

use chrono::Local;
use tracing::{debug, warn};
use voltlink_shared::{CalibrationTable, CalibrationUpdate, Frame, Notification, ProtocolError, Sample};

use crate::state::RuntimeState;

/// What an inbound buffer turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Calibration accepted for the given range
    Calibration(u8),
    /// Sample converted to a new voltage
    Sample,
    /// Dropped: malformed, implausible, uncalibrated or not measuring
    Dropped,
    /// Well-formed but not something the host consumes
    Ignored,
}

/// Counters kept for the end-of-session summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub malformed: u64,
    pub calibrations: u64,
    pub calibrations_rejected: u64,
    pub samples: u64,
    pub samples_dropped: u64,
}

/// Decodes notifications and applies them to engine state
#[derive(Debug, Clone, Default)]
pub struct MeasurementPipeline {
    verify_checksum: bool,
    stats: PipelineStats,
}

impl MeasurementPipeline {
    pub fn new(verify_checksum: bool) -> Self {
        Self {
            verify_checksum,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Handle one inbound notification buffer.
    ///
    /// Never fails: anything unusable is counted, logged and dropped.
    pub fn handle(&mut self, data: &[u8], state: &mut RuntimeState, table: &mut CalibrationTable) -> Handled {
        self.stats.frames += 1;

        let frame = match Frame::parse_with(data, self.verify_checksum) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed += 1;
                if e.is_framing() {
                    debug!("Dropping malformed frame {}: {}", hex::encode(data), e);
                } else {
                    warn!("Dropping unusable frame {}: {}", hex::encode(data), e);
                }
                return Handled::Dropped;
            }
        };

        match Notification::decode(&frame) {
            Ok(Some(Notification::Calibration(update))) => self.accept_calibration(update, table),
            Ok(Some(Notification::Sample(sample))) => self.accept_sample(sample, state, table),
            Ok(None) => {
                debug!("Ignoring notification {}", frame);
                Handled::Ignored
            }
            Err(e @ ProtocolError::ImplausibleCalibration { .. }) => {
                self.stats.calibrations_rejected += 1;
                warn!("⚠️ Discarding calibration: {}", e);
                Handled::Dropped
            }
            Err(e) => {
                debug!("Discarding notification {}: {}", frame, e);
                Handled::Dropped
            }
        }
    }

    fn accept_calibration(&mut self, update: CalibrationUpdate, table: &mut CalibrationTable) -> Handled {
        debug!(
            "📐 Calibration for range {}: slope={} intercept={}",
            update.range, update.entry.slope, update.entry.intercept
        );
        self.stats.calibrations += 1;
        table.apply(update);
        Handled::Calibration(update.range)
    }

    fn accept_sample(&mut self, sample: Sample, state: &mut RuntimeState, table: &CalibrationTable) -> Handled {
        if !state.measuring {
            return Handled::Dropped;
        }

        let Some(entry) = table.get(sample.range) else {
            self.stats.samples_dropped += 1;
            debug!("No calibration for range {}, dropping sample", sample.range);
            return Handled::Dropped;
        };

        self.stats.samples += 1;
        state.last_reading = Some(entry.apply(sample.raw));
        state.last_sample_at = Some(Local::now());
        Self::refresh_voltage(state);
        Handled::Sample
    }

    /// Re-derive the voltage from the last reading and the current tare offset
    pub fn refresh_voltage(state: &mut RuntimeState) {
        if let Some(reading) = state.last_reading {
            state.voltage = reading - state.tare_offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltlink_shared::protocol::codes;
    use voltlink_shared::CalibrationEntry;

    fn calibration_frame(range: u8, slope: f32, intercept: f32) -> Vec<u8> {
        let mut payload = vec![range];
        payload.extend_from_slice(&slope.to_le_bytes());
        payload.extend_from_slice(&intercept.to_le_bytes());
        Frame::new(codes::CALIBRATION, payload).encode().unwrap().to_vec()
    }

    fn sample_frame(range: u8, raw: u16) -> Vec<u8> {
        Frame::new(codes::MEASUREMENT, Sample { range, raw }.encode())
            .encode()
            .unwrap()
            .to_vec()
    }

    fn measuring_state() -> RuntimeState {
        let mut state = RuntimeState::new();
        state.measuring = true;
        state
    }

    #[test]
    fn test_sample_applies_calibration() {
        let mut pipeline = MeasurementPipeline::new(false);
        let mut state = measuring_state();
        let mut table = CalibrationTable::new(&[0, 1]);
        table.set(0, CalibrationEntry { slope: 2.0, intercept: 1.0 });

        assert_eq!(pipeline.handle(&sample_frame(0, 100), &mut state, &mut table), Handled::Sample);
        assert_eq!(state.voltage, 201.0);
        assert!(state.last_sample_at.is_some());

        state.tare_offset = 50.0;
        pipeline.handle(&sample_frame(0, 100), &mut state, &mut table);
        assert_eq!(state.voltage, 151.0);
    }

    #[test]
    fn test_sample_ignored_when_not_measuring() {
        let mut pipeline = MeasurementPipeline::new(false);
        let mut state = RuntimeState::new();
        let mut table = CalibrationTable::new(&[0]);
        table.set(0, CalibrationEntry { slope: 2.0, intercept: 1.0 });

        assert_eq!(pipeline.handle(&sample_frame(0, 100), &mut state, &mut table), Handled::Dropped);
        assert_eq!(state.voltage, 0.0);
        assert_eq!(state.last_reading, None);
    }

    #[test]
    fn test_sample_without_calibration_dropped() {
        let mut pipeline = MeasurementPipeline::new(false);
        let mut state = measuring_state();
        let mut table = CalibrationTable::new(&[0, 1]);
        table.set(0, CalibrationEntry { slope: 2.0, intercept: 1.0 });

        assert_eq!(pipeline.handle(&sample_frame(1, 100), &mut state, &mut table), Handled::Dropped);
        assert_eq!(state.voltage, 0.0);
        assert_eq!(pipeline.stats().samples_dropped, 1);
    }

    #[test]
    fn test_calibration_accepted_regardless_of_measuring() {
        let mut pipeline = MeasurementPipeline::new(false);
        let mut state = RuntimeState::new();
        let mut table = CalibrationTable::new(&[0, 1]);

        let handled = pipeline.handle(&calibration_frame(1, 99.999, -0.5), &mut state, &mut table);
        assert_eq!(handled, Handled::Calibration(1));
        assert!(table.is_calibrated(1));
    }

    #[test]
    fn test_implausible_calibration_discarded() {
        let mut pipeline = MeasurementPipeline::new(false);
        let mut state = RuntimeState::new();
        let mut table = CalibrationTable::new(&[0]);
        table.set(0, CalibrationEntry { slope: 2.0, intercept: 1.0 });

        for slope in [100.0, 0.0, -250.0] {
            let handled = pipeline.handle(&calibration_frame(0, slope, 3.0), &mut state, &mut table);
            assert_eq!(handled, Handled::Dropped);
        }
        assert_eq!(table.get(0), Some(CalibrationEntry { slope: 2.0, intercept: 1.0 }));
        assert_eq!(pipeline.stats().calibrations_rejected, 3);
    }

    #[test]
    fn test_malformed_input_leaves_state_untouched() {
        let mut pipeline = MeasurementPipeline::new(false);
        let mut state = measuring_state();
        state.voltage = 3.3;
        let mut table = CalibrationTable::new(&[0]);
        table.set(0, CalibrationEntry { slope: 2.0, intercept: 1.0 });
        let before_table = table.clone();

        let mut wrong_header = sample_frame(0, 100);
        wrong_header[0] = 0x55;
        for data in [&[][..], &[0xAA, 0x00, 0x00][..], &wrong_header[..]] {
            assert_eq!(pipeline.handle(data, &mut state, &mut table), Handled::Dropped);
        }

        assert_eq!(state.voltage, 3.3);
        assert_eq!(table, before_table);
        assert_eq!(pipeline.stats().malformed, 3);
    }

    #[test]
    fn test_checksum_verification_option() {
        let mut table = CalibrationTable::new(&[0]);
        let mut state = RuntimeState::new();
        let mut corrupted = calibration_frame(0, 2.0, 1.0);
        let crc_index = corrupted.len() - 3;
        corrupted[crc_index] ^= 0x01;

        let mut strict = MeasurementPipeline::new(true);
        assert_eq!(strict.handle(&corrupted, &mut state, &mut table), Handled::Dropped);
        assert_eq!(table.get(0), None);

        let mut lenient = MeasurementPipeline::new(false);
        assert_eq!(lenient.handle(&corrupted, &mut state, &mut table), Handled::Calibration(0));
    }

    #[test]
    fn test_unknown_code_ignored() {
        let mut pipeline = MeasurementPipeline::new(false);
        let mut state = RuntimeState::new();
        let mut table = CalibrationTable::new(&[0]);
        let data = Frame::select_range(0).encode().unwrap();

        assert_eq!(pipeline.handle(&data, &mut state, &mut table), Handled::Ignored);
    }

    #[test]
    fn test_refresh_voltage_after_tare() {
        let mut state = measuring_state();
        state.last_reading = Some(4.0);
        state.voltage = 4.0;

        state.tare_offset += state.voltage;
        MeasurementPipeline::refresh_voltage(&mut state);
        assert_eq!(state.voltage, 0.0);

        // Second tare with no new sample changes nothing
        state.tare_offset += state.voltage;
        MeasurementPipeline::refresh_voltage(&mut state);
        assert_eq!(state.tare_offset, 4.0);
        assert_eq!(state.voltage, 0.0);
    }
}
