/*!
Engine runtime state and the snapshots published to callers.

The engine task owns [`RuntimeState`] outright. After every change it
publishes an immutable [`Snapshot`] into a [`StatusBoard`], which caller
threads read without touching engine internals.
*/

use std::fmt::Display;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use voltlink_shared::{CalibrationEntry, CalibrationTable};

/// Status strings shown to callers
pub mod status {
    use super::Display;

    pub const WAITING: &str = "waiting for connection";
    pub const SUBSCRIBING: &str = "connected | subscribing";
    pub const FETCHING_CALIBRATION: &str = "connected | fetching calibration";
    pub const READY: &str = "ready";
    pub const MEASURING: &str = "measuring";
    pub const STOPPED: &str = "stopped";
    pub const LINK_LOST: &str = "link lost";
    pub const DISCONNECTED: &str = "disconnected";

    /// Status while the link is being established
    pub fn connecting(peer: &str) -> String {
        format!("connecting to {}...", peer)
    }

    /// Error status, keeping at most `limit` characters of the description
    pub fn error(err: &impl Display, limit: usize) -> String {
        let description: String = err.to_string().chars().take(limit).collect();
        format!("error: {}", description)
    }
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Subscribing,
    CalibratingRanges,
    Ready,
    Measuring,
    Errored,
}

impl LinkState {
    /// Whether the session has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Errored)
    }
}

/// Mutable state owned by the engine task
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub link_state: LinkState,
    pub connected: bool,
    pub measuring: bool,
    pub voltage: f64,
    pub tare_offset: f64,
    pub target_range_idx: u8,
    pub status_message: String,
    /// Calibrated value of the last accepted sample, before tare
    pub last_reading: Option<f64>,
    pub last_sample_at: Option<DateTime<Local>>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self {
            link_state: LinkState::Disconnected,
            connected: false,
            measuring: false,
            voltage: 0.0,
            tare_offset: 0.0,
            target_range_idx: 0,
            status_message: status::WAITING.to_string(),
            last_reading: None,
            last_sample_at: None,
        }
    }

    /// Move to a lifecycle state with a new status message
    pub fn transition(&mut self, link_state: LinkState, message: impl Into<String>) {
        self.link_state = link_state;
        self.status_message = message.into();
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Calibration of one range as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeCalibration {
    pub range: u8,
    pub calibration: Option<CalibrationEntry>,
}

/// Read-only view of the engine handed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub connected: bool,
    pub measuring: bool,
    pub voltage: f64,
    pub target_range_idx: u8,
    pub status_message: String,
    pub state: LinkState,
    pub calibration: Vec<RangeCalibration>,
    pub last_sample_at: Option<DateTime<Local>>,
}

impl Snapshot {
    pub fn capture(state: &RuntimeState, table: &CalibrationTable) -> Self {
        Self {
            connected: state.connected,
            measuring: state.measuring,
            voltage: state.voltage,
            target_range_idx: state.target_range_idx,
            status_message: state.status_message.clone(),
            state: state.link_state,
            calibration: table
                .iter()
                .map(|(range, calibration)| RangeCalibration { range, calibration })
                .collect(),
            last_sample_at: state.last_sample_at,
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::capture(&RuntimeState::new(), &CalibrationTable::default())
    }
}

/// Latest snapshot, shared between the engine and its callers
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<Snapshot>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot
    pub fn publish(&self, state: &RuntimeState, table: &CalibrationTable) {
        let snapshot = Snapshot::capture(state, table);
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Copy of the latest snapshot
    pub fn read(&self) -> Snapshot {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Mark the engine as failed outside of a running session
    pub fn fail(&self, message: impl Into<String>) {
        let mut snapshot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.connected = false;
        snapshot.measuring = false;
        snapshot.state = LinkState::Errored;
        snapshot.status_message = message.into();
    }
}
