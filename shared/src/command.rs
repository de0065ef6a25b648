/*!
User intents accepted by the engine.
*/

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Numerator for converting a sample rate to a device period in microseconds
pub const PERIOD_NUMERATOR_US: u32 = 2_000_000;

/// A single caller intent, consumed exactly once by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Start,
    Stop,
    Tare,
    SetRange(u8),
    SetFrequency(u32),
}

impl Command {
    /// Build a command from its string kind and optional numeric value.
    ///
    /// Kinds match the names used by the HTTP front end: `START`, `STOP`,
    /// `TARE`, `SET_RANGE`, `SET_FREQ`. Matching is case-insensitive.
    pub fn parse(kind: &str, value: Option<i64>) -> Result<Self> {
        let command = match kind.to_ascii_uppercase().as_str() {
            "START" => Self::Start,
            "STOP" => Self::Stop,
            "TARE" => Self::Tare,
            "SET_RANGE" => {
                let value = require_value(kind, value)?;
                let range = u8::try_from(value)
                    .map_err(|_| ProtocolError::invalid_argument(format!("range {} out of bounds", value)))?;
                Self::SetRange(range)
            }
            "SET_FREQ" => {
                let value = require_value(kind, value)?;
                let hz = u32::try_from(value)
                    .map_err(|_| ProtocolError::invalid_argument(format!("frequency {} out of bounds", value)))?;
                Self::SetFrequency(hz)
            }
            other => return Err(ProtocolError::invalid_argument(format!("unknown command {:?}", other))),
        };
        command.validate()?;
        Ok(command)
    }

    /// Reject arguments that cannot produce a frame
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::SetFrequency(hz) => sample_period_us(hz).map(|_| ()),
            _ => Ok(()),
        }
    }
}

fn require_value(kind: &str, value: Option<i64>) -> Result<i64> {
    value.ok_or_else(|| ProtocolError::invalid_argument(format!("{} requires a value", kind)))
}

/// Device sample period for a frequency in hertz
pub fn sample_period_us(hz: u32) -> Result<u32> {
    if hz == 0 {
        return Err(ProtocolError::invalid_argument("frequency must be positive"));
    }
    Ok(PERIOD_NUMERATOR_US / hz)
}
