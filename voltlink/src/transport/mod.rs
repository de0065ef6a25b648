/*!
Physical link abstraction.

A [`Transport`] carries encoded frames to the sensor and hands back a
channel of raw notification buffers. Implementations:

- [`simulated::SimulatedSensor`] - in-process sensor emulator
- `ble::BleTransport` - Bluetooth LE GATT link (feature `ble`)
*/

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(feature = "ble")]
pub mod ble;
#[cfg(test)]
pub mod mock;
pub mod simulated;

/// Raw notification buffers, in delivery order
pub type NotificationRx = mpsc::UnboundedReceiver<Vec<u8>>;

/// Sending half of [`NotificationRx`], held by transports
pub type NotificationTx = mpsc::UnboundedSender<Vec<u8>>;

/// Failures of the physical link; terminal for the current session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("not connected")]
    NotConnected,

    /// Peer went away or the notification stream closed
    #[error("link lost")]
    Lost,
}

impl LinkError {
    pub fn connect(err: impl std::fmt::Display) -> Self {
        Self::Connect(err.to_string())
    }

    pub fn subscribe(err: impl std::fmt::Display) -> Self {
        Self::Subscribe(err.to_string())
    }

    pub fn write(err: impl std::fmt::Display) -> Self {
        Self::Write(err.to_string())
    }
}

/// A link to one already-identified sensor.
///
/// All methods are called from the engine task only.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Establish the physical link
    async fn connect(&mut self) -> Result<(), LinkError>;

    /// Register for notifications; buffers arrive on the returned channel
    async fn subscribe(&mut self) -> Result<NotificationRx, LinkError>;

    /// Write one encoded frame
    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Whether the peer is still reachable
    async fn is_connected(&self) -> bool;

    /// Release the link; safe to call more than once
    async fn disconnect(&mut self);

    /// Short label for logs
    fn describe(&self) -> String;
}
