/*!
Bluetooth LE transport built on `btleplug`.

The sensor exposes a UART-style GATT service: commands are written to one
characteristic, notifications arrive on another. The peer address is
configured up front; this module only looks up the handle for that address
and never pairs.
*/

use std::str::FromStr;
use std::time::Duration;

use btleplug::api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{LinkError, NotificationRx, Transport};
use crate::config::LinkConfig;

/// Interval between checks for the peer while the adapter scans
const LOOKUP_INTERVAL: Duration = Duration::from_millis(250);

pub struct BleTransport {
    address: BDAddr,
    notify_uuid: Uuid,
    write_uuid: Uuid,
    /// Set once a scan is started so teardown can stop it
    scanning: Option<Adapter>,
    /// Set before the connect request goes out so teardown always finds it
    peripheral: Option<Peripheral>,
    notify_char: Option<Characteristic>,
    write_char: Option<Characteristic>,
    pump: Option<JoinHandle<()>>,
}

impl BleTransport {
    /// Parse the peer address and characteristic identifiers
    pub fn new(link: &LinkConfig) -> Result<Self, LinkError> {
        let address = BDAddr::from_str(&link.peer_address)
            .map_err(|e| LinkError::connect(format!("bad peer address {:?}: {}", link.peer_address, e)))?;
        let notify_uuid = Uuid::parse_str(&link.notify_uuid)
            .map_err(|e| LinkError::connect(format!("bad notify uuid: {}", e)))?;
        let write_uuid = Uuid::parse_str(&link.write_uuid)
            .map_err(|e| LinkError::connect(format!("bad write uuid: {}", e)))?;

        Ok(Self {
            address,
            notify_uuid,
            write_uuid,
            scanning: None,
            peripheral: None,
            notify_char: None,
            write_char: None,
            pump: None,
        })
    }

    async fn adapter() -> Result<Adapter, LinkError> {
        let manager = Manager::new().await.map_err(LinkError::connect)?;
        manager
            .adapters()
            .await
            .map_err(LinkError::connect)?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::connect("no Bluetooth adapter found"))
    }

    async fn known_peripheral(&self, adapter: &Adapter) -> Result<Option<Peripheral>, LinkError> {
        let peripherals = adapter.peripherals().await.map_err(LinkError::connect)?;
        Ok(peripherals.into_iter().find(|p| p.address() == self.address))
    }

    /// Resolve the handle for the configured address.
    ///
    /// The platform may only surface a handle once the adapter has seen an
    /// advertisement, so scan until it appears. The caller bounds this with
    /// the connect timeout.
    async fn lookup(&mut self, adapter: &Adapter) -> Result<Peripheral, LinkError> {
        if let Some(peripheral) = self.known_peripheral(adapter).await? {
            return Ok(peripheral);
        }

        debug!("Peer {} not cached, scanning", self.address);
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(LinkError::connect)?;
        self.scanning = Some(adapter.clone());
        loop {
            tokio::time::sleep(LOOKUP_INTERVAL).await;
            if let Some(peripheral) = self.known_peripheral(adapter).await? {
                self.stop_scan().await;
                return Ok(peripheral);
            }
        }
    }

    async fn stop_scan(&mut self) {
        if let Some(adapter) = self.scanning.take() {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }

    fn characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, LinkError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| LinkError::connect(format!("characteristic {} not found", uuid)))
    }
}

impl Transport for BleTransport {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let adapter = Self::adapter().await?;
        let peripheral = self.lookup(&adapter).await?;

        // The connect future may be dropped by the caller's timeout after the
        // platform has already brought the link up
        self.peripheral = Some(peripheral.clone());
        peripheral.connect().await.map_err(LinkError::connect)?;
        peripheral.discover_services().await.map_err(LinkError::connect)?;

        self.notify_char = Some(Self::characteristic(&peripheral, self.notify_uuid)?);
        self.write_char = Some(Self::characteristic(&peripheral, self.write_uuid)?);

        info!("🔌 BLE link to {} established", self.address);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<NotificationRx, LinkError> {
        let peripheral = self.peripheral.as_ref().ok_or(LinkError::NotConnected)?;
        let notify_char = self.notify_char.as_ref().ok_or(LinkError::NotConnected)?;

        peripheral.subscribe(notify_char).await.map_err(LinkError::subscribe)?;
        let mut stream = peripheral.notifications().await.map_err(LinkError::subscribe)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let notify_uuid = self.notify_uuid;
        self.pump = Some(tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != notify_uuid {
                    continue;
                }
                if tx.send(notification.value).is_err() {
                    break;
                }
            }
            debug!("BLE notification stream ended");
        }));

        Ok(rx)
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let peripheral = self.peripheral.as_ref().ok_or(LinkError::NotConnected)?;
        let write_char = self.write_char.as_ref().ok_or(LinkError::NotConnected)?;

        peripheral
            .write(write_char, frame, WriteType::WithoutResponse)
            .await
            .map_err(LinkError::write)
    }

    async fn is_connected(&self) -> bool {
        match self.peripheral.as_ref() {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn disconnect(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.stop_scan().await;
        if let Some(peripheral) = self.peripheral.take() {
            if !peripheral.is_connected().await.unwrap_or(true) {
                debug!("Peer {} already disconnected", self.address);
            } else if let Err(e) = peripheral.disconnect().await {
                warn!("BLE disconnect from {} failed: {}", self.address, e);
            }
        }
        self.notify_char = None;
        self.write_char = None;
    }

    fn describe(&self) -> String {
        format!("BLE peer {}", self.address)
    }
}
