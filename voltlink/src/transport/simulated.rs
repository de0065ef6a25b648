/*!
In-process sensor emulator.

Behaves like the real device closely enough to exercise the whole engine
without hardware: answers calibration requests, follows range and period
changes, and streams synthetic samples once measurement is enabled.
*/

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};
use voltlink_shared::protocol::codes;
use voltlink_shared::{CalibrationEntry, CalibrationUpdate, Frame, Sample};

use super::{LinkError, NotificationRx, NotificationTx, Transport};
use crate::config::SimulatorConfig;

/// Shortest sample period the emulator will stream at
const MIN_PERIOD_US: u32 = 1_000;

/// Transport backed by an emulated sensor task
pub struct SimulatedSensor {
    config: SimulatorConfig,
    peer: String,
    connected: Arc<AtomicBool>,
    to_device: Option<mpsc::UnboundedSender<Frame>>,
    device: Option<JoinHandle<()>>,
}

impl SimulatedSensor {
    pub fn new(config: SimulatorConfig, peer: impl Into<String>) -> Self {
        Self {
            config,
            peer: peer.into(),
            connected: Arc::new(AtomicBool::new(false)),
            to_device: None,
            device: None,
        }
    }
}

impl Transport for SimulatedSensor {
    async fn connect(&mut self) -> Result<(), LinkError> {
        info!("🧪 Simulated sensor {} connected", self.peer);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<NotificationRx, LinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (host_tx, host_rx) = mpsc::unbounded_channel();

        let device = DeviceModel::new(&self.config);
        let connected = Arc::clone(&self.connected);
        self.device = Some(tokio::spawn(async move {
            device.run(host_rx, notify_tx).await;
            connected.store(false, Ordering::SeqCst);
        }));
        self.to_device = Some(host_tx);

        Ok(notify_rx)
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }

        let frame = Frame::parse_verified(frame).map_err(LinkError::write)?;
        let to_device = self.to_device.as_ref().ok_or(LinkError::NotConnected)?;
        to_device
            .send(frame)
            .map_err(|_| LinkError::write("simulated device stopped"))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.to_device = None;
        if let Some(device) = self.device.take() {
            device.abort();
        }
    }

    fn describe(&self) -> String {
        format!("simulated sensor {}", self.peer)
    }
}

/// Device-side state of the emulator
struct DeviceModel {
    calibrations: BTreeMap<u8, CalibrationEntry>,
    range: u8,
    period: Duration,
    streaming: bool,
    tick: u64,
    raw_base: u16,
    raw_swing: u16,
    reply_delay: Duration,
}

impl DeviceModel {
    fn new(config: &SimulatorConfig) -> Self {
        Self {
            calibrations: config
                .ranges
                .iter()
                .map(|r| (r.range, CalibrationEntry { slope: r.slope, intercept: r.intercept }))
                .collect(),
            range: 0,
            period: Self::period_from_us(config.sample_period_us),
            streaming: false,
            tick: 0,
            raw_base: config.raw_base,
            raw_swing: config.raw_swing,
            reply_delay: Duration::from_millis(config.reply_delay_ms),
        }
    }

    fn period_from_us(period_us: u32) -> Duration {
        Duration::from_micros(period_us.max(MIN_PERIOD_US) as u64)
    }

    async fn run(mut self, mut from_host: mpsc::UnboundedReceiver<Frame>, notify: NotificationTx) {
        let mut next_sample = Instant::now() + self.period;

        loop {
            tokio::select! {
                frame = from_host.recv() => match frame {
                    Some(frame) => {
                        let was_streaming = self.streaming;
                        if !self.on_frame(frame, &notify).await {
                            break;
                        }
                        if self.streaming && !was_streaming {
                            next_sample = Instant::now() + self.period;
                        }
                    }
                    None => break,
                },
                _ = sleep_until(next_sample), if self.streaming => {
                    if !Self::emit(&notify, Frame::new(codes::MEASUREMENT, self.next_sample().encode())) {
                        break;
                    }
                    next_sample += self.period;
                }
            }
        }

        debug!("🧪 Simulated device stopped");
    }

    /// React to one host frame; false once the host has gone away
    async fn on_frame(&mut self, frame: Frame, notify: &NotificationTx) -> bool {
        debug!("🧪 Device received {}", frame);

        match frame.code {
            codes::CALIBRATION => {
                let Some(&range) = frame.payload.first() else {
                    return true;
                };
                let Some(&entry) = self.calibrations.get(&range) else {
                    warn!("🧪 No simulated calibration for range {}", range);
                    return true;
                };
                sleep(self.reply_delay).await;
                let update = CalibrationUpdate { range, entry };
                return Self::emit(notify, Frame::new(codes::CALIBRATION, update.encode()));
            }
            codes::SELECT_RANGE => {
                if let Some(&range) = frame.payload.first() {
                    self.range = range;
                }
            }
            codes::SET_PERIOD => {
                if let Ok(bytes) = <[u8; 4]>::try_from(frame.payload.as_slice()) {
                    self.period = Self::period_from_us(u32::from_le_bytes(bytes));
                }
            }
            codes::MEASUREMENT => {
                self.streaming = frame.payload.first() == Some(&0x01);
            }
            other => debug!("🧪 Device ignoring command {:#04x}", other),
        }
        true
    }

    fn next_sample(&mut self) -> Sample {
        self.tick += 1;
        let phase = self.tick as f64 * 0.05;
        let raw = self.raw_base as f64 + self.raw_swing as f64 * phase.sin();
        Sample {
            range: self.range,
            raw: raw.clamp(0.0, u16::MAX as f64) as u16,
        }
    }

    fn emit(notify: &NotificationTx, frame: Frame) -> bool {
        match frame.encode() {
            Ok(encoded) => notify.send(encoded.to_vec()).is_ok(),
            Err(e) => {
                warn!("🧪 Failed to encode simulated notification: {}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltlink_shared::Notification;

    fn encoded(frame: Frame) -> Vec<u8> {
        frame.encode().unwrap().to_vec()
    }

    async fn connected_sensor() -> (SimulatedSensor, NotificationRx) {
        let mut sensor = SimulatedSensor::new(SimulatorConfig::default(), "sim");
        sensor.connect().await.unwrap();
        let rx = sensor.subscribe().await.unwrap();
        (sensor, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_calibration_request() {
        let (mut sensor, mut rx) = connected_sensor().await;

        sensor.write(&encoded(Frame::calibration_request(1))).await.unwrap();
        let data = rx.recv().await.unwrap();
        let frame = Frame::parse_verified(&data).unwrap();

        let expected = &SimulatorConfig::default().ranges[1];
        assert_eq!(
            Notification::decode(&frame).unwrap(),
            Some(Notification::Calibration(CalibrationUpdate {
                range: 1,
                entry: CalibrationEntry { slope: expected.slope, intercept: expected.intercept },
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_after_enable() {
        let (mut sensor, mut rx) = connected_sensor().await;

        sensor.write(&encoded(Frame::select_range(1))).await.unwrap();
        sensor.write(&encoded(Frame::set_period(10_000))).await.unwrap();
        sensor.write(&encoded(Frame::enable_measurement())).await.unwrap();

        for _ in 0..3 {
            let data = rx.recv().await.unwrap();
            let frame = Frame::parse_verified(&data).unwrap();
            match Notification::decode(&frame).unwrap() {
                Some(Notification::Sample(sample)) => assert_eq!(sample.range, 1),
                other => panic!("unexpected notification {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_until_enabled() {
        let (_sensor, mut rx) = connected_sensor().await;
        let waited = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_link() {
        let (mut sensor, mut rx) = connected_sensor().await;
        sensor.disconnect().await;

        assert!(!sensor.is_connected().await);
        assert_eq!(
            sensor.write(&encoded(Frame::calibration_request(0))).await,
            Err(LinkError::NotConnected)
        );
        assert!(rx.recv().await.is_none());
    }
}
