/*!
One connection to the sensor, from connect to teardown.

A [`Session`] runs on a single task and owns everything it mutates: the
runtime state, the calibration table and the transport. Callers reach it
only through the command channel and the [`StatusBoard`].

Startup sequence:

1. connect (bounded by `link.connect_timeout_ms`)
2. subscribe to notifications and let the link settle
3. acquire calibration for each configured range
4. select range 0 and start servicing commands
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError};
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use voltlink_shared::command::sample_period_us;
use voltlink_shared::{CalibrationTable, Command, Frame};

use crate::config::AppConfig;
use crate::pipeline::{Handled, MeasurementPipeline};
use crate::state::{status, LinkState, RuntimeState, StatusBoard};
use crate::transport::{LinkError, NotificationRx, Transport};

/// Wake-up reason of the command loop
enum Event {
    Notification(Option<Vec<u8>>),
    Tick,
}

/// Engine state for a single connection
pub struct Session<T: Transport> {
    config: AppConfig,
    transport: T,
    notifications: Option<NotificationRx>,
    commands: Receiver<Command>,
    running: Arc<AtomicBool>,
    board: StatusBoard,
    state: RuntimeState,
    calibration: CalibrationTable,
    pipeline: MeasurementPipeline,
    calibration_arrived: bool,
    frames_sent: u64,
}

impl<T: Transport> Session<T> {
    pub fn new(
        config: AppConfig,
        transport: T,
        commands: Receiver<Command>,
        running: Arc<AtomicBool>,
        board: StatusBoard,
    ) -> Self {
        let session = Self {
            calibration: CalibrationTable::new(&config.calibration.ranges),
            pipeline: MeasurementPipeline::new(config.protocol.verify_inbound_checksum),
            config,
            transport,
            notifications: None,
            commands,
            running,
            board,
            state: RuntimeState::new(),
            calibration_arrived: false,
            frames_sent: 0,
        };
        session.publish();
        session
    }

    /// Drive the session to completion and return its final state.
    ///
    /// The link is always released and `connected` cleared on return.
    pub async fn run(mut self) -> RuntimeState {
        let outcome = match self.startup().await {
            Ok(()) => self.serve().await,
            Err(e) => Err(e),
        };
        self.finish(outcome).await
    }

    /// Connect, subscribe, calibrate and select the initial range
    pub async fn startup(&mut self) -> Result<(), LinkError> {
        let peer = self.config.link.peer_address.clone();
        self.transition(LinkState::Connecting, status::connecting(&peer));
        info!("🔌 Connecting to {}", self.transport.describe());

        let connect_timeout = self.config.link.connect_timeout();
        match timeout(connect_timeout, self.transport.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(LinkError::ConnectTimeout(connect_timeout)),
        }
        self.state.connected = true;
        self.transition(LinkState::Subscribing, status::SUBSCRIBING);

        self.notifications = Some(self.transport.subscribe().await?);
        let settled = Instant::now() + self.config.link.settle_delay();
        self.pump_until(settled, false).await?;

        self.transition(LinkState::CalibratingRanges, status::FETCHING_CALIBRATION);
        let ranges = self.config.calibration.ranges.clone();
        for range in ranges {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.acquire_calibration(range).await?;
        }

        self.transition(LinkState::Ready, status::READY);
        info!("✅ Link ready");
        self.dispatch(Command::SetRange(0)).await
    }

    /// Request calibration for `range` until it arrives or attempts run out.
    ///
    /// Returns whether the range ended up with a real calibration. Running
    /// out of attempts is not an error; samples on that range are dropped
    /// until a later notification supplies one.
    pub async fn acquire_calibration(&mut self, range: u8) -> Result<bool, LinkError> {
        let attempts = self.config.calibration.max_attempts;
        let window = self.config.calibration.attempt_timeout();

        for attempt in 1..=attempts {
            self.calibration_arrived = false;
            self.send(Frame::calibration_request(range)).await?;

            let deadline = Instant::now() + window;
            if !self.pump_until(deadline, true).await? {
                debug!("Calibration request for range {} timed out (attempt {}/{})", range, attempt, attempts);
                continue;
            }
            if self.calibration.is_calibrated(range) {
                info!("📐 Calibration for range {} acquired (attempt {}/{})", range, attempt, attempts);
                return Ok(true);
            }
            debug!("Range {} still uncalibrated after attempt {}/{}", range, attempt, attempts);
        }

        warn!("⚠️ Calibration unavailable for range {} after {} attempts", range, attempts);
        Ok(false)
    }

    /// Process notifications until `deadline`.
    ///
    /// With `until_calibration`, returns `true` as soon as a calibration is
    /// accepted. Returns `false` when the deadline passes.
    async fn pump_until(&mut self, deadline: Instant, until_calibration: bool) -> Result<bool, LinkError> {
        loop {
            if until_calibration && self.calibration_arrived {
                return Ok(true);
            }

            let notifications = self.notifications.as_mut().ok_or(LinkError::NotConnected)?;
            let next = tokio::select! {
                data = notifications.recv() => Some(data),
                _ = sleep_until(deadline) => None,
            };

            match next {
                Some(Some(data)) => self.on_notification(&data),
                Some(None) => return Err(LinkError::Lost),
                None => return Ok(false),
            }
        }
    }

    /// Service commands and notifications until shutdown or link loss
    async fn serve(&mut self) -> Result<(), LinkError> {
        let mut ticker = interval(self.config.link.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.running.load(Ordering::SeqCst) {
            let notifications = self.notifications.as_mut().ok_or(LinkError::NotConnected)?;
            let event = tokio::select! {
                data = notifications.recv() => Event::Notification(data),
                _ = ticker.tick() => Event::Tick,
            };

            match event {
                Event::Notification(Some(data)) => self.on_notification(&data),
                Event::Notification(None) => return Err(LinkError::Lost),
                Event::Tick => {
                    if !self.transport.is_connected().await {
                        return Err(LinkError::Lost);
                    }
                    match self.commands.try_recv() {
                        Ok(command) => self.dispatch(command).await?,
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => {
                            info!("Command channel closed, stopping session");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply one command to the runtime state
    pub async fn dispatch(&mut self, command: Command) -> Result<(), LinkError> {
        debug!("Dispatching {:?}", command);

        match command {
            Command::Start => {
                self.state.measuring = true;
                self.send(Frame::enable_measurement()).await?;
                self.state.transition(LinkState::Measuring, status::MEASURING);
            }
            Command::Stop => {
                self.state.measuring = false;
                self.state.transition(LinkState::Ready, status::STOPPED);
            }
            Command::Tare => {
                self.state.tare_offset += self.state.voltage;
                MeasurementPipeline::refresh_voltage(&mut self.state);
                info!("⚖️ Tare offset now {:.6}", self.state.tare_offset);
            }
            Command::SetRange(range) => {
                self.state.target_range_idx = range;
                self.send(Frame::select_range(range)).await?;
                self.send(Frame::calibration_request(range)).await?;
            }
            Command::SetFrequency(hz) => match sample_period_us(hz) {
                Ok(period_us) => {
                    info!("⏱️ Sample period {} us ({} Hz)", period_us, hz);
                    self.send(Frame::set_period(period_us)).await?;
                }
                Err(e) => warn!("Rejected {:?}: {}", command, e),
            },
        }

        self.publish();
        Ok(())
    }

    /// Encode and write a frame
    async fn send(&mut self, frame: Frame) -> Result<(), LinkError> {
        let encoded = match frame.encode_with_limit(self.config.link.max_write_len) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Not sending {}: {}", frame, e);
                return Ok(());
            }
        };

        debug!("➡️ {} ({})", frame, hex::encode(&encoded));
        self.transport.write(&encoded).await?;
        self.frames_sent += 1;
        Ok(())
    }

    fn on_notification(&mut self, data: &[u8]) {
        if let Handled::Calibration(_) = self.pipeline.handle(data, &mut self.state, &mut self.calibration) {
            self.calibration_arrived = true;
        }
        self.publish();
    }

    fn transition(&mut self, link_state: LinkState, message: impl Into<String>) {
        self.state.transition(link_state, message);
        self.publish();
    }

    fn publish(&self) {
        self.board.publish(&self.state, &self.calibration);
    }

    async fn finish(mut self, outcome: Result<(), LinkError>) -> RuntimeState {
        self.notifications = None;
        self.transport.disconnect().await;
        self.state.connected = false;
        self.state.measuring = false;

        match outcome {
            Ok(()) => {
                info!("🛑 Session closed");
                self.transition(LinkState::Disconnected, status::DISCONNECTED);
            }
            Err(LinkError::Lost) => {
                warn!("📴 Link to {} lost", self.transport.describe());
                self.transition(LinkState::Disconnected, status::LINK_LOST);
            }
            Err(e) => {
                error!("❌ Link error: {}", e);
                let message = status::error(&e, self.config.link.status_error_limit);
                self.transition(LinkState::Errored, message);
            }
        }

        let stats = self.pipeline.stats();
        info!("📈 Session final stats:");
        info!("   Frames sent: {}", self.frames_sent);
        info!("   Notifications: {}", stats.frames);
        info!("   Malformed: {}", stats.malformed);
        info!("   Calibrations: {} accepted, {} rejected", stats.calibrations, stats.calibrations_rejected);
        info!("   Samples: {} used, {} dropped", stats.samples, stats.samples_dropped);
        let uncalibrated: Vec<u8> = self
            .calibration
            .ranges()
            .filter(|&range| !self.calibration.is_calibrated(range))
            .collect();
        if !uncalibrated.is_empty() {
            info!("   Uncalibrated ranges: {:?}", uncalibrated);
        }

        self.state
    }
}
