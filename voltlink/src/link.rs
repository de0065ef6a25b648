/*!
Caller-facing handle to the engine.

[`SensorLink`] is what request handlers hold. It is `Sync`, never blocks on
I/O, and talks to the engine only through the command channel and the
status board. Each [`SensorLink::start_link`] spawns a dedicated thread
running a single-threaded tokio runtime, so every state mutation happens on
one execution context.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use thiserror::Error;
use tracing::{error, info, warn};
use voltlink_shared::{Command, ProtocolError};

use crate::config::AppConfig;
use crate::session::Session;
use crate::state::{status, Snapshot, StatusBoard};
use crate::transport::simulated::SimulatedSensor;
use crate::transport::{LinkError, Transport};

/// Why a command was not queued
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("engine is not running")]
    NotRunning,

    #[error(transparent)]
    Invalid(#[from] ProtocolError),
}

/// Physical layer to start sessions on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Simulated,
    #[cfg(feature = "ble")]
    Ble,
}

/// Marks the engine stopped when its thread exits, even by panic
struct WorkerGuard {
    running: Arc<AtomicBool>,
    board: StatusBoard,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.board.fail("error: engine panicked");
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Thread-safe handle to the sensor engine
pub struct SensorLink {
    config: AppConfig,
    transport: TransportKind,
    board: StatusBoard,
    running: Arc<AtomicBool>,
    commands: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SensorLink {
    pub fn new(config: AppConfig, transport: TransportKind) -> Self {
        Self {
            config,
            transport,
            board: StatusBoard::new(),
            running: Arc::new(AtomicBool::new(false)),
            commands: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Start a session on the configured transport.
    ///
    /// Returns `false` if a session is already running.
    pub fn start_link(&self) -> bool {
        match self.transport {
            TransportKind::Simulated => self.start_with(|config: &AppConfig| {
                Ok(SimulatedSensor::new(config.simulator.clone(), config.link.peer_address.clone()))
            }),
            #[cfg(feature = "ble")]
            TransportKind::Ble => {
                self.start_with(|config: &AppConfig| crate::transport::ble::BleTransport::new(&config.link))
            }
        }
    }

    /// Start a session on a transport built inside the engine thread.
    ///
    /// Returns `false` if a session is already running or the thread could
    /// not be spawned.
    pub fn start_with<T, F>(&self, make_transport: F) -> bool
    where
        T: Transport + 'static,
        F: FnOnce(&AppConfig) -> Result<T, LinkError> + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        // The previous session has already finished; reap its thread
        if let Some(previous) = lock(&self.worker).take() {
            if previous.join().is_err() {
                warn!("Previous engine thread panicked");
            }
        }

        let (tx, rx) = unbounded();
        *lock(&self.commands) = Some(tx);

        let config = self.config.clone();
        let board = self.board.clone();
        let running = Arc::clone(&self.running);

        let spawned = thread::Builder::new()
            .name("voltlink-engine".to_string())
            .spawn(move || {
                let _guard = WorkerGuard {
                    running: Arc::clone(&running),
                    board: board.clone(),
                };

                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build engine runtime: {}", e);
                        board.fail(status::error(&e, config.link.status_error_limit));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let transport = match make_transport(&config) {
                        Ok(transport) => transport,
                        Err(e) => {
                            error!("❌ Failed to create transport: {}", e);
                            board.fail(status::error(&e, config.link.status_error_limit));
                            return;
                        }
                    };

                    let final_state = Session::new(config, transport, rx, running, board).run().await;
                    info!("Engine stopped: {}", final_state.status_message);
                });
            });

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                true
            }
            Err(e) => {
                error!("Failed to spawn engine thread: {}", e);
                self.board.fail(status::error(&e, self.config.link.status_error_limit));
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Queue a command for the engine without waiting for it to run
    pub fn enqueue_command(&self, command: Command) -> Result<(), CommandError> {
        command.validate()?;

        if !self.is_running() {
            return Err(CommandError::NotRunning);
        }
        let commands = lock(&self.commands);
        let sender = commands.as_ref().ok_or(CommandError::NotRunning)?;
        sender.send(command).map_err(|_| CommandError::NotRunning)
    }

    /// Queue a command given in string form, e.g. `("SET_FREQ", Some(1000))`
    pub fn enqueue(&self, kind: &str, value: Option<i64>) -> Result<(), CommandError> {
        let command = Command::parse(kind, value)?;
        self.enqueue_command(command)
    }

    /// Latest published engine state
    pub fn snapshot(&self) -> Snapshot {
        self.board.read()
    }

    /// Whether a session is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the session, release the link and wait for the engine thread
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.commands).take();

        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                warn!("Engine thread panicked during shutdown");
            }
        }
    }
}

impl Drop for SensorLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
