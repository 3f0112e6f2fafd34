//! Scale engine
//!
//! [`ScaleEngine`] is the public face of the crate. `start` opens the port in
//! the caller (so a missing device is reported immediately) and then hands the
//! link to a dedicated acquisition thread that runs
//! read → decode → parse → filter until `stop`.
//!
//! Results cross the thread boundary only through channels owned by the
//! engine:
//! - the latest [`StableWeight`] and [`HealthSnapshot`] live in `watch`
//!   channels, replaced whole on every update;
//! - every new [`StableWeight`] is also broadcast to subscribers, each with a
//!   bounded buffer that drops its oldest entries when the subscriber falls
//!   behind.
//!
//! ```no_run
//! use scalelink_core::{ScaleConfig, ScaleEngine};
//!
//! let engine = ScaleEngine::new();
//! engine.start(ScaleConfig::for_port("/dev/ttyUSB0"))?;
//! match engine.current_weight() {
//!     Ok(weight) if engine.health().is_healthy() => println!("{}", weight.reading),
//!     _ => println!("no trusted weight yet"),
//! }
//! engine.stop();
//! # Ok::<(), scalelink_core::ConnectionError>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::ScaleConfig;
use crate::error::{ConnectionError, EngineError, NotAvailable, TransportError};
use crate::frame::FrameDecoder;
use crate::parser::WeightParser;
use crate::reading::StableWeight;
use crate::stability::StabilityFilter;
use crate::supervisor::{ConnectionState, ConnectionSupervisor, ErrorAction, HealthSnapshot};
use crate::trace;
use crate::transport::{Connector, SerialConnector, Transport};

/// Values buffered per subscriber before the oldest are dropped
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;

/// Granularity of interruptible back-off sleeps
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Requests from the engine handle to the acquisition loop
#[derive(Debug)]
enum Command {
    Write(Vec<u8>),
}

/// Publication side of the engine, shared with the acquisition thread
#[derive(Debug)]
struct Shared {
    weight: watch::Sender<Option<StableWeight>>,
    health: watch::Sender<HealthSnapshot>,
    events: broadcast::Sender<StableWeight>,
}

impl Shared {
    fn publish_weight(&self, weight: StableWeight) {
        self.weight.send_replace(Some(weight));
        // No subscribers is not an error
        let _ = self.events.send(weight);
    }

    fn publish_health(&self, snapshot: HealthSnapshot) {
        self.health.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn mark_disconnected(&self) {
        self.health.send_if_modified(|current| {
            if current.state == ConnectionState::Disconnected {
                return false;
            }
            current.state = ConnectionState::Disconnected;
            current.since = chrono::Utc::now();
            true
        });
    }
}

/// Handle to a running acquisition thread
struct Worker {
    stop: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
    tare: Option<Vec<u8>>,
    thread: JoinHandle<()>,
}

/// Serial scale reading engine
pub struct ScaleEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Default for ScaleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaleEngine {
    pub fn new() -> Self {
        Self::with_subscriber_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Engine whose subscribers each buffer up to `capacity` values
    pub fn with_subscriber_buffer(capacity: usize) -> Self {
        let (weight, _) = watch::channel(None);
        let (health, _) = watch::channel(HealthSnapshot::default());
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                weight,
                health,
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Open the configured serial port and start acquiring
    pub fn start(&self, config: ScaleConfig) -> Result<(), ConnectionError> {
        self.start_with(config, Box::new(SerialConnector))
    }

    /// Start acquiring through `connector`, which is also used for reconnects
    pub fn start_with(
        &self,
        config: ScaleConfig,
        mut connector: Box<dyn Connector>,
    ) -> Result<(), ConnectionError> {
        let mut worker = self.lock_worker();
        if let Some(running) = worker.as_ref() {
            if !running.thread.is_finished() {
                return Err(ConnectionError::AlreadyRunning);
            }
        }
        if let Some(finished) = worker.take() {
            let _ = finished.thread.join();
        }

        config
            .validate()
            .map_err(|e| ConnectionError::InvalidConfig(e.to_string()))?;

        let mut supervisor = ConnectionSupervisor::new(&config.supervisor);
        supervisor.on_connecting();
        self.shared.publish_health(supervisor.snapshot());

        let transport = match connector.open(&config.serial) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(port = %config.serial.port, error = %e, "failed to open scale");
                supervisor.on_open_failed(&e);
                self.shared.publish_health(supervisor.snapshot());
                return Err(e);
            }
        };
        supervisor.on_open_ok();
        self.shared.publish_health(supervisor.snapshot());
        tracing::info!(link = %transport.describe(), "scale engine started");

        let stop = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let tare = config.tare_bytes();
        let port = config.serial.port.clone();
        let acquisition = Acquisition {
            decoder: FrameDecoder::from_config(&config.framing),
            parser: WeightParser::from_config(&config.format),
            filter: StabilityFilter::from_config(&config.stability)
                .resume_from(*self.shared.weight.borrow()),
            config,
            connector,
            transport: Some(transport),
            supervisor,
            shared: Arc::clone(&self.shared),
            stop: Arc::clone(&stop),
            commands: command_rx,
        };

        let thread = thread::Builder::new()
            .name("scalelink-acquisition".to_string())
            .spawn(move || acquisition.run())
            .map_err(|e| {
                self.shared.mark_disconnected();
                ConnectionError::OpenFailed {
                    port,
                    reason: format!("failed to spawn acquisition thread: {e}"),
                }
            })?;

        *worker = Some(Worker {
            stop,
            commands,
            tare,
            thread,
        });
        Ok(())
    }

    /// Latest stable weight; never blocks on the acquisition loop
    pub fn current_weight(&self) -> Result<StableWeight, NotAvailable> {
        (*self.shared.weight.borrow()).ok_or(NotAvailable)
    }

    /// Stream of new stable weights from now on
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.shared.events.subscribe(),
        }
    }

    pub fn health(&self) -> ConnectionState {
        self.shared.health.borrow().state
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.shared.health.borrow().clone()
    }

    /// Receiver notified on every health change
    pub fn health_receiver(&self) -> watch::Receiver<HealthSnapshot> {
        self.shared.health.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| !w.thread.is_finished())
    }

    /// Queue the configured tare command for the device
    pub fn tare(&self) -> Result<(), EngineError> {
        let worker = self.lock_worker();
        let worker = worker.as_ref().ok_or(EngineError::NotRunning)?;
        let bytes = worker.tare.clone().ok_or(EngineError::TareUnsupported)?;
        worker
            .commands
            .send(Command::Write(bytes))
            .map_err(|_| EngineError::NotRunning)
    }

    /// Stop acquiring and close the port.
    ///
    /// Blocks until the acquisition thread has exited, at most about one read
    /// timeout. A concurrent `start` waits for that too, so it never opens the
    /// port while the old run still holds it. The last stable weight stays
    /// available. Calling `stop` on a stopped engine does nothing.
    pub fn stop(&self) {
        let mut slot = self.lock_worker();
        let Some(worker) = slot.take() else {
            return;
        };
        worker.stop.store(true, Ordering::SeqCst);
        if worker.thread.join().is_err() {
            tracing::error!("acquisition thread panicked");
        }
        self.shared.mark_disconnected();
        drop(slot);
        tracing::info!("scale engine stopped");
    }

    /// Stop, then start again with a new configuration
    pub fn restart(&self, config: ScaleConfig) -> Result<(), ConnectionError> {
        self.stop();
        self.start(config)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ScaleEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Live feed of stable weights for one consumer
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<StableWeight>,
}

impl Subscription {
    /// Wait for the next value; `None` once the engine is gone.
    ///
    /// Values the subscriber was too slow to receive are skipped.
    pub async fn next(&mut self) -> Option<StableWeight> {
        loop {
            match self.rx.recv().await {
                Ok(weight) => return Some(weight),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "subscriber lagged, oldest weights dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered value without waiting
    pub fn try_next(&mut self) -> Option<StableWeight> {
        loop {
            match self.rx.try_recv() {
                Ok(weight) => return Some(weight),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "subscriber lagged, oldest weights dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Blocking variant of [`Subscription::next`] for non-async callers
    pub fn blocking_next(&mut self) -> Option<StableWeight> {
        loop {
            match self.rx.blocking_recv() {
                Ok(weight) => return Some(weight),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "subscriber lagged, oldest weights dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// State owned by the acquisition thread
struct Acquisition {
    config: ScaleConfig,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    decoder: FrameDecoder,
    parser: WeightParser,
    filter: StabilityFilter,
    supervisor: ConnectionSupervisor,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Acquisition {
    fn run(mut self) {
        tracing::debug!(port = %self.config.serial.port, "acquisition loop running");
        while !self.stopped() {
            if self.transport.is_none() {
                self.reconnect();
                continue;
            }
            self.drain_commands();
            self.read_once();
            if let Some(beat) = self.filter.tick(Instant::now()) {
                tracing::trace!(sequence = beat.sequence, "heartbeat");
                self.shared.publish_weight(beat);
            }
            self.shared.publish_health(self.supervisor.snapshot());
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.supervisor.on_stopped();
        self.shared.publish_health(self.supervisor.snapshot());
        tracing::debug!("acquisition loop exited");
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn read_once(&mut self) {
        let timeout = self.config.serial.read_timeout();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.read(timeout) {
            Ok(chunk) => {
                self.supervisor.on_read_ok();
                if self.config.trace_raw {
                    trace::log_chunk(&self.config.serial.port, &chunk);
                }
                self.handle_chunk(&chunk);
            }
            Err(e) => self.handle_transport_error(e),
        }
    }

    fn handle_chunk(&mut self, chunk: &[u8]) {
        let now = Instant::now();
        for result in self.decoder.feed(chunk) {
            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "framing error");
                    self.supervisor.on_frame_error(e.to_string(), now);
                    continue;
                }
            };

            let raw = frame.as_text();
            match self.parser.parse(frame) {
                Ok(reading) => {
                    tracing::debug!(frame = %raw, %reading, "frame decoded");
                    self.supervisor.on_frame_ok();
                    if let Some(stable) = self.filter.push(reading, now) {
                        tracing::info!(
                            sequence = stable.sequence,
                            weight = %stable.reading,
                            "stable weight"
                        );
                        self.shared.publish_weight(stable);
                    }
                }
                Err(e) => {
                    tracing::warn!(frame = %raw, error = %e, "frame rejected");
                    self.supervisor.on_frame_error(e.to_string(), now);
                }
            }
        }
    }

    fn handle_transport_error(&mut self, err: TransportError) {
        match &err {
            TransportError::Timeout => tracing::debug!("read timed out"),
            _ => tracing::warn!(error = %err, "transport error"),
        }
        if self.supervisor.on_transport_error(&err, Instant::now()) == ErrorAction::Reconnect {
            self.drop_transport();
        }
    }

    fn drain_commands(&mut self) {
        while let Some(transport) = self.transport.as_mut() {
            let Ok(command) = self.commands.try_recv() else {
                return;
            };
            match command {
                Command::Write(bytes) => {
                    tracing::info!(len = bytes.len(), "sending command to scale");
                    if let Err(e) = transport.write(&bytes) {
                        self.handle_transport_error(e);
                    }
                }
            }
        }
    }

    fn reconnect(&mut self) {
        let delay = self.supervisor.next_backoff();
        self.shared.publish_health(self.supervisor.snapshot());
        tracing::info!(
            port = %self.config.serial.port,
            delay_ms = delay.as_millis() as u64,
            attempt = self.supervisor.snapshot().reconnect_attempts,
            "reconnecting"
        );
        if self.sleep_unless_stopped(delay) {
            return;
        }

        self.supervisor.on_connecting();
        self.shared.publish_health(self.supervisor.snapshot());
        match self.connector.open(&self.config.serial) {
            Ok(transport) => {
                tracing::info!(link = %transport.describe(), "scale reconnected");
                self.decoder.reset();
                self.filter.clear_window();
                self.discard_stale_commands();
                self.supervisor.on_open_ok();
                self.transport = Some(transport);
            }
            Err(e) => {
                tracing::warn!(port = %self.config.serial.port, error = %e, "reconnect failed");
                self.supervisor.on_open_failed(&e);
            }
        }
        self.shared.publish_health(self.supervisor.snapshot());
    }

    /// Commands queued while the link was down are not replayed
    fn discard_stale_commands(&mut self) {
        let mut discarded = 0;
        while self.commands.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::warn!(discarded, "dropping commands queued while disconnected");
        }
    }

    fn drop_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    /// Sleep for `delay`; returns true if a stop was requested meanwhile
    fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.stopped() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            thread::sleep(remaining.min(STOP_POLL_INTERVAL));
        }
    }
}
