//! The live telemetry loop
//!
//! Two tasks share the work. The publisher polls the device on a fixed
//! interval, assembles a snapshot and broadcasts it. The controller answers
//! client requests, swaps the active setup and writes odometer readings
//! back to the store. Store I/O runs with no lock held. An outbound gate is
//! taken only around installing a new setup and announcing it, so that
//! everything a save broadcasts reaches subscribers before the first
//! snapshot produced with the new rules.

use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{Outbound, Subscriber};
use super::{
    assemble, ChannelValue, ClientMessage, ServerMessage, Snapshot, SubscriberId,
    SubscriberRegistry,
};
use crate::convert::{ConvertError, UnitConverter};
use crate::odometer::Odometer;
use crate::protocol::table::fields;
use crate::protocol::{DeviceSession, PollError, PolledFrames, SessionState, Transport};
use crate::setup::{ConfigStore, Setup, SetupError};
use crate::style::DrivingStyle;

/// Odometer readings waiting to be written before new ones are dropped
const ODOMETER_QUEUE: usize = 4;

/// Telemetry loop settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Time between snapshots
    pub interval: Duration,
    /// Longest a single poll may take before the cycle is skipped
    pub poll_timeout: Duration,
    /// Messages queued per subscriber before it is dropped
    pub subscriber_queue: usize,
    /// Pending client requests
    pub control_queue: usize,
}

impl TelemetryConfig {
    /// Settings for a given cadence. Polls may use four fifths of it.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            poll_timeout: interval * 4 / 5,
            subscriber_queue: 32,
            control_queue: 64,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::with_interval(Duration::from_millis(100))
    }
}

/// A client request tagged with its sender
#[derive(Debug, Clone)]
pub struct ControlRequest {
    /// Who asked
    pub from: SubscriberId,
    /// What they asked for
    pub message: ClientMessage,
}

/// Odometer value to persist, tagged with the setup generation it was
/// accumulated on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometerReading {
    /// Distance in kilometres
    pub km: f64,
    /// Setup generation the reading is based on
    pub generation: u64,
}

/// Setup and the rule set built from it
#[derive(Debug)]
struct ActiveSetup {
    setup: Setup,
    converter: UnitConverter,
    generation: u64,
}

/// Client-facing handle to a running telemetry loop
#[derive(Debug, Clone)]
pub struct TelemetryHub {
    registry: SubscriberRegistry,
    control: mpsc::Sender<ControlRequest>,
    subscriber_queue: usize,
}

impl TelemetryHub {
    /// The subscriber registry
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Register a new subscriber and return its queue
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Outbound>) {
        let (subscriber, rx) = Subscriber::channel(self.subscriber_queue);
        (self.registry.register(subscriber), rx)
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.registry.unregister(id);
    }

    /// Queue a client request without waiting.
    ///
    /// A request that finds the queue full is answered with an error alert
    /// to its sender. Returns `false` once the loop has stopped.
    pub fn submit(&self, from: SubscriberId, message: ClientMessage) -> bool {
        match self.control.try_send(ControlRequest { from, message }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = %from, "control queue full, rejecting request");
                self.reject(from, "too many pending requests, try again");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Tell one subscriber its message could not be understood
    pub fn reject(&self, to: SubscriberId, reason: impl std::fmt::Display) {
        self.registry.send_to(to, ServerMessage::error(reason));
    }
}

/// Polls the device and broadcasts snapshots
pub struct Publisher<T> {
    session: Arc<Mutex<DeviceSession<T>>>,
    active: watch::Receiver<Arc<ActiveSetup>>,
    registry: SubscriberRegistry,
    gate: Arc<tokio::sync::Mutex<()>>,
    odometer: Odometer,
    odometer_writes: mpsc::Sender<OdometerReading>,
    style: DrivingStyle,
    generation: u64,
    poll_timeout: Duration,
    started: Instant,
    last_tick: Option<Instant>,
}

impl<T: Transport + 'static> Publisher<T> {
    /// Current session state
    pub fn session_state(&self) -> SessionState {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status()
    }

    /// Current odometer reading in kilometres
    pub fn odometer_km(&self) -> f64 {
        self.odometer.km()
    }

    /// Run one cycle: poll, assemble and broadcast.
    ///
    /// Returns the snapshot, or `None` when the cycle produced nothing
    /// because the device is unreachable or the poll overran.
    pub async fn publish_tick(&mut self) -> Option<Snapshot> {
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .map(|last| now.duration_since(last))
            .unwrap_or_default();
        self.last_tick = Some(now);

        let frames = match self.poll().await {
            Ok(frames) => frames,
            Err(PollError::Disconnected) => {
                debug!("device unreachable, skipping cycle");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "poll failed, skipping cycle");
                return None;
            }
        };

        let gate = Arc::clone(&self.gate);
        let _outbound = gate.lock().await;
        let active = self.active.borrow().clone();

        if active.generation != self.generation {
            self.odometer.rebase(active.setup.odo.value);
            self.style = DrivingStyle::new(&active.setup.style);
            self.generation = active.generation;
        }
        self.advance_odometer(&frames, elapsed);

        let mut snapshot = assemble(
            &frames,
            &active.converter,
            self.odometer.km(),
            self.started.elapsed(),
        );
        if let Some(tps) = snapshot.number(fields::TPS) {
            self.style.update(tps, elapsed);
        }
        snapshot.insert("style", ChannelValue::Text(self.style.status().to_string()));
        self.registry.broadcast(ServerMessage::Data {
            data: snapshot.clone(),
        });
        Some(snapshot)
    }

    async fn poll(&self) -> Result<PolledFrames, PollError> {
        let session = Arc::clone(&self.session);
        let job = tokio::task::spawn_blocking(move || {
            let mut session = match session.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Err(PollError::Busy),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            session.tick()
        });

        match tokio::time::timeout(self.poll_timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(PollError::Worker(e.to_string())),
            Err(_) => Err(PollError::Timeout),
        }
    }

    fn advance_odometer(&mut self, frames: &PolledFrames, elapsed: Duration) {
        let Ok(Some(speed_kmh)) = frames.field(fields::VSS) else {
            return;
        };
        if !self.odometer.advance(speed_kmh as f64, elapsed) {
            return;
        }

        let reading = OdometerReading {
            km: self.odometer.km(),
            generation: self.generation,
        };
        match self.odometer_writes.try_send(reading) {
            Ok(()) => self.odometer.mark_persisted(),
            Err(TrySendError::Full(_)) => debug!("odometer write pending, retrying next tick"),
            Err(TrySendError::Closed(_)) => {
                warn!(km = reading.km, "controller stopped, odometer not persisted");
                self.odometer.mark_persisted();
            }
        }
    }
}

/// Applies client requests
pub struct Controller<S> {
    store: Arc<S>,
    active: watch::Sender<Arc<ActiveSetup>>,
    registry: SubscriberRegistry,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<S: ConfigStore + 'static> Controller<S> {
    /// The setup currently driving conversions
    pub fn active_setup(&self) -> Setup {
        self.active.borrow().setup.clone()
    }

    /// How many times the active setup has been replaced
    pub fn generation(&self) -> u64 {
        self.active.borrow().generation
    }

    /// Handle one client request
    pub async fn handle(&self, request: ControlRequest) {
        let ControlRequest { from, message } = request;
        match message {
            ClientMessage::Setup => {
                let setup = match self.blocking(|store| store.load()).await {
                    Ok(setup) => setup,
                    Err(e) => {
                        warn!(error = %e, "could not read stored setup, sending active one");
                        self.active_setup()
                    }
                };
                self.registry.send_to(from, ServerMessage::Setup { setup });
            }
            ClientMessage::Save { data } => {
                self.apply(move |store| store.save(data), "setup saved!")
                    .await;
            }
            ClientMessage::Reset => {
                self.apply(|store| store.reset(), "setup reset!").await;
            }
        }
    }

    /// Write an odometer reading to the store.
    ///
    /// Readings accumulated on an older setup generation are dropped, since
    /// a save in between may have replaced the stored value.
    pub async fn record_odometer(&self, reading: OdometerReading) {
        let current = self.generation();
        if reading.generation != current {
            debug!(
                km = reading.km,
                reading_generation = reading.generation,
                current,
                "dropping odometer reading from a replaced setup"
            );
            return;
        }
        let km = reading.km;
        if let Err(e) = self.blocking(move |store| store.update_odometer(km)).await {
            error!(error = %e, "failed to persist odometer");
        }
    }

    async fn apply<F>(&self, op: F, success: &str)
    where
        F: FnOnce(&S) -> Result<Setup, SetupError> + Send + 'static,
    {
        let result = self
            .blocking(op)
            .await
            .and_then(|setup| match UnitConverter::from_setup(&setup) {
                Ok(converter) => Ok((setup, converter)),
                Err(e) => Err(SetupError::from(crate::setup::ValidationError::from(e))),
            });

        match result {
            Ok((setup, converter)) => {
                let _outbound = self.gate.lock().await;
                self.install(setup, converter);
                info!(generation = self.generation(), "setup applied");
                self.registry.broadcast(ServerMessage::refresh());
                self.registry.broadcast(ServerMessage::success(success));
            }
            Err(e) => {
                warn!(error = %e, "setup rejected, keeping active rules");
                self.registry.broadcast(ServerMessage::error(&e));
            }
        }
    }

    fn install(&self, setup: Setup, converter: UnitConverter) {
        let generation = self.generation() + 1;
        self.active.send_replace(Arc::new(ActiveSetup {
            setup,
            converter,
            generation,
        }));
    }

    async fn blocking<F, R>(&self, op: F) -> Result<R, SetupError>
    where
        F: FnOnce(&S) -> Result<R, SetupError> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || op(&*store)).await {
            Ok(result) => result,
            Err(e) => Err(SetupError::Worker(e.to_string())),
        }
    }
}

/// The pieces of a telemetry loop, for driving it by hand
pub struct TelemetryParts<T, S> {
    /// Publish path
    pub publisher: Publisher<T>,
    /// Control path
    pub controller: Controller<S>,
    /// Client requests queued by the hub
    pub requests: mpsc::Receiver<ControlRequest>,
    /// Odometer readings queued by the publisher
    pub odometer: mpsc::Receiver<OdometerReading>,
    /// Client-facing handle
    pub hub: TelemetryHub,
}

/// A telemetry loop that has been built but not started
pub struct TelemetryLoop<T, S> {
    parts: TelemetryParts<T, S>,
    interval: Duration,
}

impl<T, S> TelemetryLoop<T, S>
where
    T: Transport + 'static,
    S: ConfigStore + 'static,
{
    /// Build the loop around a session and a setup store
    pub fn new(
        session: DeviceSession<T>,
        store: S,
        setup: Setup,
        config: TelemetryConfig,
    ) -> Result<Self, ConvertError> {
        let converter = UnitConverter::from_setup(&setup)?;
        let odometer = Odometer::new(setup.odo.value);
        let style = DrivingStyle::new(&setup.style);
        let (active_tx, active_rx) = watch::channel(Arc::new(ActiveSetup {
            setup,
            converter,
            generation: 0,
        }));

        let store = Arc::new(store);
        let registry = SubscriberRegistry::new();
        let gate = Arc::new(tokio::sync::Mutex::new(()));
        let (control_tx, control_rx) = mpsc::channel(config.control_queue.max(1));
        let (odometer_tx, odometer_rx) = mpsc::channel(ODOMETER_QUEUE);

        Ok(Self {
            parts: TelemetryParts {
                publisher: Publisher {
                    session: Arc::new(Mutex::new(session)),
                    active: active_rx,
                    registry: registry.clone(),
                    gate: Arc::clone(&gate),
                    odometer,
                    odometer_writes: odometer_tx,
                    style,
                    generation: 0,
                    poll_timeout: config.poll_timeout,
                    started: Instant::now(),
                    last_tick: None,
                },
                controller: Controller {
                    store,
                    active: active_tx,
                    registry: registry.clone(),
                    gate,
                },
                requests: control_rx,
                odometer: odometer_rx,
                hub: TelemetryHub {
                    registry,
                    control: control_tx,
                    subscriber_queue: config.subscriber_queue,
                },
            },
            interval: config.interval,
        })
    }

    /// Handle for subscribing and submitting requests
    pub fn hub(&self) -> TelemetryHub {
        self.parts.hub.clone()
    }

    /// Take the loop apart to drive it by hand
    pub fn into_parts(self) -> TelemetryParts<T, S> {
        self.parts
    }

    /// Start the publisher and controller tasks
    pub fn spawn(self, shutdown: CancellationToken) -> TelemetryHandle {
        let interval = self.interval;
        let TelemetryParts {
            mut publisher,
            controller,
            mut requests,
            mut odometer,
            hub,
        } = self.into_parts();

        let cancel = shutdown.clone();
        let publish = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        publisher.publish_tick().await;
                    }
                }
            }
            debug!("publisher stopped");
        });

        let cancel = shutdown;
        let control = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = requests.recv() => match request {
                        Some(request) => controller.handle(request).await,
                        None => break,
                    },
                    Some(reading) = odometer.recv() => controller.record_odometer(reading).await,
                }
            }
            debug!("controller stopped");
        });

        TelemetryHandle {
            hub,
            tasks: vec![publish, control],
        }
    }
}

/// A running telemetry loop
pub struct TelemetryHandle {
    hub: TelemetryHub,
    tasks: Vec<JoinHandle<()>>,
}

impl TelemetryHandle {
    /// Handle for subscribing and submitting requests
    pub fn hub(&self) -> TelemetryHub {
        self.hub.clone()
    }

    /// Wait for both tasks to finish after shutdown was requested
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "telemetry task failed");
            }
        }
    }
}
