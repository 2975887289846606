// Control loop: zenoh intents in, vehicle/sensor state out
//
// The serial shell can only hold one conversation, so the vehicle lives on a
// single blocking worker fed by a job queue. Intents and sensor polls are
// serialized there and never interleave mid-command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{
    DeviceConfig, JOB_QUEUE_DEPTH, LOOP_HZ, SENSOR_POLL_PERIOD, TOPIC_CMD_INTENT, TOPIC_HEALTH,
    TOPIC_STATE_SENSORS, TOPIC_STATE_VEHICLE,
};
use crate::device::{DeviceError, LogSink, SerialTransport, Session, TracingLogSink, Transport};
use crate::messages::{Intent, RuntimeHealth, SensorSnapshot, VehicleStatus};
use crate::vehicle::{PollRound, Vehicle};

/// Everything needed to bring the runtime up
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub port: String,
    pub baudrate: u32,
    pub read_timeout: Duration,
    pub config: DeviceConfig,
    pub enable_control: bool,
}

/// Remote-control switch shared by the intent receiver and the device worker.
///
/// Closing it takes effect at the next intent boundary on both sides, so
/// intents already queued are dropped rather than executed.
#[derive(Debug, Clone)]
pub struct ControlGate(Arc<AtomicBool>);

impl ControlGate {
    pub fn new(open: bool) -> Self {
        Self(Arc::new(AtomicBool::new(open)))
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, open: bool) {
        self.0.store(open, Ordering::SeqCst);
    }

    pub fn admits(&self, intent: &Intent) -> bool {
        !intent.requires_control() || self.is_open()
    }

    /// Decide what, if anything, an incoming intent turns into on the job queue
    pub fn route(&self, intent: Intent) -> Option<Intent> {
        match intent {
            Intent::SetRemoteControl { enabled } => {
                info!("Remote control {}", if enabled { "enabled" } else { "disabled" });
                self.set(enabled);
                // Leaving remote control parks the vehicle
                (!enabled).then_some(Intent::SetHandbrake { engaged: true })
            }
            intent if self.admits(&intent) => Some(intent),
            intent => {
                debug!("Ignoring {:?}: remote control disabled", intent);
                None
            }
        }
    }
}

#[derive(Debug)]
enum Job {
    Intent(Intent),
    Poll,
    Shutdown,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Queue an admitted intent. Intents that need no remote control (stop,
/// handbrake) wait for room; the rest are dropped while the queue is full.
async fn enqueue(jobs: &mpsc::Sender<Job>, intent: Intent) -> bool {
    if intent.requires_control() {
        match jobs.try_send(Job::Intent(intent)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Device queue busy, dropping intent: {}", e);
                false
            }
        }
    } else {
        match jobs.send(Job::Intent(intent)).await {
            Ok(()) => true,
            Err(_) => {
                error!("Device worker gone, cannot deliver {:?}", intent);
                false
            }
        }
    }
}

/// Parse one intent payload, pass it through the gate and queue it; true if queued
async fn dispatch(gate: &ControlGate, jobs: &mpsc::Sender<Job>, payload: &[u8]) -> bool {
    match serde_json::from_slice::<Intent>(payload) {
        Ok(intent) => match gate.route(intent) {
            Some(intent) => enqueue(jobs, intent).await,
            None => false,
        },
        Err(e) => {
            warn!("Failed to parse intent: {}", e);
            false
        }
    }
}

/// What the worker reports back after each job
#[derive(Debug)]
struct Report {
    health: RuntimeHealth,
    status: VehicleStatus,
    sensors: Option<SensorSnapshot>,
    polled: bool,
}

/// Owns the vehicle; runs on a blocking thread.
///
/// A sensor round is taken one reading at a time, and queued jobs go first
/// between readings, so a stop never waits behind a whole round.
struct Worker<T: Transport> {
    vehicle: Vehicle<T>,
    gate: ControlGate,
    round: Option<PollRound>,
}

impl<T: Transport> Worker<T> {
    fn new(vehicle: Vehicle<T>, gate: ControlGate) -> Self {
        Self {
            vehicle,
            gate,
            round: None,
        }
    }

    fn report(
        &self,
        outcome: Result<(), DeviceError>,
        sensors: Option<SensorSnapshot>,
        polled: bool,
    ) -> Report {
        let health = match &outcome {
            _ if !self.vehicle.is_connected() => RuntimeHealth::Disconnected,
            Ok(()) => RuntimeHealth::Ok,
            Err(e) if e.is_recoverable() => {
                warn!("Device command failed: {}", e);
                RuntimeHealth::DeviceError
            }
            Err(e) => {
                error!("Device link failure: {}", e);
                RuntimeHealth::DeviceError
            }
        };

        Report {
            health,
            status: self.vehicle.status(self.gate.is_open()),
            sensors,
            polled,
        }
    }

    fn handle(&mut self, job: Job) -> Option<Report> {
        let outcome = match job {
            Job::Intent(intent) if !self.gate.admits(&intent) => {
                debug!("Dropping queued {:?}: remote control disabled", intent);
                return None;
            }
            Job::Intent(intent) => self.vehicle.apply(intent),
            Job::Poll => {
                if self.round.is_none() {
                    self.round = Some(PollRound::new());
                }
                return None;
            }
            Job::Shutdown => {
                self.round = None;
                if let Err(e) = self.vehicle.set_handbrake(true) {
                    warn!("Failed to stop motors on shutdown: {}", e);
                }
                self.vehicle.disconnect();
                Ok(())
            }
        };

        Some(self.report(outcome, None, false))
    }

    /// Take the next reading of the running sensor round, reporting when it ends
    fn advance_poll(&mut self) -> Option<Report> {
        let round = self.round.as_mut()?;
        match self.vehicle.poll_next(round) {
            Ok(false) => None,
            Ok(true) => {
                let snapshot = self.round.take().map(PollRound::into_snapshot);
                Some(self.report(Ok(()), snapshot, true))
            }
            Err(e) => {
                self.round = None;
                Some(self.report(Err(e), None, true))
            }
        }
    }

    fn run(mut self, mut jobs: mpsc::Receiver<Job>, reports: mpsc::UnboundedSender<Report>) {
        loop {
            let job = if self.round.is_some() {
                match jobs.try_recv() {
                    Ok(job) => Some(job),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match jobs.blocking_recv() {
                    Some(job) => Some(job),
                    None => break,
                }
            };

            let shutdown = matches!(job, Some(Job::Shutdown));
            let report = match job {
                Some(job) => self.handle(job),
                None => self.advance_poll(),
            };
            if let Some(report) = report {
                // Receiver gone means the loop is exiting
                let _ = reports.send(report);
            }
            if shutdown {
                debug!("Device worker stopped");
                return;
            }
        }

        warn!("Job queue closed without shutdown, parking vehicle");
        if let Some(report) = self.handle(Job::Shutdown) {
            let _ = reports.send(report);
        }
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    info!("Opening device on {}...", options.port);
    let sink: Arc<dyn LogSink> = Arc::new(TracingLogSink);
    let transport = SerialTransport::connect(
        &options.port,
        options.baudrate,
        options.read_timeout,
        sink,
    )?;
    let mut vehicle = Vehicle::new(Session::new(transport), options.config);
    let vehicle = tokio::task::spawn_blocking(move || vehicle.initialize().map(|()| vehicle)).await??;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_INTENT).await?;
    let pub_vehicle = session.declare_publisher(TOPIC_STATE_VEHICLE).await?;
    let pub_sensors = session.declare_publisher(TOPIC_STATE_SENSORS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let gate = ControlGate::new(options.enable_control);
    let mut status = vehicle.status(gate.is_open());
    let mut health = RuntimeHealth::Ok;

    let (jobs, job_rx) = mpsc::channel(JOB_QUEUE_DEPTH);
    let (report_tx, mut reports) = mpsc::unbounded_channel();
    let worker = Worker::new(vehicle, gate.clone());
    let worker = tokio::task::spawn_blocking(move || worker.run(job_rx, report_tx));

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut poll = interval(SENSOR_POLL_PERIOD);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut poll_pending = false;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, sensors every {}ms, remote control {}",
        LOOP_HZ,
        SENSOR_POLL_PERIOD.as_millis(),
        if gate.is_open() { "enabled" } else { "disabled" }
    );
    info!("Subscribed to: {}", TOPIC_CMD_INTENT);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_STATE_VEHICLE, TOPIC_STATE_SENSORS, TOPIC_HEALTH
    );

    let outcome: Result<(), BoxError> = async {
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = poll.tick() => {
                    if !poll_pending && jobs.try_send(Job::Poll).is_ok() {
                        poll_pending = true;
                    }
                    continue;
                }
                _ = &mut shutdown => {
                    info!("Shutting down");
                    return Ok(());
                }
            }

            // 1. Drain pending intents (non-blocking), queue the admitted ones
            while let Ok(Some(sample)) = subscriber.try_recv() {
                dispatch(&gate, &jobs, &sample.payload().to_bytes()).await;
            }

            // 2. Collect worker results
            while let Ok(report) = reports.try_recv() {
                if report.health != health {
                    info!("Device health: {:?}", report.health);
                }
                health = report.health;
                status = report.status;
                if report.polled {
                    poll_pending = false;
                }
                if let Some(snapshot) = report.sensors {
                    pub_sensors.put(serde_json::to_string(&snapshot)?).await?;
                }
            }
            status.remote_control = gate.is_open();

            // 3. Publish vehicle state and health
            pub_vehicle.put(serde_json::to_string(&status)?).await?;
            pub_health.put(serde_json::to_string(&health)?).await?;
        }
    }
    .await;

    if let Err(e) = &outcome {
        error!("Control loop failed: {}", e);
    }

    // Park the vehicle however the loop ended
    if jobs.send(Job::Shutdown).await.is_err() {
        warn!("Device worker already stopped");
    }
    worker.await?;
    info!("Runtime stopped");
    outcome
}
