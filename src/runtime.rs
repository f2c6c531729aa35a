// Command loop: drain the command topic, dispatch, publish health
// Maneuvers run to completion one at a time, so commands are applied strictly in
// arrival order. The loop exits on the shutdown signal and always cleans up the
// device before returning.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::config::{ChannelSettings, GpioBackend, RuntimeSettings, Settings};
use crate::dispatch::Dispatcher;
use crate::messages::{MeasurementReport, RuntimeHealth};
use crate::motor::{ActiveDevice, DeviceRegistry, Gpio, SimulatedGpio};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0} consecutive hardware failures, giving up")]
    HardwareFailures(u32),
}

pub struct Runtime {
    device: ActiveDevice,
    dispatcher: Dispatcher,
    watchdog: Option<Duration>,
    max_hardware_failures: Option<u32>,
    last_command_at: Instant,
    hardware_failures: u32,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(device: ActiveDevice, settings: &RuntimeSettings) -> Self {
        Self {
            device,
            dispatcher: Dispatcher::new(),
            watchdog: settings.watchdog(),
            max_hardware_failures: settings.max_hardware_failures,
            last_command_at: Instant::now(),
            hardware_failures: 0,
            health: RuntimeHealth::Ok,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn device(&self) -> &ActiveDevice {
        &self.device
    }

    /// Process one inbound payload
    ///
    /// Rejected commands are logged and dropped. Only a run of hardware failures
    /// longer than the configured limit is returned as an error.
    pub fn on_payload(&mut self, payload: &[u8]) -> Result<(), RuntimeError> {
        match self.dispatcher.dispatch(payload, &mut self.device) {
            Ok(command) => {
                info!("Executed command: {:?}", command);
                self.last_command_at = Instant::now();
                self.hardware_failures = 0;
                self.health = RuntimeHealth::Ok;
            }
            Err(rejected) if rejected.error.is_hardware() => {
                self.hardware_failures += 1;
                self.health = RuntimeHealth::HardwareFault;
                error!(
                    "Hardware failure during '{}' ({} in a row): {}",
                    rejected.kind, self.hardware_failures, rejected.error
                );
                if let Some(limit) = self.max_hardware_failures {
                    if self.hardware_failures >= limit {
                        return Err(RuntimeError::HardwareFailures(self.hardware_failures));
                    }
                }
            }
            Err(rejected) => {
                warn!("Rejected '{}' command: {}", rejected.kind, rejected.error);
            }
        }
        Ok(())
    }

    /// Feed every pending payload from `next` through [`Runtime::on_payload`]
    ///
    /// Stops at the first `Ok(None)`. A receive error means the command channel is
    /// gone and is returned as fatal.
    pub fn drain_commands<F>(&mut self, mut next: F) -> Result<usize, BoxError>
    where
        F: FnMut() -> Result<Option<Vec<u8>>, BoxError>,
    {
        let mut drained = 0;
        loop {
            match next() {
                Ok(Some(payload)) => {
                    self.on_payload(&payload)?;
                    drained += 1;
                }
                Ok(None) => return Ok(drained),
                Err(e) => {
                    error!("Command subscriber failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Stop the motors if commands went stale while they were running
    pub fn check_watchdog(&mut self, now: Instant) {
        let Some(timeout) = self.watchdog else {
            return;
        };
        let cmd_age = now.saturating_duration_since(self.last_command_at);
        if cmd_age <= timeout {
            return;
        }

        if self.device.is_moving() {
            warn!("Command stale ({:?} old), stopping robot", cmd_age);
            if let Err(e) = self.device.stop() {
                error!("Watchdog stop failed: {}", e);
                self.health = RuntimeHealth::HardwareFault;
                return;
            }
        }
        if self.health == RuntimeHealth::Ok {
            self.health = RuntimeHealth::CmdStale;
        }
    }

    /// Encoder report for the measurement topic, if the driver produced one
    pub fn measurement_report(&mut self) -> Option<MeasurementReport> {
        let measurements = self.device.get_measurements()?;
        Some(MeasurementReport {
            device: self.device.name().to_string(),
            measurements,
            motors: self.device.motor_states(),
        })
    }

    /// Stop the motors and release GPIO
    pub fn shutdown(&mut self) {
        info!("Shutting down runtime");
        if let Err(e) = self.device.cleanup() {
            error!("Device cleanup failed: {}", e);
        }
    }
}

fn open_gpio(backend: GpioBackend) -> Box<dyn Gpio> {
    match backend {
        GpioBackend::Simulated => {
            warn!("Using simulated GPIO backend, no pins will be driven");
            Box::new(SimulatedGpio::new())
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Activate the configured device and serve commands until `shutdown` flips to true
pub async fn run(settings: Settings, mut shutdown: watch::Receiver<bool>) -> Result<(), BoxError> {
    // Activation errors are fatal: nothing is served with a half-configured device
    let registry = DeviceRegistry::with_builtin_drivers();
    let gpio = open_gpio(settings.gpio.backend);
    let device = registry.activate(&settings.device.name, &settings.device.options, gpio)?;
    let mut runtime = Runtime::new(device, &settings.runtime);

    let result = serve(&settings.channel, &mut runtime, &mut shutdown).await;
    runtime.shutdown();
    result
}

async fn serve(
    channel: &ChannelSettings,
    runtime: &mut Runtime,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let zenoh_config = match &channel.zenoh_config {
        Some(path) => zenoh::Config::from_file(path)?,
        None => zenoh::Config::default(),
    };
    let session = zenoh::open(zenoh_config).await?;

    let result = poll_commands(&session, channel, runtime, shutdown).await;

    info!("Closing Zenoh session");
    if let Err(e) = session.close().await {
        warn!("Failed to close Zenoh session: {}", e);
    }
    result
}

async fn poll_commands(
    session: &zenoh::Session,
    channel: &ChannelSettings,
    runtime: &mut Runtime,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), BoxError> {
    info!("Setting up publishers and subscribers...");
    let subscriber = session
        .declare_subscriber(channel.command_topic.as_str())
        .await?;
    let pub_measurement = session
        .declare_publisher(channel.measurement_topic.as_str())
        .await?;
    let pub_health = session
        .declare_publisher(channel.health_topic.as_str())
        .await?;

    let mut tick = interval(channel.poll_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Runtime started: device '{}', {}ms poll interval",
        runtime.device().name(),
        channel.poll_interval().as_millis()
    );
    info!("Subscribed to: {}", channel.command_topic);
    info!(
        "Publishing to: {}, {}",
        channel.measurement_topic, channel.health_topic
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    info!("Shutdown channel closed");
                    return Ok(());
                }
            }
        }
        if *shutdown.borrow() {
            info!("Shutdown requested");
            return Ok(());
        }

        // 1. Drain all pending commands (non-blocking), in arrival order
        runtime.drain_commands(|| {
            let sample = subscriber.try_recv()?;
            Ok(sample.map(|sample| sample.payload().to_bytes().into_owned()))
        })?;

        // 2. Watchdog
        runtime.check_watchdog(Instant::now());

        // 3. Encoder feedback, once a driver provides it
        if let Some(report) = runtime.measurement_report() {
            pub_measurement.put(serde_json::to_string(&report)?).await?;
        }

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}
