// Topics, timing defaults and the layered settings file

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

// Zenoh topics
pub const TOPIC_COMMAND: &str = "subsystem/motor/command"; // inbound commands
pub const TOPIC_MEASUREMENT: &str = "subsystem/motor/measurement"; // encoder data (reserved)
pub const TOPIC_HEALTH: &str = "subsystem/motor/health"; // health status

// Pause between drains of the command subscriber
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

// Environment variable overrides, e.g. MOTOR__DEVICE__NAME=4wd
pub const ENV_PREFIX: &str = "MOTOR";

/// Message channel settings
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
    #[serde(default = "default_measurement_topic")]
    pub measurement_topic: String,
    #[serde(default = "default_health_topic")]
    pub health_topic: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Optional zenoh json5 config file; zenoh defaults otherwise
    #[serde(default)]
    pub zenoh_config: Option<PathBuf>,
}

impl ChannelSettings {
    /// Never zero; the loop timer cannot tick at 0 ms
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            command_topic: default_command_topic(),
            measurement_topic: default_measurement_topic(),
            health_topic: default_health_topic(),
            poll_interval_ms: default_poll_interval_ms(),
            zenoh_config: None,
        }
    }
}

fn default_command_topic() -> String {
    TOPIC_COMMAND.to_string()
}

fn default_measurement_topic() -> String {
    TOPIC_MEASUREMENT.to_string()
}

fn default_health_topic() -> String {
    TOPIC_HEALTH.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

/// Which driver to activate and its driver-specific options
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    pub name: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GpioBackend {
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GpioSettings {
    #[serde(default)]
    pub backend: GpioBackend,
}

/// Command loop behaviour
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSettings {
    /// Stop the motors when no command arrived for this long (disabled when unset)
    #[serde(default)]
    pub watchdog_ms: Option<u64>,
    /// Exit after this many hardware failures in a row (tolerated forever when unset,
    /// must be at least 1)
    #[serde(default)]
    pub max_hardware_failures: Option<u32>,
}

impl RuntimeSettings {
    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub channel: ChannelSettings,
    pub device: DeviceSettings,
    #[serde(default)]
    pub gpio: GpioSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl Settings {
    /// Load `<dir>/default.*`, then `<dir>/<environment>.*`, then `MOTOR__*` variables
    ///
    /// Both files are optional; a missing `device` section is an error.
    pub fn load(dir: &Path, environment: &str) -> Result<Self, ConfigError> {
        Self::load_layers(dir, environment, env_overrides())
    }

    fn load_layers(
        dir: &Path,
        environment: &str,
        overrides: Environment,
    ) -> Result<Self, ConfigError> {
        let layer = |name: &str| {
            File::with_name(&dir.join(name).to_string_lossy()).required(false)
        };

        Config::builder()
            .add_source(layer("default"))
            .add_source(layer(environment))
            .add_source(overrides)
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Parse settings from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.runtime.max_hardware_failures == Some(0) {
            return Err(ConfigError::Message(
                "runtime.max_hardware_failures must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

// Values are parsed so overrides inside `device.options` keep their numeric and
// boolean types; that table is untyped and gets no coercion later.
fn env_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
