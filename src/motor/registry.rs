// Static device registry: device name -> driver constructor
//
// Exactly one device is activated per process. The resulting `ActiveDevice` owns
// the driver and is the only handle the rest of the runtime sees.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::driver::{DeviceError, Driver, Result};
use super::four_motor::{self, FourMotorDriver};
use super::gpio::Gpio;
use super::types::{
    DriveDirection, Measurements, MotorDirection, MotorPosition, MotorSnapshot, TurnDirection,
};

/// Builds an uninitialized driver around an injected GPIO backend
pub type DriverFactory = fn(Box<dyn Gpio>) -> Box<dyn Driver>;

fn four_motor_factory(gpio: Box<dyn Gpio>) -> Box<dyn Driver> {
    Box::new(FourMotorDriver::new(gpio))
}

pub struct DeviceRegistry {
    drivers: BTreeMap<&'static str, DriverFactory>,
}

impl DeviceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            drivers: BTreeMap::new(),
        }
    }

    /// Registry with every driver shipped in this crate
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(four_motor::NAME, four_motor_factory);
        // Name used by older deployment configs
        registry.register("4wd", four_motor_factory);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: DriverFactory) {
        if self.drivers.insert(name, factory).is_some() {
            warn!("Driver '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.drivers.keys().copied()
    }

    /// Resolve `name`, build the driver on `gpio` and initialize it with `options`
    ///
    /// Callers must clean up the previous device before activating another one.
    pub fn activate(
        &self,
        name: &str,
        options: &serde_json::Value,
        gpio: Box<dyn Gpio>,
    ) -> Result<ActiveDevice> {
        let factory = self
            .drivers
            .get(name)
            .ok_or_else(|| DeviceError::UnknownDevice(name.to_string()))?;

        info!("Activating device '{}'", name);
        let mut driver = factory(gpio);
        driver.initialize(options)?;

        Ok(ActiveDevice {
            name: name.to_string(),
            driver,
            cleaned_up: false,
        })
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_builtin_drivers()
    }
}

/// The single activated driver, exposed through a fixed set of operations
pub struct ActiveDevice {
    name: String,
    driver: Box<dyn Driver>,
    cleaned_up: bool,
}

impl ActiveDevice {
    /// Name the device was activated under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn drive(&mut self, direction: DriveDirection, speed: f32) -> Result<()> {
        self.driver.drive(direction, speed)
    }

    pub fn turn(&mut self, direction: TurnDirection, speed: f32) -> Result<()> {
        self.driver.turn(direction, speed)
    }

    pub fn turn_left(&mut self, speed: f32) -> Result<()> {
        self.driver.turn_left(speed)
    }

    pub fn turn_right(&mut self, speed: f32) -> Result<()> {
        self.driver.turn_right(speed)
    }

    pub fn drive_single_motor(
        &mut self,
        position: MotorPosition,
        direction: MotorDirection,
        speed: f32,
    ) -> Result<()> {
        self.driver.drive_single_motor(position, direction, speed)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.driver.stop()
    }

    pub fn get_measurements(&mut self) -> Option<Measurements> {
        self.driver.get_measurements()
    }

    pub fn motor_states(&self) -> Vec<MotorSnapshot> {
        self.driver.motor_states()
    }

    /// True while any motor has a non-zero duty cycle
    pub fn is_moving(&self) -> bool {
        self.motor_states().iter().any(|m| m.speed > 0.0)
    }

    /// Stop and release hardware; later calls are no-ops
    pub fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;
        info!("Cleaning up device '{}'", self.name);
        self.driver.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::gpio::SimulatedGpio;
    use serde_json::json;

    fn options() -> serde_json::Value {
        json!({
            "motors": {
                "front_left": { "direction_pin": 1, "speed_pin": 2 },
                "front_right": { "direction_pin": 3, "speed_pin": 4 },
                "rear_left": { "direction_pin": 5, "speed_pin": 6 },
                "rear_right": { "direction_pin": 7, "speed_pin": 8 }
            }
        })
    }

    #[test]
    fn test_builtin_names() {
        let registry = DeviceRegistry::with_builtin_drivers();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["4wd", "four_motor"]);
    }

    #[test]
    fn test_unknown_device() {
        let registry = DeviceRegistry::default();
        let result = registry.activate("hovercraft", &options(), Box::new(SimulatedGpio::new()));
        assert!(matches!(result, Err(DeviceError::UnknownDevice(ref name)) if name == "hovercraft"));
    }

    #[test]
    fn test_activation_propagates_configuration_error() {
        let registry = DeviceRegistry::default();
        let result = registry.activate("four_motor", &json!({}), Box::new(SimulatedGpio::new()));
        assert!(matches!(result, Err(DeviceError::Configuration(_))));
    }

    #[test]
    fn test_alias_activates_same_driver() {
        let registry = DeviceRegistry::default();
        let mut device = registry
            .activate("4wd", &options(), Box::new(SimulatedGpio::new()))
            .unwrap();

        assert_eq!(device.name(), "4wd");
        device.drive(DriveDirection::Forward, 0.25).unwrap();
        assert!(device.is_moving());
        assert_eq!(device.motor_states().len(), 4);
    }

    #[test]
    fn test_cleanup_runs_once() {
        let gpio = SimulatedGpio::new();
        let journal = gpio.journal();
        let registry = DeviceRegistry::default();
        let mut device = registry
            .activate("four_motor", &options(), Box::new(gpio))
            .unwrap();

        device.cleanup().unwrap();
        assert!(journal.released());
        let recorded = journal.len();

        device.cleanup().unwrap();
        assert_eq!(journal.len(), recorded);
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = DeviceRegistry::new();
        registry.register("bench", four_motor_factory);
        assert!(
            registry
                .activate("bench", &options(), Box::new(SimulatedGpio::new()))
                .is_ok()
        );
        assert!(matches!(
            registry.activate("four_motor", &options(), Box::new(SimulatedGpio::new())),
            Err(DeviceError::UnknownDevice(_))
        ));
    }
}
