// Driver interface every chassis implementation provides
//
// The registry hands callers a `Box<dyn Driver>` so the dispatch code never
// depends on a concrete chassis.

use super::gpio::GpioError;
use super::types::{
    DriveDirection, Measurements, MotorDirection, MotorPosition, MotorSnapshot, TurnDirection,
};

/// Valid speed (duty-cycle fraction) range
pub const SPEED_MIN: f32 = 0.0;
pub const SPEED_MAX: f32 = 1.0;

/// Error types for device activation and maneuvers
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Device not initialized")]
    NotInitialized,

    #[error("{field} {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("Unknown device '{0}'")]
    UnknownDevice(String),

    #[error("Hardware I/O error: {0}")]
    Hardware(#[from] GpioError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Reject speeds outside [0, 1] (NaN included) before anything touches a pin
pub fn check_speed(speed: f32) -> Result<()> {
    if (SPEED_MIN..=SPEED_MAX).contains(&speed) {
        Ok(())
    } else {
        Err(DeviceError::OutOfRange {
            field: "speed",
            value: speed,
            min: SPEED_MIN,
            max: SPEED_MAX,
        })
    }
}

/// Capability surface of a motor driver
pub trait Driver: Send {
    /// Name the driver is registered under
    fn name(&self) -> &'static str;

    /// Claim pins and start PWM channels; must run once before any maneuver
    fn initialize(&mut self, options: &serde_json::Value) -> Result<()>;

    fn drive(&mut self, direction: DriveDirection, speed: f32) -> Result<()>;

    fn turn(&mut self, direction: TurnDirection, speed: f32) -> Result<()> {
        check_speed(speed)?;
        match direction {
            TurnDirection::Left => self.turn_left(speed),
            TurnDirection::Right => self.turn_right(speed),
        }
    }

    fn turn_left(&mut self, speed: f32) -> Result<()>;

    fn turn_right(&mut self, speed: f32) -> Result<()>;

    /// Single-motor primitive every maneuver funnels through
    fn drive_single_motor(
        &mut self,
        position: MotorPosition,
        direction: MotorDirection,
        speed: f32,
    ) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Encoder feedback, `None` until a driver supports it
    fn get_measurements(&mut self) -> Option<Measurements> {
        None
    }

    /// Observable state of every motor, in actuation order
    fn motor_states(&self) -> Vec<MotorSnapshot>;

    /// Stop every motor and release GPIO resources
    fn cleanup(&mut self) -> Result<()>;
}
