// Motor control module
//
// Provides:
// - GPIO capability trait plus an in-memory simulated backend
// - Motor data model (positions, directions, per-motor records)
// - Driver trait and the four-motor differential drive
// - Device registry that activates one driver by name

mod driver;
pub mod four_motor;
pub mod gpio;
pub mod registry;
pub mod types;

pub use driver::{DeviceError, Driver, SPEED_MAX, SPEED_MIN, check_speed};
pub use four_motor::FourMotorDriver;
pub use gpio::{Gpio, GpioError, SimulatedGpio};
pub use registry::{ActiveDevice, DeviceRegistry};
pub use types::{
    DriveDirection, Measurements, Motor, MotorDirection, MotorPosition, MotorRunState,
    MotorSnapshot, TurnDirection,
};
