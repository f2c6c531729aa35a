// Four-motor differential drive
//
// Each wheel has one direction pin (digital) and one speed pin (PWM). Every
// maneuver is decomposed into per-motor calls that go through
// `drive_single_motor`, so the range check and the polarity correction are
// applied in exactly one place.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::driver::{DeviceError, Driver, Result, check_speed};
use super::gpio::{Gpio, Pin, PinMode, PinNumbering};
use super::types::{
    DriveDirection, Motor, MotorDirection, MotorPosition, MotorRunState, MotorSnapshot,
};

/// Registry name of this driver
pub const NAME: &str = "four_motor";

/// PWM carrier frequency for the speed pins
pub const PWM_FREQUENCY_HZ: f32 = 500.0;

/// Tank-turn pairings, applied in this order
const TURN_LEFT: [(MotorPosition, MotorDirection); 4] = [
    (MotorPosition::FrontLeft, MotorDirection::Backward),
    (MotorPosition::RearLeft, MotorDirection::Backward),
    (MotorPosition::FrontRight, MotorDirection::Forward),
    (MotorPosition::RearRight, MotorDirection::Forward),
];
const TURN_RIGHT: [(MotorPosition, MotorDirection); 4] = [
    (MotorPosition::FrontRight, MotorDirection::Backward),
    (MotorPosition::RearRight, MotorDirection::Backward),
    (MotorPosition::FrontLeft, MotorDirection::Forward),
    (MotorPosition::RearLeft, MotorDirection::Forward),
];

/// `device.options` layout for this driver
#[derive(Debug, Deserialize)]
struct FourMotorOptions {
    #[serde(default)]
    motors: HashMap<String, MotorPins>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct MotorPins {
    direction_pin: Pin,
    speed_pin: Pin,
    #[serde(default)]
    reverse: bool,
}

/// Build the four motor records, checking that every position is present and no pin is shared
fn motors_from_options(options: &serde_json::Value) -> Result<[Motor; 4]> {
    let parsed: FourMotorOptions = serde_json::from_value(options.clone())
        .map_err(|e| DeviceError::Configuration(format!("invalid motor options: {}", e)))?;

    let mut seen: HashSet<Pin> = HashSet::new();
    let mut claim = |pin: Pin, position: MotorPosition, role: &str| -> Result<()> {
        if seen.insert(pin) {
            Ok(())
        } else {
            Err(DeviceError::Configuration(format!(
                "pin {} reused as {} of motor {}",
                pin, role, position
            )))
        }
    };

    let mut build = |position: MotorPosition| -> Result<Motor> {
        let pins = parsed.motors.get(position.config_key()).ok_or_else(|| {
            DeviceError::Configuration(format!("no pin assignment for motor {}", position))
        })?;
        claim(pins.direction_pin, position, "direction pin")?;
        claim(pins.speed_pin, position, "speed pin")?;
        Ok(Motor::new(pins.direction_pin, pins.speed_pin, pins.reverse))
    };

    Ok([
        build(MotorPosition::FrontLeft)?,
        build(MotorPosition::FrontRight)?,
        build(MotorPosition::RearLeft)?,
        build(MotorPosition::RearRight)?,
    ])
}

/// Driver for a four-wheel skid-steer chassis
pub struct FourMotorDriver {
    gpio: Box<dyn Gpio>,
    motors: Option<[Motor; 4]>,
}

impl FourMotorDriver {
    pub fn new(gpio: Box<dyn Gpio>) -> Self {
        Self { gpio, motors: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.motors.is_some()
    }

    /// Read-only access to a motor record
    pub fn motor(&self, position: MotorPosition) -> Option<&Motor> {
        self.motors.as_ref().map(|motors| &motors[position.index()])
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.motors.is_some() {
            Ok(())
        } else {
            Err(DeviceError::NotInitialized)
        }
    }

    /// Configure direction pins and start one PWM channel per speed pin
    fn claim_pins(&mut self, motors: &mut [Motor; 4]) -> Result<()> {
        self.gpio.set_mode(PinNumbering::Bcm)?;
        for position in MotorPosition::ALL {
            let motor = &mut motors[position.index()];
            debug!(
                "Using pin {} for direction on motor {}",
                motor.direction_pin, position
            );
            self.gpio.configure_pin(motor.direction_pin, PinMode::Output)?;
            debug!("Using pin {} for speed on motor {}", motor.speed_pin, position);
            self.gpio.configure_pin(motor.speed_pin, PinMode::Output)?;
            motor.pwm = Some(self.gpio.start_pwm(motor.speed_pin, PWM_FREQUENCY_HZ)?);
        }
        Ok(())
    }

    fn apply(&mut self, plan: &[(MotorPosition, MotorDirection)], speed: f32) -> Result<()> {
        for &(position, direction) in plan {
            self.drive_single_motor(position, direction, speed)?;
        }
        Ok(())
    }
}

impl Driver for FourMotorDriver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize(&mut self, options: &serde_json::Value) -> Result<()> {
        if self.motors.is_some() {
            return Err(DeviceError::Configuration(
                "driver already initialized".to_string(),
            ));
        }

        let mut motors = motors_from_options(options)?;
        info!("Initializing {} motors at {} Hz PWM", motors.len(), PWM_FREQUENCY_HZ);

        if let Err(e) = self.claim_pins(&mut motors) {
            // Partially claimed pins must not stay driven
            error!("GPIO setup failed: {}", e);
            if let Err(release) = self.gpio.release_all() {
                warn!("Failed to release GPIO after setup failure: {}", release);
            }
            return Err(e);
        }

        self.motors = Some(motors);
        info!("Motors initialized successfully");
        Ok(())
    }

    fn drive(&mut self, direction: DriveDirection, speed: f32) -> Result<()> {
        self.ensure_initialized()?;
        check_speed(speed)?;
        debug!("Driving {:?} at {}% speed", direction, speed * 100.0);

        let direction = MotorDirection::from(direction);
        for position in MotorPosition::ALL {
            self.drive_single_motor(position, direction, speed)?;
        }
        Ok(())
    }

    fn turn_left(&mut self, speed: f32) -> Result<()> {
        self.ensure_initialized()?;
        check_speed(speed)?;
        debug!("Turning left at {}% speed", speed * 100.0);
        self.apply(&TURN_LEFT, speed)
    }

    fn turn_right(&mut self, speed: f32) -> Result<()> {
        self.ensure_initialized()?;
        check_speed(speed)?;
        debug!("Turning right at {}% speed", speed * 100.0);
        self.apply(&TURN_RIGHT, speed)
    }

    fn drive_single_motor(
        &mut self,
        position: MotorPosition,
        direction: MotorDirection,
        speed: f32,
    ) -> Result<()> {
        let motors = self.motors.as_mut().ok_or(DeviceError::NotInitialized)?;
        check_speed(speed)?;

        let motor = &mut motors[position.index()];
        let pwm = motor.pwm.ok_or(DeviceError::NotInitialized)?;
        let effective = direction.with_polarity(motor.reverse_polarity);
        debug!(
            "Driving motor {} {:?} (pin level {:?}) at {}% speed",
            position,
            direction,
            effective.level(),
            speed * 100.0
        );

        self.gpio.write_digital(motor.direction_pin, effective.level())?;
        motor.direction = direction;

        self.gpio.set_duty_cycle(pwm, speed * 100.0)?;
        motor.speed = speed;
        motor.state = MotorRunState::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let motors = self.motors.as_mut().ok_or(DeviceError::NotInitialized)?;
        info!("Stopping all motors");

        // Every motor gets a stop attempt; the first failure is reported
        let mut first_error = None;
        for position in MotorPosition::ALL {
            let motor = &mut motors[position.index()];
            let Some(pwm) = motor.pwm else { continue };
            match self.gpio.set_duty_cycle(pwm, 0.0) {
                Ok(()) => {
                    motor.speed = 0.0;
                    motor.state = MotorRunState::Idle;
                }
                Err(e) => {
                    warn!("Failed to stop motor {}: {}", position, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn motor_states(&self) -> Vec<MotorSnapshot> {
        match &self.motors {
            Some(motors) => MotorPosition::ALL
                .iter()
                .map(|&position| motors[position.index()].snapshot(position))
                .collect(),
            None => Vec::new(),
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        info!("Cleaning up {} driver", NAME);
        let mut result = Ok(());

        if self.motors.is_some() {
            result = self.stop();
            if let Some(motors) = self.motors.as_mut() {
                for position in MotorPosition::ALL {
                    let Some(pwm) = motors[position.index()].pwm.take() else {
                        continue;
                    };
                    if let Err(e) = self.gpio.stop_pwm(pwm) {
                        warn!("Failed to stop PWM on motor {}: {}", position, e);
                        if result.is_ok() {
                            result = Err(e.into());
                        }
                    }
                }
            }
            self.motors = None;
        }

        // Release runs no matter what happened above
        if let Err(e) = self.gpio.release_all() {
            error!("Failed to release GPIO: {}", e);
            if result.is_ok() {
                result = Err(e.into());
            }
        }
        result
    }
}

impl Drop for FourMotorDriver {
    fn drop(&mut self) {
        // Never leave the wheels spinning when the driver goes away
        if self.motors.is_some() {
            if let Err(e) = self.cleanup() {
                warn!("Failed to clean up motors on drop: {}", e);
            }
        }
    }
}
