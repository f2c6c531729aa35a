// GPIO capability consumed by the motor drivers
//
// Drivers never touch pins directly; they go through the `Gpio` trait so a
// simulated backend can stand in for real hardware (tests, bench setups).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Pin identifier (BCM numbering on the Raspberry Pi header)
pub type Pin = u8;

/// Pin numbering scheme selected before any pin is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinNumbering {
    Bcm,
}

/// Direction of a configured pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output,
}

/// Digital output level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Opaque handle to a PWM channel owned by the GPIO backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PwmHandle(u32);

/// Errors surfaced by a GPIO backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GpioError {
    #[error("Pin {pin} failed: {reason}")]
    Pin { pin: Pin, reason: String },

    #[error("Unknown PWM handle {0:?}")]
    UnknownPwm(PwmHandle),

    #[error("Duty cycle {0}% outside 0..=100")]
    InvalidDutyCycle(f32),

    #[error("GPIO release failed: {0}")]
    Release(String),
}

pub type Result<T> = std::result::Result<T, GpioError>;

/// Hardware capability the drivers are written against
pub trait Gpio: Send {
    fn set_mode(&mut self, numbering: PinNumbering) -> Result<()>;

    fn configure_pin(&mut self, pin: Pin, mode: PinMode) -> Result<()>;

    fn write_digital(&mut self, pin: Pin, level: Level) -> Result<()>;

    /// Start a PWM channel on `pin` at `frequency_hz` with a 0% duty cycle
    fn start_pwm(&mut self, pin: Pin, frequency_hz: f32) -> Result<PwmHandle>;

    /// Change the duty cycle of a running channel (0.0..=100.0)
    fn set_duty_cycle(&mut self, handle: PwmHandle, percent: f32) -> Result<()>;

    fn stop_pwm(&mut self, handle: PwmHandle) -> Result<()>;

    /// Return every pin to its default state
    fn release_all(&mut self) -> Result<()>;
}

/// One recorded call against the simulated backend
#[derive(Debug, Clone, PartialEq)]
pub enum GpioEvent {
    SetMode(PinNumbering),
    Configure { pin: Pin, mode: PinMode },
    Write { pin: Pin, level: Level },
    StartPwm { pin: Pin, frequency_hz: f32 },
    DutyCycle { pin: Pin, percent: f32 },
    StopPwm { pin: Pin },
    ReleaseAll,
}

#[derive(Debug, Default)]
struct SimState {
    events: Vec<GpioEvent>,
    channels: HashMap<PwmHandle, Pin>,
    next_handle: u32,
    faulty_pins: HashSet<Pin>,
    fail_release: bool,
}

impl SimState {
    fn check_pin(&self, pin: Pin) -> Result<()> {
        if self.faulty_pins.contains(&pin) {
            return Err(GpioError::Pin {
                pin,
                reason: "injected fault".to_string(),
            });
        }
        Ok(())
    }

    fn channel_pin(&self, handle: PwmHandle) -> Result<Pin> {
        self.channels
            .get(&handle)
            .copied()
            .ok_or(GpioError::UnknownPwm(handle))
    }
}

/// In-memory GPIO backend
///
/// Every successful call is appended to a journal that can be inspected through
/// a [`GpioJournal`], and individual pins can be marked faulty to exercise the
/// error paths of a driver.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGpio {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the recorded calls, usable after the backend is moved into a driver
    pub fn journal(&self) -> GpioJournal {
        GpioJournal {
            state: Arc::clone(&self.state),
        }
    }
}

impl Gpio for SimulatedGpio {
    fn set_mode(&mut self, numbering: PinNumbering) -> Result<()> {
        self.state.lock().events.push(GpioEvent::SetMode(numbering));
        Ok(())
    }

    fn configure_pin(&mut self, pin: Pin, mode: PinMode) -> Result<()> {
        let mut state = self.state.lock();
        state.check_pin(pin)?;
        state.events.push(GpioEvent::Configure { pin, mode });
        Ok(())
    }

    fn write_digital(&mut self, pin: Pin, level: Level) -> Result<()> {
        let mut state = self.state.lock();
        state.check_pin(pin)?;
        trace!("sim gpio: pin {} -> {:?}", pin, level);
        state.events.push(GpioEvent::Write { pin, level });
        Ok(())
    }

    fn start_pwm(&mut self, pin: Pin, frequency_hz: f32) -> Result<PwmHandle> {
        let mut state = self.state.lock();
        state.check_pin(pin)?;
        let handle = PwmHandle(state.next_handle);
        state.next_handle += 1;
        state.channels.insert(handle, pin);
        state.events.push(GpioEvent::StartPwm { pin, frequency_hz });
        Ok(handle)
    }

    fn set_duty_cycle(&mut self, handle: PwmHandle, percent: f32) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(GpioError::InvalidDutyCycle(percent));
        }
        let mut state = self.state.lock();
        let pin = state.channel_pin(handle)?;
        state.check_pin(pin)?;
        trace!("sim gpio: pwm on pin {} -> {}%", pin, percent);
        state.events.push(GpioEvent::DutyCycle { pin, percent });
        Ok(())
    }

    fn stop_pwm(&mut self, handle: PwmHandle) -> Result<()> {
        let mut state = self.state.lock();
        let pin = state.channel_pin(handle)?;
        state.check_pin(pin)?;
        state.channels.remove(&handle);
        state.events.push(GpioEvent::StopPwm { pin });
        Ok(())
    }

    fn release_all(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_release {
            return Err(GpioError::Release("injected fault".to_string()));
        }
        debug!("sim gpio: releasing {} PWM channels", state.channels.len());
        state.channels.clear();
        state.events.push(GpioEvent::ReleaseAll);
        Ok(())
    }
}

/// Read side of a [`SimulatedGpio`] with fault injection controls
#[derive(Debug, Clone)]
pub struct GpioJournal {
    state: Arc<Mutex<SimState>>,
}

impl GpioJournal {
    pub fn events(&self) -> Vec<GpioEvent> {
        self.state.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Level writes only, in the order they happened
    pub fn writes(&self) -> Vec<(Pin, Level)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match *event {
                GpioEvent::Write { pin, level } => Some((pin, level)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().events.clear();
    }

    /// Every later call touching `pin` fails with [`GpioError::Pin`]
    pub fn fail_pin(&self, pin: Pin) {
        self.state.lock().faulty_pins.insert(pin);
    }

    pub fn heal_pin(&self, pin: Pin) {
        self.state.lock().faulty_pins.remove(&pin);
    }

    pub fn fail_release(&self, fail: bool) {
        self.state.lock().fail_release = fail;
    }

    pub fn released(&self) -> bool {
        self.state
            .lock()
            .events
            .iter()
            .any(|event| matches!(event, GpioEvent::ReleaseAll))
    }

    pub fn active_channels(&self) -> usize {
        self.state.lock().channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_records_calls() {
        let mut gpio = SimulatedGpio::new();
        let journal = gpio.journal();

        gpio.set_mode(PinNumbering::Bcm).unwrap();
        gpio.configure_pin(4, PinMode::Output).unwrap();
        gpio.write_digital(4, Level::High).unwrap();
        let handle = gpio.start_pwm(17, 500.0).unwrap();
        gpio.set_duty_cycle(handle, 42.0).unwrap();

        assert_eq!(
            journal.events(),
            vec![
                GpioEvent::SetMode(PinNumbering::Bcm),
                GpioEvent::Configure {
                    pin: 4,
                    mode: PinMode::Output
                },
                GpioEvent::Write {
                    pin: 4,
                    level: Level::High
                },
                GpioEvent::StartPwm {
                    pin: 17,
                    frequency_hz: 500.0
                },
                GpioEvent::DutyCycle {
                    pin: 17,
                    percent: 42.0
                },
            ]
        );
        assert_eq!(journal.writes(), vec![(4, Level::High)]);
    }

    #[test]
    fn test_faulty_pin_rejects_writes() {
        let mut gpio = SimulatedGpio::new();
        let journal = gpio.journal();
        journal.fail_pin(4);

        assert!(matches!(
            gpio.write_digital(4, Level::Low),
            Err(GpioError::Pin { pin: 4, .. })
        ));
        assert!(journal.is_empty());

        journal.heal_pin(4);
        assert!(gpio.write_digital(4, Level::Low).is_ok());
    }

    #[test]
    fn test_duty_cycle_bounds() {
        let mut gpio = SimulatedGpio::new();
        let handle = gpio.start_pwm(17, 500.0).unwrap();
        assert!(gpio.set_duty_cycle(handle, 100.0).is_ok());
        assert!(matches!(
            gpio.set_duty_cycle(handle, 100.5),
            Err(GpioError::InvalidDutyCycle(_))
        ));
        assert!(gpio.set_duty_cycle(handle, f32::NAN).is_err());
    }

    #[test]
    fn test_stopped_channel_is_forgotten() {
        let mut gpio = SimulatedGpio::new();
        let journal = gpio.journal();
        let handle = gpio.start_pwm(17, 500.0).unwrap();
        assert_eq!(journal.active_channels(), 1);

        gpio.stop_pwm(handle).unwrap();
        assert_eq!(journal.active_channels(), 0);
        assert_eq!(
            gpio.set_duty_cycle(handle, 10.0),
            Err(GpioError::UnknownPwm(handle))
        );
    }

    #[test]
    fn test_release_all() {
        let mut gpio = SimulatedGpio::new();
        let journal = gpio.journal();
        gpio.start_pwm(17, 500.0).unwrap();

        journal.fail_release(true);
        assert!(gpio.release_all().is_err());
        assert!(!journal.released());

        journal.fail_release(false);
        gpio.release_all().unwrap();
        assert!(journal.released());
        assert_eq!(journal.active_channels(), 0);
    }
}
