// Motor data model shared by all drivers

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::gpio::{Level, Pin, PwmHandle};

/// Wheel positions of a four-motor chassis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorPosition {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl MotorPosition {
    /// Canonical actuation order
    pub const ALL: [MotorPosition; 4] = [
        MotorPosition::FrontLeft,
        MotorPosition::FrontRight,
        MotorPosition::RearLeft,
        MotorPosition::RearRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Key used for this position in configuration files
    pub fn config_key(self) -> &'static str {
        match self {
            MotorPosition::FrontLeft => "front_left",
            MotorPosition::FrontRight => "front_right",
            MotorPosition::RearLeft => "rear_left",
            MotorPosition::RearRight => "rear_right",
        }
    }
}

impl fmt::Display for MotorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Electrical rotation direction of a single motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorDirection {
    Forward,
    Backward,
}

impl MotorDirection {
    pub fn reversed(self) -> Self {
        match self {
            MotorDirection::Forward => MotorDirection::Backward,
            MotorDirection::Backward => MotorDirection::Forward,
        }
    }

    /// Direction actually written to the pin once wiring polarity is applied
    pub fn with_polarity(self, reverse_polarity: bool) -> Self {
        if reverse_polarity { self.reversed() } else { self }
    }

    pub fn level(self) -> Level {
        match self {
            MotorDirection::Forward => Level::High,
            MotorDirection::Backward => Level::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorRunState {
    Idle,
    Running,
}

/// Vehicle-level drive direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveDirection {
    Forward,
    Backward,
}

impl From<DriveDirection> for MotorDirection {
    fn from(direction: DriveDirection) -> Self {
        match direction {
            DriveDirection::Forward => MotorDirection::Forward,
            DriveDirection::Backward => MotorDirection::Backward,
        }
    }
}

/// Vehicle-level turn direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Left,
    Right,
}

/// Returned when a string does not name any variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

// Parsing is case-sensitive on the canonical uppercase names; callers normalize first.
macro_rules! parse_upper {
    ($ty:ty { $($name:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }
    };
}

parse_upper!(MotorPosition {
    "FRONT_LEFT" => MotorPosition::FrontLeft,
    "FRONT_RIGHT" => MotorPosition::FrontRight,
    "REAR_LEFT" => MotorPosition::RearLeft,
    "REAR_RIGHT" => MotorPosition::RearRight,
});

parse_upper!(MotorDirection {
    "FORWARD" => MotorDirection::Forward,
    "BACKWARD" => MotorDirection::Backward,
});

parse_upper!(DriveDirection {
    "FORWARD" => DriveDirection::Forward,
    "BACKWARD" => DriveDirection::Backward,
});

parse_upper!(TurnDirection {
    "LEFT" => TurnDirection::Left,
    "RIGHT" => TurnDirection::Right,
});

/// Per-motor state owned by a driver
#[derive(Debug, Clone)]
pub struct Motor {
    pub direction: MotorDirection,
    pub speed: f32,
    pub direction_pin: Pin,
    pub speed_pin: Pin,
    pub reverse_polarity: bool,
    pub pwm: Option<PwmHandle>,
    pub state: MotorRunState,
}

impl Motor {
    pub fn new(direction_pin: Pin, speed_pin: Pin, reverse_polarity: bool) -> Self {
        Self {
            direction: MotorDirection::Forward,
            speed: 0.0,
            direction_pin,
            speed_pin,
            reverse_polarity,
            pwm: None,
            state: MotorRunState::Idle,
        }
    }

    pub fn snapshot(&self, position: MotorPosition) -> MotorSnapshot {
        MotorSnapshot {
            position,
            direction: self.direction,
            speed: self.speed,
            state: self.state,
        }
    }
}

/// Read-only copy of a motor's observable state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotorSnapshot {
    pub position: MotorPosition,
    pub direction: MotorDirection,
    pub speed: f32,
    pub state: MotorRunState,
}

/// Encoder feedback; no driver produces it yet
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Measurements {
    pub ticks: Vec<(MotorPosition, i64)>,
}
