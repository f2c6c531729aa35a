// Command dispatch: untrusted payload -> validated `Command` -> device call
//
// Every command kind has its own argument schema and decoder. Decoders check,
// in order: presence of required fields, enum values (case-insensitive), then
// numeric ranges. Nothing reaches the device before all three pass.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::messages::{Command, CommandEnvelope};
use crate::motor::types::UnknownVariant;
use crate::motor::{ActiveDevice, DeviceError, SPEED_MAX, SPEED_MIN};

type Fields = serde_json::Map<String, serde_json::Value>;

/// Decoder for one command kind
pub type Handler = fn(Fields) -> Result<Command, DispatchError>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing argument '{0}'")]
    MissingArgument(&'static str),

    #[error("Unknown value '{value}' for '{field}'")]
    UnknownEnumValue { field: &'static str, value: String },

    #[error("{field} {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl DispatchError {
    /// Rejected before reaching the device
    pub fn is_validation(&self) -> bool {
        !matches!(self, DispatchError::Device(_))
    }

    /// The GPIO backend failed mid-maneuver
    pub fn is_hardware(&self) -> bool {
        matches!(self, DispatchError::Device(DeviceError::Hardware(_)))
    }
}

/// A payload that could not be carried out, tagged with its command kind
#[derive(Debug, thiserror::Error)]
#[error("command '{kind}' rejected: {error}")]
pub struct Rejected {
    pub kind: String,
    #[source]
    pub error: DispatchError,
}

// Argument schemas, one per command shape. Unknown extra fields are ignored.

#[derive(Debug, Deserialize)]
struct DirectionalArgs {
    direction: Option<String>,
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SpeedArgs {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DriveMotorArgs {
    position: Option<String>,
    direction: Option<String>,
    speed: Option<f64>,
}

fn schema<T: DeserializeOwned>(fields: Fields) -> Result<T, DispatchError> {
    Ok(serde_json::from_value(serde_json::Value::Object(fields))?)
}

fn require<T>(field: &'static str, value: Option<T>) -> Result<T, DispatchError> {
    value.ok_or(DispatchError::MissingArgument(field))
}

fn parse_enum<T>(field: &'static str, value: &str) -> Result<T, DispatchError>
where
    T: FromStr<Err = UnknownVariant>,
{
    value
        .to_uppercase()
        .parse()
        .map_err(|_| DispatchError::UnknownEnumValue {
            field,
            value: value.to_string(),
        })
}

fn speed_in_range(value: f64) -> Result<f32, DispatchError> {
    let (min, max) = (f64::from(SPEED_MIN), f64::from(SPEED_MAX));
    if (min..=max).contains(&value) {
        Ok(value as f32)
    } else {
        Err(DispatchError::OutOfRange {
            field: "speed",
            value,
            min,
            max,
        })
    }
}

fn decode_drive(fields: Fields) -> Result<Command, DispatchError> {
    let args: DirectionalArgs = schema(fields)?;
    let direction = require("direction", args.direction)?;
    let speed = require("speed", args.speed)?;
    Ok(Command::Drive {
        direction: parse_enum("direction", &direction)?,
        speed: speed_in_range(speed)?,
    })
}

fn decode_turn(fields: Fields) -> Result<Command, DispatchError> {
    let args: DirectionalArgs = schema(fields)?;
    let direction = require("direction", args.direction)?;
    let speed = require("speed", args.speed)?;
    Ok(Command::Turn {
        direction: parse_enum("direction", &direction)?,
        speed: speed_in_range(speed)?,
    })
}

fn decode_turn_left(fields: Fields) -> Result<Command, DispatchError> {
    let args: SpeedArgs = schema(fields)?;
    let speed = require("speed", args.speed)?;
    Ok(Command::TurnLeft {
        speed: speed_in_range(speed)?,
    })
}

fn decode_turn_right(fields: Fields) -> Result<Command, DispatchError> {
    let args: SpeedArgs = schema(fields)?;
    let speed = require("speed", args.speed)?;
    Ok(Command::TurnRight {
        speed: speed_in_range(speed)?,
    })
}

fn decode_stop(_fields: Fields) -> Result<Command, DispatchError> {
    Ok(Command::Stop)
}

fn decode_drive_motor(fields: Fields) -> Result<Command, DispatchError> {
    let args: DriveMotorArgs = schema(fields)?;
    let position = require("position", args.position)?;
    let speed = require("speed", args.speed)?;
    let direction = require("direction", args.direction)?;
    Ok(Command::DriveMotor {
        position: parse_enum("position", &position)?,
        direction: parse_enum("direction", &direction)?,
        speed: speed_in_range(speed)?,
    })
}

/// Maps command kinds to their decoders and runs the result on a device
pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert("drive", decode_drive);
        handlers.insert("turn", decode_turn);
        handlers.insert("turn_left", decode_turn_left);
        handlers.insert("turn_right", decode_turn_right);
        handlers.insert("stop", decode_stop);
        handlers.insert("drive_motor", decode_drive_motor);
        Self { handlers }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Parse and validate a payload without touching any device
    pub fn decode(&self, payload: &[u8]) -> Result<Command, Rejected> {
        let envelope: CommandEnvelope =
            serde_json::from_slice(payload).map_err(|e| Rejected {
                kind: "<unparsed>".to_string(),
                error: e.into(),
            })?;

        let Some(kind) = envelope.command else {
            return Err(Rejected {
                kind: "<missing>".to_string(),
                error: DispatchError::MissingArgument("command"),
            });
        };

        let Some(handler) = self.handlers.get(kind.as_str()) else {
            return Err(Rejected {
                error: DispatchError::UnknownCommand(kind.clone()),
                kind,
            });
        };

        handler(envelope.fields).map_err(|error| Rejected { kind, error })
    }

    /// Decode `payload` and run it on `device`
    pub fn dispatch(&self, payload: &[u8], device: &mut ActiveDevice) -> Result<Command, Rejected> {
        let command = self.decode(payload)?;
        execute(command, device).map_err(|e| Rejected {
            kind: command.kind().to_string(),
            error: e.into(),
        })?;
        Ok(command)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke the device operation matching `command`
pub fn execute(command: Command, device: &mut ActiveDevice) -> Result<(), DeviceError> {
    debug!("Executing {:?} on '{}'", command, device.name());
    match command {
        Command::Drive { direction, speed } => device.drive(direction, speed),
        Command::Turn { direction, speed } => device.turn(direction, speed),
        Command::TurnLeft { speed } => device.turn_left(speed),
        Command::TurnRight { speed } => device.turn_right(speed),
        Command::Stop => device.stop(),
        Command::DriveMotor {
            position,
            direction,
            speed,
        } => device.drive_single_motor(position, direction, speed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::gpio::GpioJournal;
    use crate::motor::{
        DeviceRegistry, DriveDirection, MotorDirection, MotorPosition, SimulatedGpio,
        TurnDirection,
    };
    use serde_json::json;

    fn device() -> (ActiveDevice, GpioJournal) {
        let gpio = SimulatedGpio::new();
        let journal = gpio.journal();
        let options = json!({
            "motors": {
                "front_left": { "direction_pin": 5, "speed_pin": 6 },
                "front_right": { "direction_pin": 13, "speed_pin": 19, "reverse": true },
                "rear_left": { "direction_pin": 20, "speed_pin": 21 },
                "rear_right": { "direction_pin": 23, "speed_pin": 24, "reverse": true }
            }
        });
        let device = DeviceRegistry::with_builtin_drivers()
            .activate("four_motor", &options, Box::new(gpio))
            .unwrap();
        journal.clear();
        (device, journal)
    }

    fn decode(payload: serde_json::Value) -> Result<Command, DispatchError> {
        Dispatcher::new()
            .decode(payload.to_string().as_bytes())
            .map_err(|rejected| rejected.error)
    }

    #[test]
    fn test_decode_every_kind() {
        assert_eq!(
            decode(json!({"command": "drive", "direction": "forward", "speed": 0.5})).unwrap(),
            Command::Drive {
                direction: DriveDirection::Forward,
                speed: 0.5
            }
        );
        assert_eq!(
            decode(json!({"command": "turn", "direction": "Left", "speed": 1})).unwrap(),
            Command::Turn {
                direction: TurnDirection::Left,
                speed: 1.0
            }
        );
        assert_eq!(
            decode(json!({"command": "turn_left", "speed": 0.25})).unwrap(),
            Command::TurnLeft { speed: 0.25 }
        );
        assert_eq!(
            decode(json!({"command": "turn_right", "speed": 0})).unwrap(),
            Command::TurnRight { speed: 0.0 }
        );
        assert_eq!(decode(json!({"command": "stop"})).unwrap(), Command::Stop);
        assert_eq!(
            decode(json!({
                "command": "drive_motor",
                "position": "front_left",
                "speed": 0.3,
                "direction": "backward"
            }))
            .unwrap(),
            Command::DriveMotor {
                position: MotorPosition::FrontLeft,
                direction: MotorDirection::Backward,
                speed: 0.3
            }
        );
    }

    #[test]
    fn test_missing_arguments() {
        assert!(matches!(
            decode(json!({"command": "drive", "speed": 0.5})),
            Err(DispatchError::MissingArgument("direction"))
        ));
        assert!(matches!(
            decode(json!({"command": "turn_left"})),
            Err(DispatchError::MissingArgument("speed"))
        ));
        assert!(matches!(
            decode(json!({"command": "drive_motor", "speed": 0.5, "direction": "forward"})),
            Err(DispatchError::MissingArgument("position"))
        ));
        assert!(matches!(
            decode(json!({"speed": 0.5})),
            Err(DispatchError::MissingArgument("command"))
        ));
    }

    #[test]
    fn test_presence_checked_before_values() {
        // Bad direction and missing speed: the missing field wins
        assert!(matches!(
            decode(json!({"command": "drive", "direction": "up"})),
            Err(DispatchError::MissingArgument("speed"))
        ));
    }

    #[test]
    fn test_unknown_enum_value() {
        match decode(json!({"command": "turn", "direction": "up", "speed": 0.5})) {
            Err(DispatchError::UnknownEnumValue { field, value }) => {
                assert_eq!(field, "direction");
                assert_eq!(value, "up");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            decode(json!({
                "command": "drive_motor",
                "position": "middle",
                "speed": 0.5,
                "direction": "forward"
            })),
            Err(DispatchError::UnknownEnumValue {
                field: "position",
                ..
            })
        ));
    }

    #[test]
    fn test_speed_out_of_range() {
        for speed in [-0.5, 1.0001, 7.0] {
            assert!(matches!(
                decode(json!({"command": "drive", "direction": "forward", "speed": speed})),
                Err(DispatchError::OutOfRange { field: "speed", .. })
            ));
        }
    }

    #[test]
    fn test_malformed_payloads() {
        let dispatcher = Dispatcher::new();
        let rejected = dispatcher.decode(b"not json").unwrap_err();
        assert!(matches!(rejected.error, DispatchError::Malformed(_)));

        assert!(matches!(
            decode(json!({"command": "drive", "direction": "forward", "speed": "fast"})),
            Err(DispatchError::Malformed(_))
        ));
        assert!(matches!(
            decode(json!(["drive"])),
            Err(DispatchError::Malformed(_))
        ));
    }

    #[test]
    fn test_drive_motor_mutates_only_target() {
        let (mut device, _journal) = device();
        let before = device.motor_states();
        let payload = json!({
            "command": "drive_motor",
            "position": "FRONT_LEFT",
            "speed": 0.7,
            "direction": "forward"
        });

        let command = Dispatcher::new()
            .dispatch(payload.to_string().as_bytes(), &mut device)
            .unwrap();
        assert_eq!(command.kind(), "drive_motor");

        let after = device.motor_states();
        assert_eq!(after[0].position, MotorPosition::FrontLeft);
        assert_eq!(after[0].speed, 0.7);
        assert_eq!(after[0].direction, MotorDirection::Forward);
        assert_eq!(&after[1..], &before[1..]);
    }

    #[test]
    fn test_unknown_command_leaves_state() {
        let (mut device, journal) = device();
        device.drive(DriveDirection::Forward, 0.5).unwrap();
        journal.clear();
        let before = device.motor_states();

        let rejected = Dispatcher::new()
            .dispatch(br#"{"command": "levitate"}"#, &mut device)
            .unwrap_err();

        assert_eq!(rejected.kind, "levitate");
        assert!(matches!(rejected.error, DispatchError::UnknownCommand(ref k) if k == "levitate"));
        assert!(rejected.error.is_validation());
        assert_eq!(device.motor_states(), before);
        assert!(journal.is_empty());
    }

    #[test]
    fn test_validation_failure_writes_nothing() {
        let (mut device, journal) = device();
        let dispatcher = Dispatcher::new();

        for payload in [
            json!({"command": "drive", "direction": "forward", "speed": 2.0}),
            json!({"command": "turn", "direction": "around", "speed": 0.5}),
            json!({"command": "turn_right"}),
        ] {
            assert!(
                dispatcher
                    .dispatch(payload.to_string().as_bytes(), &mut device)
                    .is_err()
            );
        }
        assert!(journal.is_empty());
    }

    #[test]
    fn test_hardware_failure_is_classified() {
        let (mut device, journal) = device();
        journal.fail_pin(5);

        let rejected = Dispatcher::new()
            .dispatch(
                br#"{"command": "drive", "direction": "backward", "speed": 0.2}"#,
                &mut device,
            )
            .unwrap_err();
        assert_eq!(rejected.kind, "drive");
        assert!(rejected.error.is_hardware());
        assert!(!rejected.error.is_validation());

        journal.heal_pin(5);
    }

    #[test]
    fn test_stop_through_dispatcher() {
        let (mut device, _journal) = device();
        let dispatcher = Dispatcher::new();
        dispatcher
            .dispatch(br#"{"command": "turn_left", "speed": 0.9}"#, &mut device)
            .unwrap();
        assert!(device.is_moving());

        dispatcher
            .dispatch(br#"{"command": "stop"}"#, &mut device)
            .unwrap();
        assert!(!device.is_moving());
    }

    #[test]
    fn test_registered_kinds() {
        let mut kinds: Vec<_> = Dispatcher::new().kinds().collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec!["drive", "drive_motor", "stop", "turn", "turn_left", "turn_right"]
        );
    }
}
