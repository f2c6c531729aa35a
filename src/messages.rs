// Message types for the runtime

use serde::{Deserialize, Serialize};

use crate::motor::{
    DriveDirection, Measurements, MotorDirection, MotorPosition, MotorSnapshot, TurnDirection,
};

/// Raw command message as it arrives on the command topic
///
/// Only the `command` field is common to every kind; the remaining fields are
/// checked by the dispatcher against the schema of that kind.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub command: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Validated command, ready to run against the active device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Drive {
        direction: DriveDirection,
        speed: f32,
    },
    Turn {
        direction: TurnDirection,
        speed: f32,
    },
    TurnLeft {
        speed: f32,
    },
    TurnRight {
        speed: f32,
    },
    Stop,
    DriveMotor {
        position: MotorPosition,
        direction: MotorDirection,
        speed: f32,
    },
}

impl Command {
    /// Wire name of this command kind
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Drive { .. } => "drive",
            Command::Turn { .. } => "turn",
            Command::TurnLeft { .. } => "turn_left",
            Command::TurnRight { .. } => "turn_right",
            Command::Stop => "stop",
            Command::DriveMotor { .. } => "drive_motor",
        }
    }
}

/// Published on the measurement topic whenever the driver has encoder data
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementReport {
    pub device: String,
    pub measurements: Measurements,
    pub motors: Vec<MotorSnapshot>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    HardwareFault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_keeps_extra_fields() {
        let envelope: CommandEnvelope =
            serde_json::from_str(r#"{"command": "drive", "direction": "forward", "speed": 0.5}"#)
                .unwrap();
        assert_eq!(envelope.command.as_deref(), Some("drive"));
        assert_eq!(envelope.fields.len(), 2);
        assert_eq!(envelope.fields["speed"], serde_json::json!(0.5));
    }

    #[test]
    fn test_envelope_without_command() {
        let envelope: CommandEnvelope = serde_json::from_str(r#"{"speed": 1.0}"#).unwrap();
        assert!(envelope.command.is_none());
    }

    #[test]
    fn test_health_serialization() {
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(),
            r#""cmd_stale""#
        );
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::HardwareFault).unwrap(),
            r#""hardware_fault""#
        );
    }

    #[test]
    fn test_command_kind_names() {
        assert_eq!(Command::Stop.kind(), "stop");
        assert_eq!(Command::TurnLeft { speed: 0.1 }.kind(), "turn_left");
    }
}
