use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actuator {
    Fan,
    Lid,
    Stirrer,
}

impl Actuator {
    pub const ALL: [Actuator; 3] = [Self::Fan, Self::Lid, Self::Stirrer];

    pub fn index(self) -> usize {
        match self {
            Self::Fan => 0,
            Self::Lid => 1,
            Self::Stirrer => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::Lid => "lid",
            Self::Stirrer => "stirrer",
        }
    }

    /// Unknown values are kept verbatim as [`ActuatorState::Other`]; an empty
    /// string yields `None`.
    pub fn normalize_status(self, raw: &str) -> Option<ActuatorState> {
        let value = raw.trim().to_ascii_uppercase();
        if value.is_empty() {
            return None;
        }

        let state = match (self, value.as_str()) {
            (Self::Fan, "ON" | "RUNNING" | "START") => ActuatorState::On,
            (Self::Fan, "OFF" | "STOPPED" | "STOP") => ActuatorState::Off,
            (Self::Lid, "OPEN" | "OPENED") => ActuatorState::Open,
            (Self::Lid, "CLOSE" | "CLOSED") => ActuatorState::Closed,
            (Self::Stirrer, "ON" | "RUNNING" | "START") => ActuatorState::Running,
            (Self::Stirrer, "OFF" | "STOPPED" | "STOP") => ActuatorState::Stopped,
            _ => ActuatorState::Other(value),
        };
        Some(state)
    }

    pub fn directive(self, state: &ActuatorState) -> Option<&'static str> {
        match (self, state) {
            (Self::Fan, ActuatorState::On) => Some("ON"),
            (Self::Fan, ActuatorState::Off) => Some("OFF"),
            (Self::Lid, ActuatorState::Open) => Some("OPEN"),
            (Self::Lid, ActuatorState::Closed) => Some("CLOSED"),
            (Self::Stirrer, ActuatorState::Running) => Some("START"),
            (Self::Stirrer, ActuatorState::Stopped) => Some("STOP"),
            _ => None,
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActuatorState {
    #[default]
    Unknown,
    On,
    Off,
    Open,
    Closed,
    Running,
    Stopped,
    /// A reported value outside the actuator's vocabulary, kept as-is.
    Other(String),
}

impl ActuatorState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Other(value) => value,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActuatorState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Outbound command body: `{"action": "ON"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandPayload {
    pub action: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub fan: ActuatorState,
    pub lid: ActuatorState,
    pub stirrer: ActuatorState,
}
