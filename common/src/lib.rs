pub mod config;
pub mod decision;
pub mod telemetry;
pub mod topics;
pub mod types;

pub use config::{ConfigError, ControlThresholds, NetworkConfig, RuntimeConfig, StirrerConfig};
pub use decision::{
    ControlRecommendation, DecisionEngine, FanAction, HumidityStatus, LidAction,
    TemperatureStatus,
};
pub use telemetry::{
    normalize_telemetry, parse_status, Reading, ReportedStates, StatusReport, Telemetry,
    TelemetryError, TimestampSource,
};
pub use topics::*;
pub use types::{Actuator, ActuatorState, CommandPayload, DeviceSnapshot};
