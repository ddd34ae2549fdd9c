use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Actuator, ActuatorState};

#[derive(Debug, Error, PartialEq)]
pub enum TelemetryError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is not a finite number")]
    NotNumeric(&'static str),
    #[error("status for {0} is empty")]
    EmptyStatus(Actuator),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_c: f64,
    pub humidity: f64,
    pub timestamp: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampSource {
    Reported,
    Missing,
    Unparsable(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportedStates {
    pub fan: Option<ActuatorState>,
    pub lid: Option<ActuatorState>,
    pub stirrer: Option<ActuatorState>,
}

impl ReportedStates {
    pub fn iter(&self) -> impl Iterator<Item = (Actuator, &ActuatorState)> {
        [
            (Actuator::Fan, self.fan.as_ref()),
            (Actuator::Lid, self.lid.as_ref()),
            (Actuator::Stirrer, self.stirrer.as_ref()),
        ]
        .into_iter()
        .filter_map(|(actuator, state)| state.map(|state| (actuator, state)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub reading: Reading,
    pub reported: ReportedStates,
    pub timestamp_source: TimestampSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub actuator: Actuator,
    pub state: ActuatorState,
    pub timestamp: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize)]
struct RawTelemetry {
    temperature: Option<Value>,
    humidity: Option<Value>,
    timestamp: Option<Value>,
    relay: Option<Value>,
    lid: Option<Value>,
    stirrer: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    status: Option<Value>,
    timestamp: Option<Value>,
}

/// `now` is used when the body has no usable timestamp.
pub fn normalize_telemetry(
    payload: &[u8],
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<Telemetry, TelemetryError> {
    let raw: RawTelemetry = serde_json::from_slice(payload)
        .map_err(|err| TelemetryError::InvalidJson(err.to_string()))?;

    let temperature_c = required_number(raw.temperature.as_ref(), "temperature")?;
    let humidity = required_number(raw.humidity.as_ref(), "humidity")?;

    let (timestamp, timestamp_source) = match raw.timestamp.as_ref() {
        None | Some(Value::Null) => (local_now(tz, now), TimestampSource::Missing),
        Some(Value::String(text)) if text.trim().is_empty() => {
            (local_now(tz, now), TimestampSource::Missing)
        }
        Some(Value::String(text)) => match parse_timestamp(text, tz) {
            Some(parsed) => (parsed, TimestampSource::Reported),
            None => (local_now(tz, now), TimestampSource::Unparsable(text.clone())),
        },
        Some(other) => (
            local_now(tz, now),
            TimestampSource::Unparsable(other.to_string()),
        ),
    };

    let reported = ReportedStates {
        fan: alias_state(Actuator::Fan, raw.relay.as_ref()),
        lid: alias_state(Actuator::Lid, raw.lid.as_ref()),
        stirrer: alias_state(Actuator::Stirrer, raw.stirrer.as_ref()),
    };

    Ok(Telemetry {
        reading: Reading {
            temperature_c,
            humidity,
            timestamp,
        },
        reported,
        timestamp_source,
    })
}

pub fn parse_status(
    actuator: Actuator,
    payload: &[u8],
    tz: Tz,
) -> Result<StatusReport, TelemetryError> {
    let raw: RawStatus = serde_json::from_slice(payload)
        .map_err(|err| TelemetryError::InvalidJson(err.to_string()))?;

    let status = match raw.status {
        Some(Value::String(status)) => status,
        Some(Value::Null) | None => return Err(TelemetryError::MissingField("status")),
        Some(other) => other.to_string(),
    };
    let state = actuator
        .normalize_status(&status)
        .ok_or(TelemetryError::EmptyStatus(actuator))?;

    let timestamp = match raw.timestamp {
        Some(Value::String(text)) => parse_timestamp(&text, tz),
        _ => None,
    };

    Ok(StatusReport {
        actuator,
        state,
        timestamp,
    })
}

/// Parses an ISO-8601 instant. A trailing `Z` means UTC; a value without an
/// offset is read as local time in `tz`. The result carries `tz`'s offset.
pub fn parse_timestamp(text: &str, tz: Tz) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();

    if let Ok(absolute) = DateTime::parse_from_rfc3339(text) {
        return Some(to_local(absolute.with_timezone(&Utc), tz));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())?;
    let local = tz.from_local_datetime(&naive).earliest()?;
    Some(to_local(local.with_timezone(&Utc), tz))
}

fn local_now(tz: Tz, now: DateTime<Utc>) -> DateTime<FixedOffset> {
    to_local(now, tz)
}

fn to_local(instant: DateTime<Utc>, tz: Tz) -> DateTime<FixedOffset> {
    let local = instant.with_timezone(&tz);
    local.with_timezone(&local.offset().fix())
}

fn required_number(value: Option<&Value>, field: &'static str) -> Result<f64, TelemetryError> {
    match value {
        None | Some(Value::Null) => Err(TelemetryError::MissingField(field)),
        Some(value) => value
            .as_f64()
            .filter(|number| number.is_finite())
            .ok_or(TelemetryError::NotNumeric(field)),
    }
}

fn alias_state(actuator: Actuator, value: Option<&Value>) -> Option<ActuatorState> {
    match value {
        Some(Value::String(raw)) => actuator.normalize_status(raw),
        _ => None,
    }
}
