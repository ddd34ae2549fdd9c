use std::str::FromStr;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topics::TOPIC_SENSOR_DATA;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
    #[error("inconsistent configuration: {0}")]
    Inconsistent(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlThresholds {
    pub temp_min_c: f64,
    pub temp_max_c: f64,
    pub temp_critical_c: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

impl Default for ControlThresholds {
    fn default() -> Self {
        Self {
            temp_min_c: 55.0,
            temp_max_c: 65.0,
            temp_critical_c: 70.0,
            humidity_min: 50.0,
            humidity_max: 60.0,
        }
    }
}

impl ControlThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            self.temp_min_c,
            self.temp_max_c,
            self.temp_critical_c,
            self.humidity_min,
            self.humidity_max,
        ];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(ConfigError::Inconsistent("thresholds must be finite"));
        }
        if self.temp_min_c > self.temp_max_c {
            return Err(ConfigError::Inconsistent(
                "temperature minimum exceeds maximum",
            ));
        }
        if self.temp_critical_c < self.temp_max_c {
            return Err(ConfigError::Inconsistent(
                "critical temperature below optimal maximum",
            ));
        }
        if self.humidity_min > self.humidity_max {
            return Err(ConfigError::Inconsistent("humidity minimum exceeds maximum"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StirrerConfig {
    pub on_secs: u64,
    pub off_secs: u64,
    pub retry_backoff_secs: u64,
}

impl Default for StirrerConfig {
    fn default() -> Self {
        Self {
            on_secs: 300,
            off_secs: 1_800,
            retry_backoff_secs: 60,
        }
    }
}

impl StirrerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.on_secs == 0 || self.off_secs == 0 || self.retry_backoff_secs == 0 {
            return Err(ConfigError::Inconsistent(
                "stirrer durations must be non-zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
    pub sensor_topic: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "compost_controller".to_string(),
            sensor_topic: TOPIC_SENSOR_DATA.to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.mqtt_user.is_empty() || self.mqtt_pass.is_empty() {
            return None;
        }
        Some((&self.mqtt_user, &self.mqtt_pass))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub control: ControlThresholds,
    pub stirrer: StirrerConfig,
    pub network: NetworkConfig,
    pub timezone: String,
    pub state_publish_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control: ControlThresholds::default(),
            stirrer: StirrerConfig::default(),
            network: NetworkConfig::default(),
            timezone: "Asia/Singapore".to_string(),
            state_publish_interval_secs: 30,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a key lookup, falling back to defaults
    /// for unset or empty keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("MQTT_BROKER_HOST") {
            config.network.mqtt_host = host;
        }
        parse_into(&get, "MQTT_BROKER_PORT", &mut config.network.mqtt_port)?;
        if let Some(user) = get("MQTT_USERNAME") {
            config.network.mqtt_user = user;
        }
        if let Some(pass) = get("MQTT_PASSWORD") {
            config.network.mqtt_pass = pass;
        }
        if let Some(client_id) = get("MQTT_CLIENT_ID") {
            config.network.client_id = client_id;
        }
        if let Some(topic) = get("MQTT_SENSOR_TOPIC") {
            config.network.sensor_topic = topic;
        }

        parse_into(&get, "TEMP_OPTIMAL_MIN", &mut config.control.temp_min_c)?;
        parse_into(&get, "TEMP_OPTIMAL_MAX", &mut config.control.temp_max_c)?;
        parse_into(&get, "TEMP_CRITICAL", &mut config.control.temp_critical_c)?;
        parse_into(&get, "HUMIDITY_OPTIMAL_MIN", &mut config.control.humidity_min)?;
        parse_into(&get, "HUMIDITY_OPTIMAL_MAX", &mut config.control.humidity_max)?;

        parse_into(&get, "STIRRER_ON_SECS", &mut config.stirrer.on_secs)?;
        parse_into(&get, "STIRRER_OFF_SECS", &mut config.stirrer.off_secs)?;
        parse_into(&get, "STIRRER_RETRY_SECS", &mut config.stirrer.retry_backoff_secs)?;
        parse_into(
            &get,
            "STATE_PUBLISH_INTERVAL_SECS",
            &mut config.state_publish_interval_secs,
        )?;

        if let Some(timezone) = get("COMPOST_TIMEZONE") {
            config.timezone = timezone.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.control.validate()?;
        self.stirrer.validate()?;
        if self.state_publish_interval_secs == 0 {
            return Err(ConfigError::Inconsistent(
                "state publish interval must be non-zero",
            ));
        }
        self.tz()?;
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }
}

fn parse_into<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = get(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.network.credentials(), None);
    }

    #[test]
    fn overrides_are_applied() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("MQTT_BROKER_HOST", "broker.local"),
            ("MQTT_BROKER_PORT", "8883"),
            ("MQTT_USERNAME", "compost"),
            ("MQTT_PASSWORD", "secret"),
            ("TEMP_OPTIMAL_MAX", "66.5"),
            ("STIRRER_ON_SECS", " 120 "),
            ("COMPOST_TIMEZONE", "UTC"),
        ]))
        .unwrap();

        assert_eq!(config.network.mqtt_host, "broker.local");
        assert_eq!(config.network.mqtt_port, 8883);
        assert_eq!(config.network.credentials(), Some(("compost", "secret")));
        assert_eq!(config.control.temp_max_c, 66.5);
        assert_eq!(config.stirrer.on_secs, 120);
        assert_eq!(config.tz().unwrap(), Tz::UTC);
    }

    #[test]
    fn unparsable_value_is_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[("MQTT_BROKER_PORT", "eighty")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "MQTT_BROKER_PORT",
                value: "eighty".to_string()
            }
        );
    }

    #[test]
    fn inconsistent_bands_are_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[("TEMP_CRITICAL", "60")])).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));

        let err = RuntimeConfig::from_lookup(lookup(&[("HUMIDITY_OPTIMAL_MIN", "70")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));

        let err = RuntimeConfig::from_lookup(lookup(&[("STIRRER_OFF_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = RuntimeConfig::from_lookup(lookup(&[("COMPOST_TIMEZONE", "Mars/Olympus")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownTimezone("Mars/Olympus".to_string()));
    }
}
