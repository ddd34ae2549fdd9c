use crate::{
    config::ControlThresholds,
    types::{Actuator, ActuatorState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanAction {
    On,
    Off,
}

impl FanAction {
    pub fn target_state(self) -> ActuatorState {
        match self {
            Self::On => ActuatorState::On,
            Self::Off => ActuatorState::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LidAction {
    Open,
    Closed,
}

impl LidAction {
    pub fn target_state(self) -> ActuatorState {
        match self {
            Self::Open => ActuatorState::Open,
            Self::Closed => ActuatorState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureStatus {
    Optimal,
    TooLow,
    TooHigh,
    CriticalHigh,
}

impl TemperatureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimal => "optimal",
            Self::TooLow => "too_low",
            Self::TooHigh => "too_high",
            Self::CriticalHigh => "critical_high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumidityStatus {
    Optimal,
    TooLow,
    TooHigh,
}

impl HumidityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimal => "optimal",
            Self::TooLow => "too_low",
            Self::TooHigh => "too_high",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureEvaluation {
    pub fan: Option<FanAction>,
    pub lid: Option<LidAction>,
    pub status: TemperatureStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HumidityEvaluation {
    pub fan: Option<FanAction>,
    pub status: HumidityStatus,
    pub message: String,
}

/// Combined actuator recommendation. `None` means "keep the current state".
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRecommendation {
    pub fan: Option<FanAction>,
    pub lid: Option<LidAction>,
    pub temp_status: TemperatureStatus,
    pub humidity_status: HumidityStatus,
    pub temp_message: String,
    pub humidity_message: String,
}

impl ControlRecommendation {
    pub fn message(&self) -> String {
        format!("{} | {}", self.temp_message, self.humidity_message)
    }

    pub fn targets(&self) -> Vec<(Actuator, ActuatorState)> {
        let mut targets = Vec::with_capacity(2);
        if let Some(fan) = self.fan {
            targets.push((Actuator::Fan, fan.target_state()));
        }
        if let Some(lid) = self.lid {
            targets.push((Actuator::Lid, lid.target_state()));
        }
        targets
    }
}

/// Band edges count as optimal. Humidity only drives the fan when temperature
/// leaves it alone.
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine {
    thresholds: ControlThresholds,
}

impl DecisionEngine {
    pub fn new(thresholds: ControlThresholds) -> Self {
        Self { thresholds }
    }

    pub fn recommend(&self, temperature_c: f64, humidity: f64) -> ControlRecommendation {
        let temp = self.evaluate_temperature(temperature_c);
        let hum = self.evaluate_humidity(humidity);

        ControlRecommendation {
            fan: temp.fan.or(hum.fan),
            lid: temp.lid,
            temp_status: temp.status,
            humidity_status: hum.status,
            temp_message: temp.message,
            humidity_message: hum.message,
        }
    }

    pub fn evaluate_temperature(&self, temperature_c: f64) -> TemperatureEvaluation {
        let t = &self.thresholds;
        let band = format!("({:.0}-{:.0}°C)", t.temp_min_c, t.temp_max_c);

        if temperature_c > t.temp_critical_c {
            TemperatureEvaluation {
                fan: Some(FanAction::On),
                lid: Some(LidAction::Open),
                status: TemperatureStatus::CriticalHigh,
                message: format!(
                    "Critical: Temperature {temperature_c:.1}°C exceeds {:.0}°C - Emergency cooling required",
                    t.temp_critical_c
                ),
            }
        } else if temperature_c > t.temp_max_c {
            TemperatureEvaluation {
                fan: Some(FanAction::On),
                lid: Some(LidAction::Open),
                status: TemperatureStatus::TooHigh,
                message: format!(
                    "Temperature {temperature_c:.1}°C above optimal range {band} - Cooling needed"
                ),
            }
        } else if temperature_c < t.temp_min_c {
            TemperatureEvaluation {
                fan: Some(FanAction::Off),
                lid: Some(LidAction::Closed),
                status: TemperatureStatus::TooLow,
                message: format!(
                    "Temperature {temperature_c:.1}°C below optimal range {band} - Heating needed"
                ),
            }
        } else {
            TemperatureEvaluation {
                fan: None,
                lid: None,
                status: TemperatureStatus::Optimal,
                message: format!("Temperature {temperature_c:.1}°C within optimal range {band}"),
            }
        }
    }

    pub fn evaluate_humidity(&self, humidity: f64) -> HumidityEvaluation {
        let t = &self.thresholds;
        let band = format!("({:.0}-{:.0}%)", t.humidity_min, t.humidity_max);

        if humidity > t.humidity_max {
            HumidityEvaluation {
                fan: Some(FanAction::On),
                status: HumidityStatus::TooHigh,
                message: format!(
                    "Humidity {humidity:.1}% above optimal range {band} - Dehumidification needed"
                ),
            }
        } else if humidity < t.humidity_min {
            HumidityEvaluation {
                fan: Some(FanAction::Off),
                status: HumidityStatus::TooLow,
                message: format!(
                    "Humidity {humidity:.1}% below optimal range {band} - Moisture retention needed"
                ),
            }
        } else {
            HumidityEvaluation {
                fan: None,
                status: HumidityStatus::Optimal,
                message: format!("Humidity {humidity:.1}% within optimal range {band}"),
            }
        }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(ControlThresholds::default())
    }
}
