use crate::types::Actuator;

pub const TOPIC_SENSOR_DATA: &str = "compost/sensor/data";

pub const TOPIC_CMD_FAN: &str = "compost/cmd/fan";
pub const TOPIC_CMD_LID: &str = "compost/cmd/lid";
pub const TOPIC_CMD_STIRRER: &str = "compost/cmd/stirrer";

pub const TOPIC_STATUS_FAN: &str = "compost/status/fan";
pub const TOPIC_STATUS_LID: &str = "compost/status/lid";
pub const TOPIC_STATUS_STIRRER: &str = "compost/status/stirrer";

pub const TOPIC_CONTROLLER_STATE: &str = "compost/controller/state";

impl Actuator {
    pub fn command_topic(self) -> &'static str {
        match self {
            Self::Fan => TOPIC_CMD_FAN,
            Self::Lid => TOPIC_CMD_LID,
            Self::Stirrer => TOPIC_CMD_STIRRER,
        }
    }

    pub fn status_topic(self) -> &'static str {
        match self {
            Self::Fan => TOPIC_STATUS_FAN,
            Self::Lid => TOPIC_STATUS_LID,
            Self::Stirrer => TOPIC_STATUS_STIRRER,
        }
    }

    pub fn from_status_topic(topic: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|actuator| actuator.status_topic() == topic)
    }
}
