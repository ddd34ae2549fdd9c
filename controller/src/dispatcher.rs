use std::sync::Arc;

use compost_common::{Actuator, ActuatorState, CommandPayload};
use tracing::{debug, error, info, warn};

use crate::{
    tracker::DeviceStateTracker,
    transport::{encode, CommandPublisher},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Tracked state already matched; nothing was sent.
    Skipped,
    Published,
    /// The transport refused the command; tracked state is untouched.
    Failed,
    /// The state has no command directive for this actuator.
    Rejected,
}

impl DispatchOutcome {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Skipped | Self::Published)
    }
}

/// Publishes actuator commands only when they would change tracked state.
#[derive(Clone)]
pub struct CommandDispatcher {
    tracker: Arc<DeviceStateTracker>,
    publisher: Arc<dyn CommandPublisher>,
}

impl CommandDispatcher {
    pub fn new(tracker: Arc<DeviceStateTracker>, publisher: Arc<dyn CommandPublisher>) -> Self {
        Self { tracker, publisher }
    }

    pub fn tracker(&self) -> &Arc<DeviceStateTracker> {
        &self.tracker
    }

    pub fn publisher(&self) -> &Arc<dyn CommandPublisher> {
        &self.publisher
    }

    pub async fn dispatch(&self, actuator: Actuator, desired: ActuatorState) -> DispatchOutcome {
        let current = self.tracker.get(actuator).await;
        if current == desired {
            debug!(%actuator, state = %desired, "actuator already in desired state");
            return DispatchOutcome::Skipped;
        }

        let Some(action) = actuator.directive(&desired) else {
            error!(%actuator, state = %desired, "no command directive for state");
            return DispatchOutcome::Rejected;
        };

        let payload = match encode(&CommandPayload { action }) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%actuator, action, "command serialization failed: {err}");
                return DispatchOutcome::Failed;
            }
        };

        let topic = actuator.command_topic();
        match self.publisher.publish(topic, payload, false).await {
            Ok(()) => {
                self.tracker.record_command(actuator, desired.clone()).await;
                info!(%actuator, action, from = %current, to = %desired, "command published");
                DispatchOutcome::Published
            }
            Err(err) => {
                warn!(%actuator, action, topic, "command publish failed: {err}");
                DispatchOutcome::Failed
            }
        }
    }
}
