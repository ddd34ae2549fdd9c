use compost_common::{Actuator, ActuatorState, DeviceSnapshot};
use tokio::sync::Mutex;

/// Last-known state of every actuator, shared by the reactive path and the
/// stirrer scheduler.
///
/// Each actuator has its own lock, so writes to one key never wait on
/// another. Writes are last-write-wins: there is no sequencing by timestamp,
/// and a status report always replaces an optimistic command record.
#[derive(Debug, Default)]
pub struct DeviceStateTracker {
    slots: [Mutex<ActuatorState>; 3],
}

impl DeviceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, actuator: Actuator) -> ActuatorState {
        self.slot(actuator).lock().await.clone()
    }

    /// Records a state reported by the device itself.
    pub async fn observe(&self, actuator: Actuator, reported: ActuatorState) {
        *self.slot(actuator).lock().await = reported;
    }

    /// Records a state the controller just commanded, ahead of confirmation.
    pub async fn record_command(&self, actuator: Actuator, commanded: ActuatorState) {
        *self.slot(actuator).lock().await = commanded;
    }

    pub async fn forget(&self, actuator: Actuator) {
        *self.slot(actuator).lock().await = ActuatorState::Unknown;
    }

    pub async fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            fan: self.get(Actuator::Fan).await,
            lid: self.get(Actuator::Lid).await,
            stirrer: self.get(Actuator::Stirrer).await,
        }
    }

    fn slot(&self, actuator: Actuator) -> &Mutex<ActuatorState> {
        &self.slots[actuator.index()]
    }
}
