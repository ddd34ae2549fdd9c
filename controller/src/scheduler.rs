use std::time::Duration;

use compost_common::{Actuator, ActuatorState, StirrerConfig};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatcher::CommandDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StirrerPhase {
    On,
    Off,
}

impl StirrerPhase {
    pub fn next(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }

    pub fn target_state(self) -> ActuatorState {
        match self {
            Self::On => ActuatorState::Running,
            Self::Off => ActuatorState::Stopped,
        }
    }

    pub fn duration(self, config: &StirrerConfig) -> Duration {
        match self {
            Self::On => Duration::from_secs(config.on_secs),
            Self::Off => Duration::from_secs(config.off_secs),
        }
    }
}

/// Internal cycle position. The tracker's `stirrer` entry is its external
/// projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StirrerCycleState {
    pub phase: StirrerPhase,
    pub phase_started_at: Instant,
}

impl StirrerCycleState {
    /// `Off` is entered implicitly, so the first transition issued is `On`.
    pub fn initial(now: Instant) -> Self {
        Self {
            phase: StirrerPhase::Off,
            phase_started_at: now,
        }
    }
}

/// Runs the stirrer ON/OFF cycle until `shutdown` is cancelled.
pub async fn run_stirrer_cycle(
    dispatcher: CommandDispatcher,
    config: StirrerConfig,
    shutdown: CancellationToken,
) {
    let backoff = Duration::from_secs(config.retry_backoff_secs);
    let mut cycle = StirrerCycleState::initial(Instant::now());
    info!(
        on_secs = config.on_secs,
        off_secs = config.off_secs,
        "stirrer scheduler started"
    );

    loop {
        let phase = cycle.phase.next();

        loop {
            let outcome = dispatcher
                .dispatch(Actuator::Stirrer, phase.target_state())
                .await;
            if outcome.is_settled() {
                break;
            }
            warn!(
                ?phase,
                ?outcome,
                retry_in_secs = config.retry_backoff_secs,
                "stirrer transition failed, backing off"
            );
            if !wait_or_cancel(backoff, &shutdown).await {
                info!("stirrer scheduler stopped");
                return;
            }
        }

        info!(
            ?phase,
            previous_phase_secs = cycle.phase_started_at.elapsed().as_secs(),
            "stirrer phase entered"
        );
        cycle = StirrerCycleState {
            phase,
            phase_started_at: Instant::now(),
        };

        if !wait_or_cancel(phase.duration(&config), &shutdown).await {
            info!("stirrer scheduler stopped");
            return;
        }
    }
}

/// Sleeps for `duration` unless cancelled first. Returns `false` on cancel.
async fn wait_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{tracker::DeviceStateTracker, transport::testing::RecordingPublisher};

    fn config() -> StirrerConfig {
        StirrerConfig {
            on_secs: 300,
            off_secs: 1_800,
            retry_backoff_secs: 60,
        }
    }

    fn spawn_cycle(
        publisher: Arc<RecordingPublisher>,
        tracker: Arc<DeviceStateTracker>,
    ) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let dispatcher = CommandDispatcher::new(tracker, publisher);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_stirrer_cycle(dispatcher, config(), shutdown.clone()));
        (shutdown, handle)
    }

    fn actions(publisher: &RecordingPublisher) -> Vec<(String, u64)> {
        let sent = publisher.sent_to("compost/cmd/stirrer");
        let Some(first) = sent.first().map(|sent| sent.at) else {
            return Vec::new();
        };
        sent.iter()
            .map(|sent| {
                (
                    sent.body["action"].as_str().unwrap_or_default().to_string(),
                    sent.at.duration_since(first).as_secs(),
                )
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn alternates_on_and_off_with_configured_durations() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = Arc::new(DeviceStateTracker::new());
        let (shutdown, handle) = spawn_cycle(publisher.clone(), tracker.clone());

        tokio::time::sleep(Duration::from_secs(4_000)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(
            actions(&publisher),
            vec![
                ("START".to_string(), 0),
                ("STOP".to_string(), 300),
                ("START".to_string(), 2_100),
                ("STOP".to_string(), 2_400),
            ]
        );
        assert_eq!(
            tracker.get(Actuator::Stirrer).await,
            ActuatorState::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_transition_is_retried_after_backoff() {
        let publisher = Arc::new(RecordingPublisher::failing(2));
        let tracker = Arc::new(DeviceStateTracker::new());
        let (shutdown, handle) = spawn_cycle(publisher.clone(), tracker);

        tokio::time::sleep(Duration::from_secs(500)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // Two failed START attempts at t=0 and t=60, success at t=120.
        assert_eq!(publisher.attempts(), 4);
        let sent = publisher.sent_to("compost/cmd/stirrer");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body, json!({"action": "START"}));
        assert_eq!(sent[1].body, json!({"action": "STOP"}));
        assert_eq!(sent[1].at.duration_since(sent[0].at).as_secs(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_long_phase() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = Arc::new(DeviceStateTracker::new());
        let (shutdown, handle) = spawn_cycle(publisher.clone(), tracker);

        // Into the 1800 s OFF phase.
        tokio::time::sleep(Duration::from_secs(400)).await;
        let cancelled_at = Instant::now();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should exit promptly")
            .unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert_eq!(publisher.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let publisher = Arc::new(RecordingPublisher::failing(usize::MAX));
        let tracker = Arc::new(DeviceStateTracker::new());
        let (shutdown, handle) = spawn_cycle(publisher.clone(), tracker);

        tokio::time::sleep(Duration::from_secs(90)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should exit promptly")
            .unwrap();

        assert_eq!(publisher.attempts(), 2);
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn already_running_stirrer_is_not_restarted() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = Arc::new(DeviceStateTracker::new());
        tracker
            .observe(Actuator::Stirrer, ActuatorState::Running)
            .await;
        let (shutdown, handle) = spawn_cycle(publisher.clone(), tracker);

        tokio::time::sleep(Duration::from_secs(310)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let sent = publisher.sent_to("compost/cmd/stirrer");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, json!({"action": "STOP"}));
    }

    #[test]
    fn phases_alternate() {
        assert_eq!(StirrerPhase::Off.next(), StirrerPhase::On);
        assert_eq!(StirrerPhase::On.next(), StirrerPhase::Off);
        assert_eq!(StirrerPhase::On.duration(&config()), Duration::from_secs(300));
        assert_eq!(StirrerPhase::Off.target_state(), ActuatorState::Stopped);
    }
}
