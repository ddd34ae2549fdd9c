use std::{sync::Arc, time::Duration};

use anyhow::Context;
use compost_common::{
    Actuator, DecisionEngine, RuntimeConfig, StirrerConfig, TOPIC_CONTROLLER_STATE,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    dispatcher::CommandDispatcher,
    handler::{handle_mqtt_message, ControlContext},
    scheduler::run_stirrer_cycle,
    tracker::DeviceStateTracker,
    transport::{encode, CommandPublisher, MqttPublisher},
};

const MQTT_RETRY_DELAY: Duration = Duration::from_secs(2);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RuntimeConfig::from_env().context("invalid controller configuration")?;
    let tz = config.tz()?;
    info!(
        host = %config.network.mqtt_host,
        port = config.network.mqtt_port,
        sensor_topic = %config.network.sensor_topic,
        timezone = %tz,
        "starting compost controller"
    );

    let mut mqtt_options = MqttOptions::new(
        config.network.client_id.clone(),
        config.network.mqtt_host.clone(),
        config.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    if let Some((user, pass)) = config.network.credentials() {
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    // Process-lifetime state; a restart begins from UNKNOWN.
    let tracker = Arc::new(DeviceStateTracker::new());
    let publisher: Arc<dyn CommandPublisher> = Arc::new(MqttPublisher::new(mqtt.clone()));
    let dispatcher = CommandDispatcher::new(tracker, publisher);

    let ctx = ControlContext {
        engine: DecisionEngine::new(config.control),
        dispatcher,
        tz,
        sensor_topic: config.network.sensor_topic.clone(),
    };

    let shutdown = CancellationToken::new();
    let state_task = spawn_state_publish_loop(
        ctx.dispatcher.clone(),
        Duration::from_secs(config.state_publish_interval_secs),
        shutdown.clone(),
    );

    let mqtt_task = tokio::spawn(run_mqtt_loop(
        ctx,
        mqtt,
        eventloop,
        config.stirrer,
        shutdown.clone(),
    ));

    let reason = shutdown_signal().await;
    info!(signal = reason, "shutdown requested");
    shutdown.cancel();

    if let Err(err) = mqtt_task.await {
        warn!("mqtt task failed: {err}");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, state_task).await.is_err() {
        warn!("state publisher did not stop in time");
    }
    info!("shutdown complete");
    Ok(())
}

/// Queues every subscription without waiting. Only the MQTT loop drains the
/// request queue, so a full queue must not stall it. Returns how many
/// subscriptions were queued.
fn subscribe_topics(mqtt: &AsyncClient, sensor_topic: &str) -> usize {
    let topics = std::iter::once(sensor_topic)
        .chain(Actuator::ALL.into_iter().map(|actuator| actuator.status_topic()));

    let mut queued = 0;
    for topic in topics {
        match mqtt.try_subscribe(topic, QoS::AtLeastOnce) {
            Ok(()) => queued += 1,
            Err(err) => warn!(topic, "mqtt subscribe failed: {err}"),
        }
    }
    queued
}

struct StirrerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl StirrerTask {
    fn spawn(
        dispatcher: CommandDispatcher,
        config: StirrerConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        let token = shutdown.child_token();
        let handle = tokio::spawn(run_stirrer_cycle(dispatcher, config, token.clone()));
        Self { token, handle }
    }

    async fn stop(self) {
        self.token.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("stirrer scheduler task failed: {err}"),
            Err(_) => warn!("stirrer scheduler did not stop in time"),
        }
    }
}

/// Stops the running cycle and starts a new one from its first transition.
/// The tracked stirrer state is dropped with the old cycle, so the new one
/// always issues its initial command.
async fn restart_stirrer_cycle(
    previous: Option<StirrerTask>,
    dispatcher: &CommandDispatcher,
    config: StirrerConfig,
    shutdown: &CancellationToken,
) -> StirrerTask {
    if let Some(task) = previous {
        task.stop().await;
    }
    dispatcher.tracker().forget(Actuator::Stirrer).await;
    StirrerTask::spawn(dispatcher.clone(), config, shutdown)
}

/// Polls the broker until shutdown. Every (re)connect re-subscribes and
/// restarts the stirrer cycle from its first transition.
async fn run_mqtt_loop(
    ctx: ControlContext,
    mqtt: AsyncClient,
    mut eventloop: EventLoop,
    stirrer: StirrerConfig,
    shutdown: CancellationToken,
) {
    let mut scheduler: Option<StirrerTask> = None;

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                if let Err(err) = handle_mqtt_message(&ctx, &message.topic, &message.payload).await
                {
                    warn!("mqtt message handling error: {err:#}");
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                let subscribed = subscribe_topics(&mqtt, &ctx.sensor_topic);
                info!(subscribed, "mqtt connected");
                scheduler = Some(
                    restart_stirrer_cycle(scheduler.take(), &ctx.dispatcher, stirrer, &shutdown)
                        .await,
                );
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                warn!("mqtt disconnected by broker");
            }
            Ok(_) => {}
            Err(err) => {
                warn!("mqtt poll error: {err}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(MQTT_RETRY_DELAY) => {}
                }
            }
        }
    }

    if let Some(task) = scheduler {
        task.stop().await;
    }

    if let Err(err) = mqtt.try_disconnect() {
        warn!("mqtt disconnect failed: {err}");
        return;
    }
    let drain = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("mqtt disconnect did not complete in time");
    }
}

fn spawn_state_publish_loop(
    dispatcher: CommandDispatcher,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let snapshot = dispatcher.tracker().snapshot().await;
            let body = match encode(&snapshot) {
                Ok(body) => body,
                Err(err) => {
                    warn!("controller state serialization failed: {err}");
                    continue;
                }
            };
            if let Err(err) = dispatcher
                .publisher()
                .publish(TOPIC_CONTROLLER_STATE, body, true)
                .await
            {
                warn!("controller state publish failed: {err}");
            }
        }
    })
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler unavailable: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("SIGTERM handler unavailable: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

#[cfg(test)]
mod tests {
    use compost_common::{ActuatorState, TOPIC_SENSOR_DATA};
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::transport::testing::RecordingPublisher;

    #[tokio::test(start_paused = true)]
    async fn state_snapshot_is_published_retained_until_shutdown() {
        let publisher = Arc::new(RecordingPublisher::new());
        let tracker = Arc::new(DeviceStateTracker::new());
        tracker.observe(Actuator::Fan, ActuatorState::On).await;
        let dispatcher = CommandDispatcher::new(tracker, publisher.clone());
        let shutdown = CancellationToken::new();

        let task = spawn_state_publish_loop(dispatcher, Duration::from_secs(30), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown.cancel();
        task.await.unwrap();

        let sent = publisher.sent_to(TOPIC_CONTROLLER_STATE);
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|sent| sent.retain));
        assert_eq!(
            sent[0].body,
            json!({"fan": "ON", "lid": "UNKNOWN", "stirrer": "UNKNOWN"})
        );
    }

    fn stirrer_config() -> StirrerConfig {
        StirrerConfig {
            on_secs: 300,
            off_secs: 1_800,
            retry_backoff_secs: 60,
        }
    }

    #[tokio::test]
    async fn subscriptions_are_queued_for_every_topic() {
        let (mqtt, _eventloop) =
            AsyncClient::new(MqttOptions::new("compost-test", "localhost", 1883), 64);

        assert_eq!(subscribe_topics(&mqtt, TOPIC_SENSOR_DATA), 1 + Actuator::ALL.len());
    }

    #[tokio::test]
    async fn resubscribe_returns_when_request_queue_is_full() {
        let (mqtt, _eventloop) =
            AsyncClient::new(MqttOptions::new("compost-test", "localhost", 1883), 64);
        let publisher = MqttPublisher::new(mqtt.clone());
        for _ in 0..100 {
            let _ = publisher
                .publish(TOPIC_CONTROLLER_STATE, b"{}".to_vec(), true)
                .await;
        }

        let queued = tokio::time::timeout(Duration::from_secs(3), async {
            subscribe_topics(&mqtt, TOPIC_SENSOR_DATA)
        })
        .await
        .expect("subscribing must not wait for queue space");
        assert_eq!(queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_restarts_stirrer_cycle_from_first_transition() {
        let publisher = Arc::new(RecordingPublisher::new());
        let dispatcher =
            CommandDispatcher::new(Arc::new(DeviceStateTracker::new()), publisher.clone());
        let shutdown = CancellationToken::new();
        let start = Instant::now();

        let first = restart_stirrer_cycle(None, &dispatcher, stirrer_config(), &shutdown).await;
        // Reconnect 100 s into the 300 s ON phase.
        tokio::time::sleep(Duration::from_secs(100)).await;
        let second =
            restart_stirrer_cycle(Some(first), &dispatcher, stirrer_config(), &shutdown).await;
        tokio::time::sleep(Duration::from_secs(350)).await;
        shutdown.cancel();
        second.stop().await;

        let actions: Vec<_> = publisher
            .sent_to("compost/cmd/stirrer")
            .into_iter()
            .map(|sent| {
                (
                    sent.body["action"].as_str().unwrap_or_default().to_string(),
                    sent.at.duration_since(start).as_secs(),
                )
            })
            .collect();
        // The first cycle's STOP at t=300 never happens.
        assert_eq!(
            actions,
            vec![
                ("START".to_string(), 0),
                ("START".to_string(), 100),
                ("STOP".to_string(), 400),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_stirrer_cycle_promptly() {
        let publisher = Arc::new(RecordingPublisher::new());
        let dispatcher =
            CommandDispatcher::new(Arc::new(DeviceStateTracker::new()), publisher.clone());
        let shutdown = CancellationToken::new();

        let task = restart_stirrer_cycle(None, &dispatcher, stirrer_config(), &shutdown).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        let stopping_at = Instant::now();
        shutdown.cancel();
        task.stop().await;

        assert!(stopping_at.elapsed() < Duration::from_secs(1));
        assert_eq!(publisher.sent_to("compost/cmd/stirrer").len(), 1);
    }
}
