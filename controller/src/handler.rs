use anyhow::Context;
use chrono::Utc;
use chrono_tz::Tz;
use compost_common::{
    normalize_telemetry, parse_status, Actuator, DecisionEngine, TemperatureStatus,
    TimestampSource,
};
use tracing::{debug, info, warn};

use crate::dispatcher::CommandDispatcher;

pub const MAX_MQTT_PAYLOAD_BYTES: usize = 1024;

/// Everything the reactive path needs to turn a message into commands.
#[derive(Clone)]
pub struct ControlContext {
    pub engine: DecisionEngine,
    pub dispatcher: CommandDispatcher,
    pub tz: Tz,
    pub sensor_topic: String,
}

pub async fn handle_mqtt_message(
    ctx: &ControlContext,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    std::str::from_utf8(payload).context("non utf8 mqtt payload")?;

    if topic == ctx.sensor_topic {
        return handle_telemetry(ctx, payload).await;
    }
    if let Some(actuator) = Actuator::from_status_topic(topic) {
        return handle_status(ctx, actuator, payload).await;
    }

    debug!(topic, "ignoring message on unhandled topic");
    Ok(())
}

async fn handle_telemetry(ctx: &ControlContext, payload: &[u8]) -> anyhow::Result<()> {
    let telemetry = normalize_telemetry(payload, ctx.tz, Utc::now())
        .context("malformed telemetry dropped")?;
    let reading = telemetry.reading;

    match &telemetry.timestamp_source {
        TimestampSource::Reported => {}
        TimestampSource::Missing => debug!("telemetry has no timestamp, using local time"),
        TimestampSource::Unparsable(raw) => {
            warn!(raw = %raw, "invalid telemetry timestamp, using local time")
        }
    }

    info!(
        temperature = reading.temperature_c,
        humidity = reading.humidity,
        timestamp = %reading.timestamp.to_rfc3339(),
        fan = ?telemetry.reported.fan,
        lid = ?telemetry.reported.lid,
        stirrer = ?telemetry.reported.stirrer,
        "sensor reading"
    );

    let tracker = ctx.dispatcher.tracker();
    for (actuator, state) in telemetry.reported.iter() {
        tracker.observe(actuator, state.clone()).await;
    }

    let recommendation = ctx
        .engine
        .recommend(reading.temperature_c, reading.humidity);
    if recommendation.temp_status == TemperatureStatus::CriticalHigh {
        warn!(temperature = reading.temperature_c, "{}", recommendation.temp_message);
    }
    debug!(
        temp_status = recommendation.temp_status.as_str(),
        humidity_status = recommendation.humidity_status.as_str(),
        fan = ?recommendation.fan,
        lid = ?recommendation.lid,
        "{}",
        recommendation.message()
    );

    for (actuator, desired) in recommendation.targets() {
        ctx.dispatcher.dispatch(actuator, desired).await;
    }
    Ok(())
}

async fn handle_status(
    ctx: &ControlContext,
    actuator: Actuator,
    payload: &[u8],
) -> anyhow::Result<()> {
    let report = parse_status(actuator, payload, ctx.tz)
        .with_context(|| format!("malformed {actuator} status dropped"))?;

    info!(
        %actuator,
        state = %report.state,
        reported_at = ?report.timestamp.map(|ts| ts.to_rfc3339()),
        "status feedback"
    );
    ctx.dispatcher
        .tracker()
        .observe(report.actuator, report.state)
        .await;
    Ok(())
}
