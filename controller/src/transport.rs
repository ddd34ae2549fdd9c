use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, QoS};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mqtt publish failed: {0}")]
    Client(#[from] ClientError),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, TransportError> {
    Ok(serde_json::to_vec(body)?)
}

/// Outbound side of the message bus.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandPublisher for MqttPublisher {
    /// Enqueues without waiting: the inbound handler runs on the task that
    /// drains the request queue, so a full queue is reported as a failure.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)?;
        Ok(())
    }
}
