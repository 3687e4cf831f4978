//! Message bus abstraction.
//!
//! The poll loop only needs to publish string payloads to topics and to
//! disconnect once at shutdown, so the bus sits behind the small
//! [`MessageBus`] trait. [`crate::mqtt::MqttBus`] is the production
//! implementation and [`crate::mock::MockBus`] records traffic for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use tc66_types::{Metric, Reading};

/// Errors raised while talking to the message bus.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker could not be reached or refused the connection.
    #[error("Failed to connect to broker {broker}: {reason}")]
    Connect { broker: String, reason: String },

    /// The broker did not acknowledge the connection in time.
    #[error("Timed out connecting to broker {broker} after {duration:?}")]
    ConnectTimeout { broker: String, duration: Duration },

    /// The client rejected the publish request.
    #[error("Failed to publish to {topic}: {reason}")]
    Rejected { topic: String, reason: String },

    /// A publish did not complete in time.
    #[error("Publish to {topic} timed out after {duration:?}")]
    Timeout { topic: String, duration: Duration },

    /// The client's event loop has stopped; nothing can be sent.
    #[error("Not connected to broker")]
    Disconnected,

    /// The publishing task ended without reporting a result.
    #[error("Publish task aborted: {0}")]
    Aborted(String),

    /// Stopped by a shutdown request.
    #[error("Cancelled")]
    Cancelled,
}

/// A message bus the bridge publishes readings to.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;

    /// Close the connection. Called once during shutdown.
    async fn disconnect(&self) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: MessageBus + ?Sized> MessageBus for Arc<T> {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        (**self).publish(topic, payload).await
    }

    async fn disconnect(&self) -> Result<(), PublishError> {
        (**self).disconnect().await
    }
}

/// One topic/value pair produced by a poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub value: f64,
}

impl OutboundMessage {
    /// Payload sent on the wire: the value as a plain decimal number.
    pub fn payload(&self) -> String {
        self.value.to_string()
    }
}

/// Build the messages for one reading, in voltage, current, power order.
///
/// ```
/// use tc66_bridge::bus::messages_for;
/// use tc66_types::Reading;
///
/// let messages = messages_for("tc66c", "bench", &Reading::new(5.1, 0.25, 1.275));
/// assert_eq!(messages[0].topic, "tc66c/bench/voltage_V");
/// assert_eq!(messages[1].payload(), "0.25");
/// ```
pub fn messages_for(namespace: &str, alias: &str, reading: &Reading) -> Vec<OutboundMessage> {
    Metric::ALL
        .iter()
        .map(|&metric| OutboundMessage {
            topic: format!("{}/{}/{}", namespace, alias, metric.topic_suffix()),
            value: reading.get(metric),
        })
        .collect()
}
