//! Broker seam used by the engine
//!
//! The engine only ever subscribes, unsubscribes and publishes whole topics.
//! Subscribing and unsubscribing are synchronous and non-blocking so they can
//! run under the subscription lock and from `Drop` implementations. Publishing
//! is async and waits while the client's request queue is full.

use async_trait::async_trait;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connecting to {broker} failed: {reason}")]
    Connect { broker: String, reason: String },

    #[error("Broker {broker} refused the connection: {code}")]
    Refused { broker: String, code: String },

    #[error("No answer from {0} within the connect timeout")]
    ConnectTimeout(String),

    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Transport is closed")]
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Requests a clean disconnect after already queued publishes
    fn disconnect(&self) -> Result<(), TransportError>;

    fn state(&self) -> ConnectionState;
}
