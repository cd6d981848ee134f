//! In-memory broker for tests
//!
//! Records what the engine publishes and subscribes, echoes publishes on
//! subscribed topics back like a broker would, and lets tests inject uplink
//! traffic or install a responder that answers downlink commands.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::message::MqttMessage;
use super::transport::{ConnectionState, Transport, TransportError};
use crate::router::TopicPattern;

type Responder = Box<dyn Fn(&MqttMessage) -> Vec<MqttMessage> + Send + Sync>;

pub struct MockTransport {
    inbound: mpsc::Sender<MqttMessage>,
    published: Mutex<Vec<MqttMessage>>,
    subscriptions: Mutex<Vec<String>>,
    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<String>>,
    responder: Mutex<Option<Responder>>,
    publish_delay: Mutex<Duration>,
    closed: Mutex<bool>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<MqttMessage>) {
        let (inbound, receiver) = mpsc::channel(1000);
        let transport = Arc::new(Self {
            inbound,
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            subscribe_calls: Mutex::new(Vec::new()),
            unsubscribe_calls: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            publish_delay: Mutex::new(Duration::ZERO),
            closed: Mutex::new(false),
        });
        (transport, receiver)
    }

    /// Answers every publish with whatever `responder` returns
    pub fn respond_with(
        &self,
        responder: impl Fn(&MqttMessage) -> Vec<MqttMessage> + Send + Sync + 'static,
    ) {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Makes every publish wait `delay` first, like a client whose queue is full
    pub fn delay_publishes(&self, delay: Duration) {
        *self.publish_delay.lock() = delay;
    }

    /// Delivers a message as if the broker had sent it
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.deliver(MqttMessage::new(topic, payload));
    }

    fn deliver(&self, message: MqttMessage) {
        let subscribed = self
            .subscriptions
            .lock()
            .iter()
            .any(|filter| TopicPattern::new(filter.as_str()).matches(&message.topic));
        if subscribed {
            // Full queue only happens in tests that flood on purpose
            let _ = self.inbound.try_send(message);
        }
    }

    pub fn published(&self) -> Vec<MqttMessage> {
        self.published.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.unsubscribe_calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Waits until at least `count` messages were published
    pub async fn wait_published(&self, count: usize) -> Vec<MqttMessage> {
        for _ in 0..400 {
            let published = self.published();
            if published.len() >= count {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("Expected {} publishes, got {}", count, self.published().len());
    }
}

/// `reqID` of a downlink payload
pub fn request_id(message: &MqttMessage) -> i64 {
    let json: Json = serde_json::from_slice(&message.payload).unwrap();
    json["reqID"].as_i64().unwrap()
}

/// `msgType` of a downlink payload
pub fn msg_type(message: &MqttMessage) -> String {
    let json: Json = serde_json::from_slice(&message.payload).unwrap();
    json["msgType"].as_str().unwrap().to_string()
}

#[async_trait]
impl Transport for MockTransport {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscribe_calls.lock().push(topic.to_string());
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.unsubscribe_calls.lock().push(topic.to_string());
        self.subscriptions.lock().retain(|t| t != topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let delay = *self.publish_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let message = MqttMessage::new(topic, payload);
        self.published.lock().push(message.clone());
        self.deliver(message.clone());
        let replies = match self.responder.lock().as_ref() {
            Some(responder) => responder(&message),
            None => Vec::new(),
        };
        for reply in replies {
            self.deliver(reply);
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        *self.closed.lock() = true;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        }
    }
}
