//! rumqttc backed [`Transport`]
//!
//! ```text
//!  Engine ──publish/try_subscribe──► AsyncClient ──► EventLoop ──► broker
//!                                                           │
//!  inbound queue ◄──────── Publish packets ─────────────────┘
//! ```
//!
//! The event loop is polled by one network task. The first `ConnAck` is awaited
//! inside [`MqttHandler::connect`] so a refused or unreachable broker fails the
//! caller. Every later `ConnAck` is a reconnect, after which all live topics
//! are subscribed again.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::message::MqttMessage;
use super::transport::{ConnectionState, Transport, TransportError};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct MqttHandler {
    client: AsyncClient,
    qos: QoS,
    broker: String,
    topics: Mutex<BTreeSet<String>>,
    state: watch::Sender<ConnectionState>,
    closing: AtomicBool,
}

impl MqttHandler {
    /// Connects and spawns the network task
    ///
    /// Returns once the broker acknowledged the connection. Publishes received
    /// afterwards are forwarded to `inbound`.
    pub async fn connect(
        options: MqttOptions,
        qos: QoS,
        capacity: usize,
        timeout: Duration,
        inbound: mpsc::Sender<MqttMessage>,
    ) -> Result<(Arc<Self>, JoinHandle<()>), TransportError> {
        let (host, port) = options.broker_address();
        let broker = format!("{}:{}", host, port);
        let (client, mut eventloop) = AsyncClient::new(options, capacity);
        let (state, _) = watch::channel(ConnectionState::Connecting);

        info!("Connecting to MQTT broker {}", broker);
        match tokio::time::timeout(timeout, Self::wait_for_connack(&broker, &mut eventloop)).await {
            Ok(Ok(())) => info!("Connected to MQTT broker {}", broker),
            Ok(Err(e)) => {
                error!("MQTT connection failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                error!("MQTT broker {} did not answer within {:?}", broker, timeout);
                return Err(TransportError::ConnectTimeout(broker));
            }
        }
        state.send_replace(ConnectionState::Connected);

        let handler = Arc::new(Self {
            client,
            qos,
            broker,
            topics: Mutex::new(BTreeSet::new()),
            state,
            closing: AtomicBool::new(false),
        });
        let task = tokio::spawn(handler.clone().network_loop(eventloop, inbound));
        Ok((handler, task))
    }

    async fn wait_for_connack(broker: &str, eventloop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    return Err(TransportError::Refused {
                        broker: broker.to_string(),
                        code: format!("{:?}", ack.code),
                    });
                }
                Ok(event) => trace!("MQTT event before ConnAck: {:?}", event),
                Err(e) => {
                    return Err(TransportError::Connect {
                        broker: broker.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn network_loop(self: Arc<Self>, mut eventloop: EventLoop, inbound: mpsc::Sender<MqttMessage>) {
        debug!("MQTT network task started for {}", self.broker);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = MqttMessage::new(publish.topic, publish.payload.to_vec());
                    trace!("Received {}", message);
                    if inbound.send(message).await.is_err() {
                        warn!("Inbound queue closed, stopping MQTT network task");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Reconnected to {} ({:?})", self.broker, ack.code);
                    self.state.send_replace(ConnectionState::Connected);
                    self.resubscribe();
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("Disconnected from {}", self.broker);
                    break;
                }
                Ok(event) => trace!("MQTT event: {:?}", event),
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        debug!("MQTT connection closed: {}", e);
                        break;
                    }
                    warn!("MQTT connection error: {}", e);
                    self.state.send_replace(ConnectionState::Reconnecting);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        debug!("MQTT network task for {} finished", self.broker);
    }

    fn resubscribe(&self) {
        let topics = self.topics.lock();
        info!("Re-subscribing {} topics", topics.len());
        for topic in topics.iter() {
            if let Err(e) = self.client.try_subscribe(topic.clone(), self.qos) {
                warn!("Re-subscribing {} failed: {}", topic, e);
            }
        }
    }
}

#[async_trait]
impl Transport for MqttHandler {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        debug!("MQTT subscribe {}", topic);
        self.client.try_subscribe(topic, self.qos)?;
        self.topics.lock().insert(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        debug!("MQTT unsubscribe {}", topic);
        self.topics.lock().remove(topic);
        self.client.try_unsubscribe(topic)?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.client.publish(topic, self.qos, false, payload).await?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Disconnecting from {}", self.broker);
        self.client.try_disconnect()?;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}
