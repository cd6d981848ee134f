//! # Correlation Engine
//!
//! Owns the broker transport and turns request/response traffic over MQTT into
//! plain async calls.
//!
//! ```text
//! engine/
//! ├── shared.rs     - Shared state, send/recv, pump and outbound loops
//! ├── sequence.rs   - Wrapping request ID counter
//! ├── endpoint.rs   - Per device handle with the LwM2M operations
//! └── blocking.rs   - Synchronous facade over an owned runtime
//! ```
//!
//! The engine goes through `Connecting → Running → Draining → Disconnected`.
//! Each state is its own type, so requests can only be sent on a running
//! engine and a drained engine cannot be restarted.

pub mod blocking;
pub mod endpoint;
pub mod sequence;
mod shared;

use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::shared::{outbound_loop, pump, Core, Outbound};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::lwm2m::{MessageClass, Request, Response};
use crate::mqtt::message::MqttMessage;
use crate::mqtt::mqtt_handler::MqttHandler;
use crate::mqtt::transport::{ConnectionState, Transport};
use crate::router::Subscription;

pub use endpoint::Endpoint;
pub use sequence::ReqIdSequence;

/// Time granted to each background task when shutting down
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[state]
#[derive(Debug, Clone)]
pub enum EngineState {
    Connecting,   // Transport attached, loops not yet running
    Running,      // Dispatching traffic
    Draining,     // Pump stopped, outbound queue flushing
    Disconnected, // Transport closed
}

#[machine]
pub struct Engine<S: EngineState> {
    core: Arc<Core>,
    pump: Option<JoinHandle<()>>,
    outbound: Option<JoinHandle<()>>,
    network: Option<JoinHandle<()>>,
}

impl<S: EngineState> Engine<S> {
    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.transport.state()
    }
}

impl Engine<Connecting> {
    /// Connects to the configured broker and starts the engine
    pub async fn connect(config: EngineConfig) -> Result<Engine<Running>> {
        config.validate()?;
        let capacity = config.broker.channel_capacity;
        let (inbound_tx, inbound) = mpsc::channel(capacity);
        let (handler, network) = MqttHandler::connect(
            config.broker.mqtt_options(),
            config.broker.qos()?,
            capacity,
            config.broker.connect_timeout(),
            inbound_tx,
        )
        .await?;
        let (engine, outbound) = Self::create(config, handler, Some(network));
        Ok(engine.start(inbound, outbound))
    }

    /// Starts the engine on an already connected transport
    ///
    /// `inbound` must carry every message the transport receives.
    pub fn with_transport(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<MqttMessage>,
    ) -> Result<Engine<Running>> {
        config.validate()?;
        let (engine, outbound) = Self::create(config, transport, None);
        Ok(engine.start(inbound, outbound))
    }

    fn create(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        network: Option<JoinHandle<()>>,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.broker.channel_capacity);
        let core = Arc::new(Core::new(config, transport, outbound_tx));
        (Self::new(core, None, None, network), outbound_rx)
    }

    fn start(
        mut self,
        inbound: mpsc::Receiver<MqttMessage>,
        outbound: mpsc::Receiver<Outbound>,
    ) -> Engine<Running> {
        self.pump = Some(tokio::spawn(pump(self.core.clone(), inbound)));
        self.outbound = Some(tokio::spawn(outbound_loop(
            self.core.transport.clone(),
            outbound,
        )));
        info!("Engine running");
        self.transition()
    }
}

impl Engine<Running> {
    /// Sends a request and waits for its response
    ///
    /// The endpoint must be subscribed, through [`Engine::subscribe`] or a live
    /// [`Endpoint`], or the response never reaches the engine. Error codes are
    /// returned as responses; call [`Response::check`] to turn them into errors.
    pub async fn send(&self, request: Request, timeout: Option<Duration>) -> Result<Response> {
        self.core.send(request, timeout, None).await
    }

    /// Like [`Engine::send`], merging observe notifications into `queue`
    pub async fn send_with_queue(
        &self,
        request: Request,
        timeout: Option<Duration>,
        queue: &Subscription,
    ) -> Result<Response> {
        self.core.send(request, timeout, Some(queue)).await
    }

    /// Queue of every future message of `endpoint` in one of `classes`
    ///
    /// An empty class list selects everything. Passing `queue` adds the routes
    /// to an existing subscription instead of creating a new one.
    pub fn recv(
        &self,
        endpoint: &str,
        classes: &[MessageClass],
        queue: Option<&Subscription>,
    ) -> Subscription {
        self.core.recv(endpoint, classes, queue)
    }

    /// Subscribes to the endpoint's topics, returning its reference count
    pub fn subscribe(&self, endpoint: &str) -> Result<usize> {
        self.core.subscribe(endpoint)
    }

    pub fn unsubscribe(&self, endpoint: &str) -> usize {
        self.core.unsubscribe(endpoint)
    }

    /// Handle for one device; keeps the endpoint subscribed while alive
    ///
    /// `timeout` overrides the engine default for every call on the handle.
    pub fn endpoint(&self, name: &str, timeout: Option<Duration>) -> Result<Endpoint> {
        self.core.subscribe(name)?;
        Ok(Endpoint::new(self.core.clone(), name, timeout))
    }

    /// Number of distinct endpoints subscribed
    pub fn subscription_count(&self) -> usize {
        self.core.subscription_count()
    }

    pub fn refcount(&self, endpoint: &str) -> usize {
        self.core.refcount(endpoint)
    }

    /// Stops dispatching; requests already queued are still published
    pub fn shutdown(self) -> Engine<Draining> {
        info!("Engine shutting down");
        self.core.stop_dispatch();
        self.transition()
    }

    /// Shuts down and waits until the transport is closed
    pub async fn close(self) -> Engine<Disconnected> {
        self.shutdown().finish().await
    }
}

impl Engine<Draining> {
    /// Flushes the outbound queue, releases subscriptions and disconnects
    pub async fn finish(mut self) -> Engine<Disconnected> {
        if let Some(outbound) = self.outbound.take() {
            if tokio::time::timeout(DRAIN_TIMEOUT, outbound).await.is_err() {
                warn!("Outbound queue not flushed within {:?}", DRAIN_TIMEOUT);
            }
        }
        if let Some(pump) = self.pump.take() {
            if tokio::time::timeout(DRAIN_TIMEOUT, pump).await.is_err() {
                warn!("Pump did not stop within {:?}", DRAIN_TIMEOUT);
            }
        }

        self.core.release_all();
        if let Err(e) = self.core.transport.disconnect() {
            warn!("Disconnecting failed: {}", e);
        }

        if let Some(mut network) = self.network.take() {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut network).await.is_err() {
                warn!("Network task still running, aborting");
                network.abort();
            }
        }
        debug!("Engine tasks stopped");
        info!("Engine disconnected");
        self.transition()
    }
}
