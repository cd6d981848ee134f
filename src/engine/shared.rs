//! Shared engine state and the two background loops
//!
//! ```text
//!            ┌──────────── send() ─────────────┐
//!            │ encode                          │ await Response/+/{id}
//!            ▼                                 │
//!   outbound queue ──► outbound_loop ──► Transport::publish
//!
//!   Transport ──► inbound queue ──► pump ──► decode ──► Router::publish
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::sequence::ReqIdSequence;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::lwm2m::{Message, MessageClass, Request, Response};
use crate::mqtt::codec::{self, ReqId};
use crate::mqtt::message::MqttMessage;
use crate::mqtt::transport::Transport;
use crate::router::{Router, Subscription};

/// Encoded downlink waiting for the outbound loop
#[derive(Debug)]
pub(crate) struct Outbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub(crate) struct Core {
    pub config: EngineConfig,
    pub transport: Arc<dyn Transport>,
    pub router: Router,
    sequence: ReqIdSequence,
    /// Endpoint name to number of live handles
    subscriptions: Mutex<HashMap<String, usize>>,
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    disconnected: AtomicBool,
    pub cancel: CancellationToken,
}

impl Core {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        let sequence = ReqIdSequence::new(config.engine.req_id_min, config.engine.req_id_max);
        Self {
            config,
            transport,
            router: Router::new(),
            sequence,
            subscriptions: Mutex::new(HashMap::new()),
            outbound: Mutex::new(Some(outbound)),
            disconnected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Correlation
    // ─────────────────────────────────────────────────────────────────────────

    /// Sends `request` and waits for the response carrying its request ID
    ///
    /// For observe requests the notification route is in place before the
    /// request leaves, either on a fresh queue or merged into `notifications`.
    pub async fn send(
        &self,
        request: Request,
        timeout: Option<Duration>,
        notifications: Option<&Subscription>,
    ) -> Result<Response> {
        let sender = self.outbound.lock().clone().ok_or(Error::Disconnected)?;
        let req_id = self.sequence.next_id();
        let payload = codec::encode(&request, req_id)?;

        let responses = self.router.subscribe(codec::response_pattern(&request.ep, req_id));
        let notify = request.is_observe().then(|| {
            let pattern = codec::notification_pattern(&request.ep, req_id);
            match notifications {
                Some(queue) => {
                    self.router.subscribe_into(pattern, queue);
                    queue.clone()
                }
                None => self.router.subscribe(pattern),
            }
        });

        debug!("Sending {} as request {}", request, req_id);
        let outbound = Outbound {
            topic: self.config.topics.downlink(&request.ep),
            payload,
        };
        if sender.send(outbound).await.is_err() {
            return Err(Error::Disconnected);
        }
        drop(sender);

        let timeout = timeout.unwrap_or_else(|| self.config.engine.timeout());
        let response = self.await_response(&responses, &request, req_id, timeout).await;
        responses.unsubscribe();

        match response {
            Some(mut response) => {
                response.dt = Some(response.timestamp - request.timestamp);
                response.notifications = notify;
                debug!("Request {} answered with {}", req_id, response);
                Ok(response)
            }
            None => {
                warn!("No response to {} (request {}) within {:?}", request, req_id, timeout);
                Err(Error::NoResponse(Box::new(request)))
            }
        }
    }

    async fn await_response(
        &self,
        responses: &Subscription,
        request: &Request,
        req_id: ReqId,
        timeout: Duration,
    ) -> Option<Response> {
        // Too far out to represent means no deadline at all
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, responses.recv())
                    .await
                    .ok()
                    .flatten(),
                None => responses.recv().await,
            };
            match next {
                Some(Message::Response(response)) if response.kind.answers(&request.kind) => {
                    return Some(response);
                }
                Some(other) => {
                    warn!("Ignoring {} while waiting for request {}", other, req_id);
                }
                None => return None,
            }
        }
    }

    /// Routes messages of the given classes for `endpoint` to one queue
    pub fn recv(
        &self,
        endpoint: &str,
        classes: &[MessageClass],
        queue: Option<&Subscription>,
    ) -> Subscription {
        let pattern = codec::class_pattern(endpoint, classes);
        debug!("Listening on {}", pattern);
        match queue {
            Some(queue) => {
                self.router.subscribe_into(pattern, queue);
                queue.clone()
            }
            None => self.router.subscribe(pattern),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Endpoint subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Adds a reference to the endpoint's broker subscription
    ///
    /// The first reference subscribes `{mountpoint}/{endpoint}/#`.
    pub fn subscribe(&self, endpoint: &str) -> Result<usize> {
        let mut subscriptions = self.subscriptions.lock();
        if self.is_disconnected() {
            return Err(Error::Disconnected);
        }
        if let Some(count) = subscriptions.get_mut(endpoint) {
            *count += 1;
            trace!("{} now referenced {} times", endpoint, count);
            return Ok(*count);
        }
        if let Some(limit) = self.config.engine.max_subscriptions {
            if subscriptions.len() >= limit {
                warn!("Cannot subscribe {}: limit of {} reached", endpoint, limit);
                return Err(Error::Capacity { limit });
            }
        }
        let topic = self.config.topics.endpoint_tree(endpoint);
        info!("Subscribing to {}", topic);
        self.transport.subscribe(&topic)?;
        subscriptions.insert(endpoint.to_string(), 1);
        Ok(1)
    }

    /// Drops a reference; the last one unsubscribes from the broker
    pub fn unsubscribe(&self, endpoint: &str) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        let Some(count) = subscriptions.get_mut(endpoint) else {
            return 0;
        };
        *count -= 1;
        if *count > 0 {
            trace!("{} now referenced {} times", endpoint, count);
            return *count;
        }
        subscriptions.remove(endpoint);
        if !self.is_disconnected() {
            let topic = self.config.topics.endpoint_tree(endpoint);
            info!("Unsubscribing from {}", topic);
            if let Err(e) = self.transport.unsubscribe(&topic) {
                warn!("Unsubscribing from {} failed: {}", topic, e);
            }
        }
        0
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn refcount(&self, endpoint: &str) -> usize {
        self.subscriptions
            .lock()
            .get(endpoint)
            .copied()
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────────

    /// Stops the pump and closes the outbound queue; queued publishes still go out
    pub fn stop_dispatch(&self) {
        self.cancel.cancel();
        self.outbound.lock().take();
    }

    /// Unsubscribes every endpoint and marks the engine disconnected
    pub fn release_all(&self) {
        let mut subscriptions = self.subscriptions.lock();
        for endpoint in subscriptions.keys() {
            let topic = self.config.topics.endpoint_tree(endpoint);
            info!("Unsubscribing from {}", topic);
            if let Err(e) = self.transport.unsubscribe(&topic) {
                warn!("Unsubscribing from {} failed: {}", topic, e);
            }
        }
        subscriptions.clear();
        self.disconnected.store(true, Ordering::SeqCst);
        self.router.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Decodes one broker message and publishes it to the router
    pub fn dispatch(&self, raw: &MqttMessage) -> Result<usize> {
        let topics = &self.config.topics;
        let (Some(endpoint), Some(direction)) =
            (topics.parse_endpoint(&raw.topic), topics.direction(&raw.topic))
        else {
            debug!("Ignoring message on foreign topic {}", raw.topic);
            return Ok(0);
        };
        let decoded = codec::decode(direction, endpoint, &raw.payload)?;
        let topic = codec::router_topic(&decoded.message, decoded.req_id);
        let delivered = self.router.publish(&topic, &decoded.message);
        debug!("{} published on {} to {} queues", decoded.message, topic, delivered);
        Ok(delivered)
    }
}

/// Moves broker messages into the router until cancelled
pub(crate) async fn pump(core: Arc<Core>, mut inbound: mpsc::Receiver<MqttMessage>) {
    let cancel = core.cancel.clone();
    debug!("Pump started");
    loop {
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            raw = inbound.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };
        trace!("Pump received {}", raw);
        if let Err(e) = core.dispatch(&raw) {
            error!("Dropping undecodable message ({}) {}", e, raw.render());
        }
    }
    debug!("Pump stopped");
}

/// Publishes encoded downlinks one at a time until the queue closes
///
/// Each publish is awaited, so a busy client slows the loop down and the
/// bounded outbound queue pushes back on `send` callers.
pub(crate) async fn outbound_loop(
    transport: Arc<dyn Transport>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    debug!("Outbound loop started");
    while let Some(Outbound { topic, payload }) = outbound.recv().await {
        trace!("Publishing {} bytes to {}", payload.len(), topic);
        if let Err(e) = transport.publish(&topic, payload).await {
            error!("Publishing to {} failed: {}", topic, e);
        }
    }
    debug!("Outbound loop stopped");
}
