//! Synchronous facade
//!
//! Drives an [`Engine`] from plain threads. The facade owns a small
//! multi-threaded runtime so the pump keeps dispatching between calls; every
//! method blocks the calling thread until the async counterpart completes.
//! None of these types may be used from inside an async context.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Connecting, Endpoint, Engine, Running};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::lwm2m::{Attributes, Message, MessageClass, Path, Request, Response, Value};
use crate::mqtt::message::MqttMessage;
use crate::mqtt::transport::Transport;
use crate::router::Subscription;

const WORKER_THREADS: usize = 2;

fn runtime() -> Result<Arc<Runtime>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .thread_name("lwm2m-mqtt")
        .enable_all()
        .build()?;
    Ok(Arc::new(runtime))
}

pub struct BlockingEngine {
    runtime: Arc<Runtime>,
    engine: Option<Engine<Running>>,
}

impl BlockingEngine {
    pub fn connect(config: EngineConfig) -> Result<Self> {
        let runtime = runtime()?;
        let engine = runtime.block_on(Engine::<Connecting>::connect(config))?;
        Ok(Self {
            runtime,
            engine: Some(engine),
        })
    }

    pub fn with_transport(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<MqttMessage>,
    ) -> Result<Self> {
        let runtime = runtime()?;
        let engine = {
            let _guard = runtime.enter();
            Engine::<Connecting>::with_transport(config, transport, inbound)?
        };
        Ok(Self {
            runtime,
            engine: Some(engine),
        })
    }

    fn engine(&self) -> Result<&Engine<Running>> {
        self.engine.as_ref().ok_or(Error::Disconnected)
    }

    pub fn send(&self, request: Request, timeout: Option<Duration>) -> Result<Response> {
        let engine = self.engine()?;
        self.runtime.block_on(engine.send(request, timeout))
    }

    pub fn recv(
        &self,
        endpoint: &str,
        classes: &[MessageClass],
        queue: Option<&BlockingSubscription>,
    ) -> Result<BlockingSubscription> {
        let subscription = self
            .engine()?
            .recv(endpoint, classes, queue.map(|q| &q.inner));
        Ok(self.wrap(subscription))
    }

    pub fn subscribe(&self, endpoint: &str) -> Result<usize> {
        self.engine()?.subscribe(endpoint)
    }

    pub fn unsubscribe(&self, endpoint: &str) -> Result<usize> {
        Ok(self.engine()?.unsubscribe(endpoint))
    }

    pub fn endpoint(&self, name: &str, timeout: Option<Duration>) -> Result<BlockingEndpoint> {
        let inner = self.engine()?.endpoint(name, timeout)?;
        Ok(BlockingEndpoint {
            runtime: self.runtime.clone(),
            inner,
        })
    }

    pub fn subscription_count(&self) -> usize {
        self.engine
            .as_ref()
            .map(|engine| engine.subscription_count())
            .unwrap_or_default()
    }

    pub fn refcount(&self, endpoint: &str) -> usize {
        self.engine
            .as_ref()
            .map(|engine| engine.refcount(endpoint))
            .unwrap_or_default()
    }

    /// Blocking view of an async queue, such as observe notifications
    pub fn wrap(&self, subscription: Subscription) -> BlockingSubscription {
        BlockingSubscription {
            runtime: self.runtime.clone(),
            inner: subscription,
        }
    }

    /// Shuts the engine down and waits for the transport to close
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(engine) = self.engine.take() {
            debug!("Closing blocking engine");
            self.runtime.block_on(engine.close());
            info!("Blocking engine closed");
        }
    }
}

impl Drop for BlockingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Blocking [`Endpoint`]
#[derive(Clone)]
pub struct BlockingEndpoint {
    runtime: Arc<Runtime>,
    inner: Endpoint,
}

impl BlockingEndpoint {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.with_timeout(timeout);
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.inner = self.inner.with_retries(retries);
        self
    }

    /// The async handle sharing this one's lease
    pub fn as_async(&self) -> &Endpoint {
        &self.inner
    }

    fn wrap(&self, subscription: Subscription) -> BlockingSubscription {
        BlockingSubscription {
            runtime: self.runtime.clone(),
            inner: subscription,
        }
    }

    pub fn discover(&self, path: impl Into<Path>) -> Result<Response> {
        self.runtime.block_on(self.inner.discover(path))
    }

    pub fn read(&self, path: impl Into<Path>) -> Result<Response> {
        self.runtime.block_on(self.inner.read(path))
    }

    pub fn write(&self, path: impl Into<Path>, value: impl Into<Value>) -> Result<Response> {
        self.runtime.block_on(self.inner.write(path, value))
    }

    pub fn write_batch<K, V>(
        &self,
        base: impl Into<Path>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Response>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.runtime.block_on(self.inner.write_batch(base, values))
    }

    pub fn write_attr(&self, path: impl Into<Path>, attributes: Attributes) -> Result<Response> {
        self.runtime.block_on(self.inner.write_attr(path, attributes))
    }

    pub fn execute(&self, path: impl Into<Path>, args: impl Into<String>) -> Result<Response> {
        self.runtime.block_on(self.inner.execute(path, args))
    }

    pub fn create<K, V>(
        &self,
        base: impl Into<Path>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Response>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.runtime.block_on(self.inner.create(base, values))
    }

    pub fn delete(&self, path: impl Into<Path>) -> Result<Response> {
        self.runtime.block_on(self.inner.delete(path))
    }

    /// Starts observing; notifications come back as a blocking queue
    pub fn observe(
        &self,
        path: impl Into<Path>,
        queue: Option<&BlockingSubscription>,
    ) -> Result<(Response, BlockingSubscription)> {
        let mut response = self
            .runtime
            .block_on(self.inner.observe(path, queue.map(|q| &q.inner)))?;
        let notifications = response
            .notifications
            .take()
            .ok_or_else(|| Error::NoValue(format!("{} carries no notifications", response)))?;
        Ok((response, self.wrap(notifications)))
    }

    pub fn cancel_observe(&self, path: impl Into<Path>) -> Result<Response> {
        self.runtime.block_on(self.inner.cancel_observe(path))
    }

    /// Observes `path` while `body` runs, then cancels the observation
    ///
    /// The cancel is sent even when `body` panics; the panic is resumed
    /// afterwards.
    pub fn temporary_observe<T>(
        &self,
        path: impl Into<Path>,
        body: impl FnOnce(Response, BlockingSubscription) -> T,
    ) -> Result<T> {
        let path = path.into();
        let (response, notifications) = self.observe(path.clone(), None)?;
        let output = panic::catch_unwind(AssertUnwindSafe(|| body(response, notifications)));
        self.runtime.block_on(self.inner.finish_observe(&path));
        match output {
            Ok(output) => Ok(output),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub fn wiretap(&self, queue: Option<&BlockingSubscription>) -> BlockingSubscription {
        self.wrap(self.inner.wiretap(queue.map(|q| &q.inner)))
    }

    pub fn registrations(
        &self,
        include_updates: bool,
        queue: Option<&BlockingSubscription>,
    ) -> BlockingSubscription {
        self.wrap(self.inner.registrations(include_updates, queue.map(|q| &q.inner)))
    }

    pub fn updates(&self, queue: Option<&BlockingSubscription>) -> BlockingSubscription {
        self.wrap(self.inner.updates(queue.map(|q| &q.inner)))
    }

    pub fn commands(&self, queue: Option<&BlockingSubscription>) -> BlockingSubscription {
        self.wrap(self.inner.commands(queue.map(|q| &q.inner)))
    }

    pub fn notifications(&self, queue: Option<&BlockingSubscription>) -> BlockingSubscription {
        self.wrap(self.inner.notifications(queue.map(|q| &q.inner)))
    }

    pub fn events(&self, queue: Option<&BlockingSubscription>) -> BlockingSubscription {
        self.wrap(self.inner.events(queue.map(|q| &q.inner)))
    }
}

/// Blocking [`Subscription`]
#[derive(Clone)]
pub struct BlockingSubscription {
    runtime: Arc<Runtime>,
    inner: Subscription,
}

impl BlockingSubscription {
    /// Blocks until a message arrives; `None` once the queue is closed
    pub fn recv(&self) -> Option<Message> {
        self.runtime.block_on(self.inner.recv())
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        self.runtime.block_on(self.inner.recv_timeout(timeout))
    }

    pub fn try_recv(&self) -> Option<Message> {
        self.inner.try_recv()
    }

    pub fn drain(&self) -> Vec<Message> {
        self.inner.drain()
    }

    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    pub fn as_async(&self) -> &Subscription {
        &self.inner
    }
}
