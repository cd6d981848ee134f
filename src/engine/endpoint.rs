//! Per device handle
//!
//! An [`Endpoint`] holds a lease on the endpoint's broker subscription. Clones
//! share the lease; dropping the last clone releases it, which unsubscribes
//! once no other handle for the same device is alive.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::shared::Core;
use crate::error::{Error, Result};
use crate::lwm2m::{Attributes, MessageClass, Path, Request, Response, Value};
use crate::router::Subscription;

struct EndpointLease {
    core: Arc<Core>,
    name: String,
}

impl Drop for EndpointLease {
    fn drop(&mut self) {
        let remaining = self.core.unsubscribe(&self.name);
        debug!("Released {}, {} handles left", self.name, remaining);
    }
}

/// Cancels an observation when dropped while still armed
struct ObserveGuard {
    endpoint: Option<Endpoint>,
    path: Path,
}

impl ObserveGuard {
    fn new(endpoint: Endpoint, path: Path) -> Self {
        Self {
            endpoint: Some(endpoint),
            path,
        }
    }

    fn disarm(mut self) {
        self.endpoint = None;
    }
}

impl Drop for ObserveGuard {
    fn drop(&mut self) {
        let Some(endpoint) = self.endpoint.take() else {
            return;
        };
        let path = self.path.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Observation of {} on {} abandoned, cancelling", path, endpoint.name());
                runtime.spawn(async move { endpoint.finish_observe(&path).await });
            }
            Err(_) => warn!(
                "No runtime left to cancel observation of {} on {}",
                path,
                endpoint.name()
            ),
        }
    }
}

#[derive(Clone)]
pub struct Endpoint {
    lease: Arc<EndpointLease>,
    timeout: Option<Duration>,
    retries: usize,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.lease.name)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish()
    }
}

impl Endpoint {
    /// Wraps a subscription reference already taken on `core`
    pub(crate) fn new(core: Arc<Core>, name: &str, timeout: Option<Duration>) -> Self {
        Self {
            lease: Arc::new(EndpointLease {
                core,
                name: name.to_string(),
            }),
            timeout,
            retries: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.lease.name
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Re-sends up to `retries` times when no response arrives
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Releases this handle's share of the subscription
    pub fn close(self) {}

    async fn send(&self, request: Request, notifications: Option<&Subscription>) -> Result<Response> {
        let core = &self.lease.core;
        let mut attempt = 0;
        loop {
            let fresh = Request::new(request.ep.clone(), request.kind.clone());
            match core.send(fresh, self.timeout, notifications).await {
                Err(Error::NoResponse(_)) if attempt < self.retries => {
                    attempt += 1;
                    warn!("No response to {}, retry {}/{}", request, attempt, self.retries);
                }
                result => return result,
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn discover(&self, path: impl Into<Path>) -> Result<Response> {
        self.send(Request::discover(self.name(), path), None).await
    }

    pub async fn read(&self, path: impl Into<Path>) -> Result<Response> {
        self.send(Request::read(self.name(), path), None).await
    }

    pub async fn write(&self, path: impl Into<Path>, value: impl Into<Value>) -> Result<Response> {
        let path: Path = path.into();
        let value: Value = value.into();
        self.send(Request::write(self.name(), [(path, value)]), None).await
    }

    /// Writes several resources of the object instance `base` at once
    ///
    /// Keys are resource IDs relative to `base`.
    pub async fn write_batch<K, V>(
        &self,
        base: impl Into<Path>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Response>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let base = base.into();
        let data = values
            .into_iter()
            .map(|(k, v)| (base.join(k), Into::<Value>::into(v)));
        self.send(Request::write(self.name(), data), None).await
    }

    pub async fn write_attr(&self, path: impl Into<Path>, attributes: Attributes) -> Result<Response> {
        self.send(Request::write_attr(self.name(), path, attributes), None)
            .await
    }

    pub async fn execute(&self, path: impl Into<Path>, args: impl Into<String>) -> Result<Response> {
        self.send(Request::execute(self.name(), path, args), None).await
    }

    /// Creates an instance of object `base`
    ///
    /// Keys are `{instance}/{resource}` relative to the object.
    pub async fn create<K, V>(
        &self,
        base: impl Into<Path>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Response>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let base = base.into();
        let data = values
            .into_iter()
            .map(|(k, v)| (base.join(k), Into::<Value>::into(v)));
        self.send(Request::create(self.name(), data), None).await
    }

    pub async fn delete(&self, path: impl Into<Path>) -> Result<Response> {
        self.send(Request::delete(self.name(), path), None).await
    }

    /// Starts observing `path`
    ///
    /// Notifications go to `response.notifications`, or into `queue` when one
    /// is given.
    pub async fn observe(&self, path: impl Into<Path>, queue: Option<&Subscription>) -> Result<Response> {
        self.send(Request::observe(self.name(), path), queue).await
    }

    pub async fn cancel_observe(&self, path: impl Into<Path>) -> Result<Response> {
        self.send(Request::cancel_observe(self.name(), path), None).await
    }

    /// Observes `path` for the duration of `body`
    ///
    /// A cancel-observe is sent however `body` ends. When it completes the
    /// cancel is awaited; when the future is dropped or `body` panics the
    /// cancel is spawned on the current runtime. Its failure is logged, not
    /// returned.
    pub async fn temporary_observe<F, Fut, T>(&self, path: impl Into<Path>, body: F) -> Result<T>
    where
        F: FnOnce(Response) -> Fut,
        Fut: Future<Output = T>,
    {
        let path = path.into();
        let response = self.observe(path.clone(), None).await?;
        let guard = ObserveGuard::new(self.clone(), path.clone());
        let output = body(response).await;
        guard.disarm();
        self.finish_observe(&path).await;
        Ok(output)
    }

    pub(crate) async fn finish_observe(&self, path: &Path) {
        match self.cancel_observe(path.clone()).await {
            Ok(response) if !response.code.is_success() => {
                warn!("Cancel observe of {} on {} answered {}", path, self.name(), response.code);
            }
            Ok(_) => debug!("Observation of {} on {} cancelled", path, self.name()),
            Err(e) => warn!("Cancel observe of {} on {} failed: {}", path, self.name(), e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────────

    fn listen(&self, classes: &[MessageClass], queue: Option<&Subscription>) -> Subscription {
        self.lease.core.recv(self.name(), classes, queue)
    }

    /// Every message of the endpoint, both directions
    pub fn wiretap(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Message], queue)
    }

    pub fn uplink(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Uplink], queue)
    }

    pub fn downlink(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Downlink], queue)
    }

    pub fn requests(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Request], queue)
    }

    pub fn responses(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Response], queue)
    }

    pub fn events(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Event], queue)
    }

    pub fn registrations(&self, include_updates: bool, queue: Option<&Subscription>) -> Subscription {
        if include_updates {
            self.listen(&[MessageClass::Registration, MessageClass::Update], queue)
        } else {
            self.listen(&[MessageClass::Registration], queue)
        }
    }

    pub fn updates(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Update], queue)
    }

    /// Requests and their responses
    pub fn commands(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Request, MessageClass::Response], queue)
    }

    pub fn notifications(&self, queue: Option<&Subscription>) -> Subscription {
        self.listen(&[MessageClass::Notification], queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{Connecting, Engine, Running};
    use crate::lwm2m::{CoapResponseCode, Message, RequestKind};
    use crate::mqtt::message::MqttMessage;
    use crate::mqtt::mock::{msg_type, request_id, MockTransport};
    use serde_json::{json, Value as Json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn start() -> (Engine<Running>, Arc<MockTransport>) {
        let mut config = EngineConfig::default();
        config.engine.timeout_secs = 2.0;
        let (mock, inbound) = MockTransport::new();
        let engine = Engine::<Connecting>::with_transport(config, mock.clone(), inbound).unwrap();
        (engine, mock)
    }

    fn payload(message: &MqttMessage) -> Json {
        serde_json::from_slice(&message.payload).unwrap()
    }

    /// Answers like a well behaved device
    fn device(message: &MqttMessage) -> Vec<MqttMessage> {
        let json = payload(message);
        let req_path = json["data"]["path"]
            .as_str()
            .or_else(|| json["data"]["basePath"].as_str())
            .unwrap_or("/")
            .to_string();
        let (code, content) = match msg_type(message).as_str() {
            "read" | "observe" | "cancel-observe" => {
                ("2.05", json!([{"path": req_path, "value": 42}]))
            }
            "discover" => ("2.05", json!(["</3/0>,</3/0/1>,</3/0/13>;pmin=10"])),
            "create" => ("2.01", Json::Null),
            "delete" => ("2.02", Json::Null),
            _ => ("2.04", Json::Null),
        };
        let reply = json!({
            "reqID": request_id(message),
            "msgType": msg_type(message),
            "data": {"code": code, "reqPath": req_path, "content": content}
        });
        vec![MqttMessage::new("lwm2m/dev1/up/resp", reply.to_string())]
    }

    fn last_published(mock: &MockTransport) -> Json {
        payload(mock.published().last().unwrap())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_read_and_discover() {
        let (engine, mock) = start();
        mock.respond_with(device);
        let endpoint = engine.endpoint("dev1", None).unwrap();

        let response = assert_ok!(endpoint.read("/3/0/13").await);
        assert_eq!(response.value().unwrap(), &Value::Integer(42));
        assert_eq!(last_published(&mock)["msgType"], "read");

        let response = assert_ok!(endpoint.discover("/3/0").await);
        let links = response.links().unwrap();
        assert_eq!(links.len(), 3);
        assert!(links[&Path::new("/3/0/13")].contains_key("pmin"));
    }

    #[tokio::test]
    async fn test_writes() {
        let (engine, mock) = start();
        mock.respond_with(device);
        let endpoint = engine.endpoint("dev1", None).unwrap();

        let response = assert_ok!(endpoint.write("/1/0/1", 300).await);
        assert_eq!(response.code, CoapResponseCode::Changed);
        let sent = last_published(&mock);
        assert_eq!(sent["msgType"], "write");
        assert_eq!(sent["data"]["path"], "/1/0/1");

        assert_ok!(endpoint.write_batch("/1/0", [("1", 300), ("3", 10)]).await);
        let sent = last_published(&mock);
        assert_eq!(sent["data"]["basePath"], "/1/0/");
        assert_eq!(sent["data"]["content"].as_array().unwrap().len(), 2);

        let attributes = Attributes::periods(Some(10), Some(60));
        assert_ok!(endpoint.write_attr("/3/0/13", attributes).await);
        let sent = last_published(&mock);
        assert_eq!(sent["msgType"], "write-attr");
        assert_eq!(sent["data"]["pmin"], "10");
    }

    #[tokio::test]
    async fn test_execute_create_delete() {
        let (engine, mock) = start();
        mock.respond_with(device);
        let endpoint = engine.endpoint("dev1", None).unwrap();

        assert_ok!(endpoint.execute("/3/0/4", "").await);
        assert_eq!(last_published(&mock)["msgType"], "execute");

        let response = assert_ok!(endpoint.create("/3303", [("0/5700", 21.5)]).await);
        assert_eq!(response.code, CoapResponseCode::Created);
        let sent = last_published(&mock);
        assert_eq!(sent["data"]["basePath"], "/3303");
        assert_eq!(sent["data"]["content"][0]["path"], "/0/5700");

        let response = assert_ok!(endpoint.delete("/3303/0").await);
        assert_eq!(response.code, CoapResponseCode::Deleted);
    }

    #[tokio::test]
    async fn test_error_codes_are_not_raised() {
        let (engine, mock) = start();
        mock.respond_with(|message| {
            let reply = json!({
                "reqID": request_id(message),
                "msgType": "read",
                "data": {"code": "4.04", "reqPath": "/1/0/9"}
            });
            vec![MqttMessage::new("lwm2m/dev1/up/resp", reply.to_string())]
        });
        let endpoint = engine.endpoint("dev1", None).unwrap();

        let response = assert_ok!(endpoint.read("/1/0/9").await);
        let error = assert_err!(response.check());
        assert!(error.is_response_error());
        assert_eq!(error.message().unwrap().as_response().unwrap().req_path, "/1/0/9");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Timeouts and retries
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_retries_until_answered() {
        let (engine, mock) = start();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        mock.respond_with(move |message| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Vec::new()
            } else {
                device(message)
            }
        });
        let endpoint = engine
            .endpoint("dev1", Some(Duration::from_millis(50)))
            .unwrap()
            .with_retries(3);

        assert_ok!(endpoint.read("/3/0/0").await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let ids: Vec<i64> = mock.published().iter().map(request_id).collect();
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (engine, mock) = start();
        let endpoint = engine
            .endpoint("dev1", None)
            .unwrap()
            .with_timeout(Duration::from_millis(30))
            .with_retries(1);

        let error = assert_err!(endpoint.read("/3/0/0").await);
        let request = error.request().unwrap();
        assert!(matches!(request.kind, RequestKind::Read { .. }));
        assert_eq!(mock.published().len(), 2);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observe
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_temporary_observe_cancels() {
        let (engine, mock) = start();
        mock.respond_with(device);
        let endpoint = engine.endpoint("dev1", None).unwrap();

        let seen = endpoint
            .temporary_observe("/3/0/13", |response| async move {
                assert!(response.notifications.is_some());
                response.value().unwrap().clone()
            })
            .await
            .unwrap();
        assert_eq!(seen, Value::Integer(42));

        let types: Vec<String> = mock.published().iter().map(msg_type).collect();
        assert_eq!(types, vec!["observe", "cancel-observe"]);
        assert_eq!(last_published(&mock)["data"]["path"], "/3/0/13");
    }

    #[tokio::test]
    async fn test_temporary_observe_cancels_when_abandoned() {
        let (engine, mock) = start();
        mock.respond_with(device);
        let endpoint = engine.endpoint("dev1", None).unwrap();

        let observing = endpoint.temporary_observe("/3/0/13", |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        assert_err!(tokio::time::timeout(Duration::from_millis(100), observing).await);

        let published = mock.wait_published(2).await;
        let types: Vec<String> = published.iter().map(msg_type).collect();
        assert_eq!(types, vec!["observe", "cancel-observe"]);
        assert_eq!(payload(&published[1])["data"]["path"], "/3/0/13");
    }

    #[tokio::test]
    async fn test_temporary_observe_cancels_on_panic() {
        let (engine, mock) = start();
        mock.respond_with(device);
        let endpoint = engine.endpoint("dev1", None).unwrap();

        let task = tokio::spawn(async move {
            endpoint
                .temporary_observe("/3/0/13", |_| async { panic!("body failed") })
                .await
        });
        assert!(task.await.unwrap_err().is_panic());

        let published = mock.wait_published(2).await;
        assert_eq!(msg_type(&published[1]), "cancel-observe");
    }

    #[tokio::test]
    async fn test_observe_into_queue() {
        let (engine, mock) = start();
        mock.respond_with(device);
        let endpoint = engine.endpoint("dev1", None).unwrap();
        let queue = endpoint.updates(None);

        assert_ok!(endpoint.observe("/3/0/13", Some(&queue)).await);
        let req_id = request_id(&mock.published()[0]);
        let notify = json!({
            "reqID": req_id,
            "msgType": "notify",
            "seqNum": 1,
            "data": {"code": "2.05", "reqPath": "/3/0/13", "content": [{"path": "/3/0/13", "value": 7}]}
        });
        mock.inject("lwm2m/dev1/up/notify", notify.to_string());

        let message = queue.recv_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(message.as_notification().unwrap().value().unwrap(), &Value::Integer(7));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_listeners() {
        let (engine, mock) = start();
        mock.respond_with(device);
        let endpoint = engine.endpoint("dev1", None).unwrap();

        let registrations = endpoint.registrations(false, None);
        let lifecycle = endpoint.registrations(true, None);
        let updates = endpoint.updates(None);
        let commands = endpoint.commands(None);
        let uplink = endpoint.uplink(None);
        let downlink = endpoint.downlink(None);

        let register = r#"{"msgType":"register","data":{"lt":300,"lwm2m":"1.1","objectList":["/1/0"]}}"#;
        let update = r#"{"msgType":"update","data":{"lt":300,"lwm2m":"1.1","objectList":["/1/0","/3/0"]}}"#;
        mock.inject("lwm2m/dev1/up/resp", register);
        mock.inject("lwm2m/dev1/up/resp", update);
        assert_ok!(endpoint.read("/3/0/0").await);

        let timeout = Duration::from_secs(1);
        let message = registrations.recv_timeout(timeout).await.unwrap();
        assert!(message.is(MessageClass::Registration));
        assert!(registrations.try_recv().is_none());

        let names: Vec<&str> = [
            lifecycle.recv_timeout(timeout).await.unwrap(),
            lifecycle.recv_timeout(timeout).await.unwrap(),
        ]
        .iter()
        .map(Message::name)
        .collect();
        assert_eq!(names, vec!["Registration", "Update"]);

        let update = updates.recv_timeout(timeout).await.unwrap();
        assert_eq!(update.as_registration().unwrap().object_list().len(), 2);

        assert!(commands.recv_timeout(timeout).await.unwrap().is(MessageClass::Request));
        assert!(commands.recv_timeout(timeout).await.unwrap().is(MessageClass::Response));
        assert_eq!(uplink.drain().len(), 3);
        assert_eq!(downlink.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_wiretap_several_endpoints_on_one_queue() {
        let (engine, mock) = start();
        let first = engine.endpoint("dev1", None).unwrap();
        let second = engine.endpoint("dev2", None).unwrap();
        let queue = first.wiretap(None);
        second.wiretap(Some(&queue));

        let register = r#"{"msgType":"register","data":{"lt":60,"lwm2m":"1.0"}}"#;
        mock.inject("lwm2m/dev2/up/resp", register);
        mock.inject("lwm2m/dev1/up/resp", register);

        let timeout = Duration::from_secs(1);
        let endpoints: Vec<String> = [
            queue.recv_timeout(timeout).await.unwrap(),
            queue.recv_timeout(timeout).await.unwrap(),
        ]
        .iter()
        .map(|m| m.endpoint().to_string())
        .collect();
        assert_eq!(endpoints, vec!["dev2", "dev1"]);
    }

    #[tokio::test]
    async fn test_close_releases_lease() {
        let (engine, mock) = start();
        let endpoint = engine.endpoint("dev1", None).unwrap();
        assert_eq!(endpoint.name(), "dev1");
        assert_eq!(engine.refcount("dev1"), 1);

        endpoint.close();
        assert_eq!(engine.refcount("dev1"), 0);
        assert_eq!(mock.unsubscribe_calls(), vec!["lwm2m/dev1/#"]);
    }
}
