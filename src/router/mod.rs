//! # Fan-out Router
//!
//! Topic-pattern pub/sub between the pump and everybody waiting on messages.
//!
//! ```text
//!                         ┌──► dev1/Uplink/Response/+/7          (send #7)
//! pump ──publish(topic)───┼──► dev1/#                            (wiretap)
//!                         └──► dev1/Uplink/Event/Notification/9/# (observe #9)
//! ```
//!
//! Every matching subscription gets its own copy of the message on its own
//! unbounded queue, so a slow consumer never holds up the pump or any other
//! consumer. Patterns use MQTT wildcards (`+` one segment, trailing `#` the
//! rest) plus `*`/`?` globs inside a segment, and several alternatives can be
//! joined with `|`.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use wildmatch::WildMatch;

use crate::lwm2m::Message;

// ─────────────────────────────────────────────────────────────────────────────
// Patterns
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Segment {
    /// `+`
    Single,
    /// `#`, only valid as the last segment
    Rest,
    Literal(String),
    Glob(WildMatch),
}

impl Segment {
    fn parse(segment: &str) -> Segment {
        match segment {
            "+" => Segment::Single,
            "#" => Segment::Rest,
            s if s.contains(['*', '?']) => Segment::Glob(WildMatch::new(s)),
            s => Segment::Literal(s.to_string()),
        }
    }
}

/// Compiled router pattern, e.g. `dev1/Uplink/Response/+/7|dev1/Downlink/#`
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    alternatives: Vec<Vec<Segment>>,
}

impl TopicPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let alternatives = raw
            .split('|')
            .map(|alternative| alternative.split('/').map(Segment::parse).collect())
            .collect();
        Self { raw, alternatives }
    }

    /// Pattern matching any of `patterns`
    pub fn any<S: AsRef<str>>(patterns: &[S]) -> Self {
        let joined: Vec<&str> = patterns.iter().map(|p| p.as_ref()).collect();
        Self::new(joined.join("|"))
    }

    /// `{scope}/{tail}` for each of `tails`, with `scope` matched verbatim
    ///
    /// Wildcards, globs and `|` inside `scope` have no special meaning, so an
    /// endpoint name can never select another endpoint's traffic.
    pub fn scoped<S: AsRef<str>>(scope: &str, tails: &[S]) -> Self {
        let raw = tails
            .iter()
            .map(|tail| format!("{}/{}", scope, tail.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        let alternatives = tails
            .iter()
            .map(|tail| {
                std::iter::once(Segment::Literal(scope.to_string()))
                    .chain(tail.as_ref().split('/').map(Segment::parse))
                    .collect()
            })
            .collect();
        Self { raw, alternatives }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('/').collect();
        self.alternatives
            .iter()
            .any(|segments| Self::matches_alternative(segments, &parts))
    }

    fn matches_alternative(segments: &[Segment], parts: &[&str]) -> bool {
        for (i, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Rest => return parts.len() >= i,
                Segment::Single => {
                    if i >= parts.len() {
                        return false;
                    }
                }
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return false;
                    }
                }
                Segment::Glob(glob) => {
                    if !parts.get(i).is_some_and(|part| glob.matches(part)) {
                        return false;
                    }
                }
            }
        }
        segments.len() == parts.len()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for TopicPattern {
    fn from(value: &str) -> Self {
        TopicPattern::new(value)
    }
}

impl From<String> for TopicPattern {
    fn from(value: String) -> Self {
        TopicPattern::new(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

type RouteId = u64;
type Routes = DashMap<RouteId, Route>;

struct Route {
    pattern: TopicPattern,
    sender: mpsc::UnboundedSender<Message>,
}

/// Cheaply cloneable handle to one routing table
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<Routes>,
    next_id: Arc<AtomicU64>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// New subscription with its own queue
    pub fn subscribe(&self, pattern: impl Into<TopicPattern>) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Subscription {
            inner: Arc::new(SubscriptionInner {
                routes: self.routes.clone(),
                route_ids: Mutex::new(Vec::new()),
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
            }),
        };
        self.subscribe_into(pattern, &subscription);
        subscription
    }

    /// Adds a route feeding an existing subscription's queue
    pub fn subscribe_into(&self, pattern: impl Into<TopicPattern>, subscription: &Subscription) {
        let pattern = pattern.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Router subscribe #{} {}", id, pattern);
        self.routes.insert(
            id,
            Route {
                pattern,
                sender: subscription.inner.sender.clone(),
            },
        );
        subscription.inner.route_ids.lock().push(id);
    }

    /// Delivers `message` to every subscription matching `topic`
    ///
    /// Returns the number of deliveries. Never blocks.
    pub fn publish(&self, topic: &str, message: &Message) -> usize {
        let mut delivered = 0;
        for route in self.routes.iter() {
            if route.pattern.matches(topic) && route.sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!("Router publish {} to {} subscriptions", topic, delivered);
        delivered
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Drops every route; queued messages stay with their subscriptions
    pub fn clear(&self) {
        debug!("Router cleared, {} routes dropped", self.routes.len());
        self.routes.clear();
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

struct SubscriptionInner {
    routes: Arc<Routes>,
    route_ids: Mutex<Vec<RouteId>>,
    sender: mpsc::UnboundedSender<Message>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl SubscriptionInner {
    fn remove_routes(&self) {
        for id in self.route_ids.lock().drain(..) {
            if let Some((_, route)) = self.routes.remove(&id) {
                debug!("Router unsubscribe #{} {}", id, route.pattern);
            }
        }
    }
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        self.remove_routes();
    }
}

/// Consumer side of one or more routes
///
/// Clones share the same queue: a message is taken by exactly one of them.
/// Routes are removed when the last clone is dropped or on [`unsubscribe`].
///
/// [`unsubscribe`]: Subscription::unsubscribe
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Waits for the next message
    pub async fn recv(&self) -> Option<Message> {
        self.inner.receiver.lock().await.recv().await
    }

    /// Waits at most `timeout`; `None` when nothing arrived
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Next queued message without waiting
    pub fn try_recv(&self) -> Option<Message> {
        self.inner.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Takes everything queued right now
    pub fn drain(&self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stops routing new messages here; already queued ones can still be read
    pub fn unsubscribe(&self) {
        self.inner.remove_routes();
    }

    pub fn is_subscribed(&self) -> bool {
        !self.inner.route_ids.lock().is_empty()
    }

    pub fn patterns(&self) -> Vec<String> {
        self.inner
            .route_ids
            .lock()
            .iter()
            .filter_map(|id| self.inner.routes.get(id).map(|r| r.pattern.to_string()))
            .collect()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("patterns", &self.patterns())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lwm2m::Request;

    fn message(path: &str) -> Message {
        Message::Request(Request::read("dev1", path))
    }

    // ───────────────────────────────────────────────────────────────────────
    // Pattern matching
    // ───────────────────────────────────────────────────────────────────────

    #[test]
    fn test_single_level_wildcard() {
        let pattern = TopicPattern::new("dev1/Uplink/Response/+/7");
        assert!(pattern.matches("dev1/Uplink/Response/Read/7"));
        assert!(!pattern.matches("dev1/Uplink/Response/Read/70"));
        assert!(!pattern.matches("dev1/Uplink/Response/7"));
        assert!(!pattern.matches("dev2/Uplink/Response/Read/7"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let pattern = TopicPattern::new("dev1/Uplink/Event/Notification/9/#");
        assert!(pattern.matches("dev1/Uplink/Event/Notification/9/3//3/0/13"));
        assert!(!pattern.matches("dev1/Uplink/Event/Notification/19/3//3/0/13"));

        let registration = TopicPattern::new("dev1/Uplink/Event/Registration/#");
        assert!(registration.matches("dev1/Uplink/Event/Registration"));
        assert!(TopicPattern::new("#").matches("anything/at/all"));
    }

    #[test]
    fn test_alternatives_and_globs() {
        let pattern = TopicPattern::any(&["dev1/Downlink/#", "dev1/Uplink/Response/*Observe/+"]);
        assert!(pattern.matches("dev1/Downlink/Request/Read/1"));
        assert!(pattern.matches("dev1/Uplink/Response/CancelObserve/4"));
        assert!(pattern.matches("dev1/Uplink/Response/Observe/4"));
        assert!(!pattern.matches("dev1/Uplink/Response/Read/4"));
    }

    #[test]
    fn test_scoped_endpoint_is_literal() {
        let pattern = TopicPattern::scoped("dev*", &["Uplink/#", "Downlink/Request/+/3"]);
        assert_eq!(pattern.as_str(), "dev*/Uplink/#|dev*/Downlink/Request/+/3");
        assert!(pattern.matches("dev*/Uplink/Event/Registration"));
        assert!(pattern.matches("dev*/Downlink/Request/Read/3"));
        assert!(!pattern.matches("dev1/Uplink/Event/Registration"));

        let piped = TopicPattern::scoped("a|dev1", &["#"]);
        assert!(piped.matches("a|dev1/Uplink/Response/Read/1"));
        assert!(!piped.matches("dev1/Uplink/Response/Read/1"));
        assert!(!TopicPattern::scoped("+", &["#"]).matches("dev1/Uplink"));
    }

    // ───────────────────────────────────────────────────────────────────────
    // Fan-out
    // ───────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_fan_out_is_independent() {
        let router = Router::new();
        let all = router.subscribe("dev1/#");
        let reads = router.subscribe("dev1/Downlink/Request/Read/+");
        let other = router.subscribe("dev2/#");

        assert_eq!(router.publish("dev1/Downlink/Request/Read/1", &message("/1")), 2);
        assert_eq!(router.publish("dev1/Downlink/Request/Read/2", &message("/2")), 2);

        // Draining one queue leaves the other untouched.
        assert_eq!(all.drain().len(), 2);
        assert_eq!(reads.recv().await.unwrap(), message("/1"));
        assert_eq!(reads.recv().await.unwrap(), message("/2"));
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let router = Router::new();
        let subscription = router.subscribe("dev1/#");
        for i in 0..50 {
            router.publish("dev1/x", &message(&format!("/{}", i)));
        }
        for i in 0..50 {
            assert_eq!(subscription.recv().await.unwrap(), message(&format!("/{}", i)));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_keeps_queued_messages() {
        let router = Router::new();
        let subscription = router.subscribe("dev1/#");
        router.publish("dev1/a", &message("/1"));
        subscription.unsubscribe();
        assert!(!subscription.is_subscribed());
        assert_eq!(router.route_count(), 0);
        assert_eq!(router.publish("dev1/b", &message("/2")), 0);
        assert_eq!(subscription.try_recv(), Some(message("/1")));
        assert!(subscription
            .recv_timeout(Duration::from_millis(20))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_merged_routes_share_a_queue() {
        let router = Router::new();
        let subscription = router.subscribe("dev1/#");
        router.subscribe_into("dev2/#", &subscription);
        assert_eq!(subscription.patterns().len(), 2);

        router.publish("dev1/a", &message("/1"));
        router.publish("dev2/a", &message("/2"));
        assert_eq!(subscription.drain().len(), 2);
    }

    #[test]
    fn test_drop_removes_routes() {
        let router = Router::new();
        let subscription = router.subscribe("dev1/#");
        let clone = subscription.clone();
        drop(subscription);
        assert_eq!(router.route_count(), 1);
        drop(clone);
        assert_eq!(router.route_count(), 0);
    }
}
