//! Typed LwM2M messages
//!
//! ```text
//! Message
//! ├── Request   (Downlink)  Discover | Read | Write | WriteAttr | Execute
//! │                         Create | Delete | Observe | CancelObserve
//! ├── Response  (Uplink)    one kind per request kind
//! └── Event     (Uplink)    Registration | Update | Notification
//! ```
//!
//! Messages are value objects. The timestamp is taken once at construction and
//! takes no part in equality. The only fields written after construction are
//! [`Response::dt`] and [`Response::notifications`], both set by the engine
//! before the response reaches the caller of `send`.

use chrono::{DateTime, Local, TimeDelta};
use std::collections::BTreeMap;
use std::fmt;

use super::attributes::Attributes;
use super::code::CoapResponseCode;
use super::path::Path;
use super::value::Value;
use crate::error::Error;
use crate::router::Subscription;

/// Resource values keyed by path
pub type Content = BTreeMap<Path, Value>;

/// Link-format attributes of a discovered path
pub type LinkAttributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Uplink => "Uplink",
            Direction::Downlink => "Downlink",
        }
    }
}

/// Selector for a family of messages, used when listening with `recv`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Message,
    Uplink,
    Downlink,
    Request,
    Response,
    Event,
    Registration,
    Update,
    Notification,
}

fn collect_content<P, V>(values: impl IntoIterator<Item = (P, V)>) -> Content
where
    P: Into<Path>,
    V: Into<Value>,
{
    values
        .into_iter()
        .map(|(p, v)| (p.into(), v.into()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Discover { path: Path },
    Read { path: Path },
    Write { data: Content },
    WriteAttr { path: Path, attributes: Attributes },
    Execute { path: Path, args: String },
    Create { data: Content },
    Delete { path: Path },
    Observe { path: Path },
    CancelObserve { path: Path },
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::Discover { .. } => "DiscoverRequest",
            RequestKind::Read { .. } => "ReadRequest",
            RequestKind::Write { .. } => "WriteRequest",
            RequestKind::WriteAttr { .. } => "WriteAttrRequest",
            RequestKind::Execute { .. } => "ExecuteRequest",
            RequestKind::Create { .. } => "CreateRequest",
            RequestKind::Delete { .. } => "DeleteRequest",
            RequestKind::Observe { .. } => "ObserveRequest",
            RequestKind::CancelObserve { .. } => "CancelObserveRequest",
        }
    }
}

/// Downlink command addressed to one endpoint
#[derive(Debug, Clone)]
pub struct Request {
    pub ep: String,
    pub kind: RequestKind,
    pub timestamp: DateTime<Local>,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.ep == other.ep && self.kind == other.kind
    }
}

impl Request {
    pub fn new(ep: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            ep: ep.into(),
            kind,
            timestamp: Local::now(),
        }
    }

    pub fn discover(ep: impl Into<String>, path: impl Into<Path>) -> Self {
        Self::new(ep, RequestKind::Discover { path: path.into() })
    }

    pub fn read(ep: impl Into<String>, path: impl Into<Path>) -> Self {
        Self::new(ep, RequestKind::Read { path: path.into() })
    }

    pub fn write<P, V>(ep: impl Into<String>, data: impl IntoIterator<Item = (P, V)>) -> Self
    where
        P: Into<Path>,
        V: Into<Value>,
    {
        Self::new(
            ep,
            RequestKind::Write {
                data: collect_content(data),
            },
        )
    }

    pub fn write_attr(ep: impl Into<String>, path: impl Into<Path>, attributes: Attributes) -> Self {
        Self::new(
            ep,
            RequestKind::WriteAttr {
                path: path.into(),
                attributes,
            },
        )
    }

    pub fn execute(ep: impl Into<String>, path: impl Into<Path>, args: impl Into<String>) -> Self {
        Self::new(
            ep,
            RequestKind::Execute {
                path: path.into(),
                args: args.into(),
            },
        )
    }

    pub fn create<P, V>(ep: impl Into<String>, data: impl IntoIterator<Item = (P, V)>) -> Self
    where
        P: Into<Path>,
        V: Into<Value>,
    {
        Self::new(
            ep,
            RequestKind::Create {
                data: collect_content(data),
            },
        )
    }

    pub fn delete(ep: impl Into<String>, path: impl Into<Path>) -> Self {
        Self::new(ep, RequestKind::Delete { path: path.into() })
    }

    pub fn observe(ep: impl Into<String>, path: impl Into<Path>) -> Self {
        Self::new(ep, RequestKind::Observe { path: path.into() })
    }

    pub fn cancel_observe(ep: impl Into<String>, path: impl Into<Path>) -> Self {
        Self::new(ep, RequestKind::CancelObserve { path: path.into() })
    }

    pub fn is_observe(&self) -> bool {
        matches!(self.kind, RequestKind::Observe { .. })
    }

    /// Path the request targets; multi-path writes report their first path
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            RequestKind::Discover { path }
            | RequestKind::Read { path }
            | RequestKind::WriteAttr { path, .. }
            | RequestKind::Execute { path, .. }
            | RequestKind::Delete { path }
            | RequestKind::Observe { path }
            | RequestKind::CancelObserve { path } => Some(path),
            RequestKind::Write { data } | RequestKind::Create { data } => data.keys().next(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            RequestKind::Write { data } | RequestKind::Create { data } => {
                write!(f, "{}({}, {:?})", self.kind.name(), self.ep, data)
            }
            _ => match self.path() {
                Some(path) => write!(f, "{}({}, {})", self.kind.name(), self.ep, path),
                None => write!(f, "{}({})", self.kind.name(), self.ep),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    Discover(BTreeMap<Path, LinkAttributes>),
    Read(Content),
    Write,
    WriteAttr,
    Execute,
    Create,
    Delete,
    Observe(Content),
    CancelObserve(Content),
}

impl ResponseKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResponseKind::Discover(_) => "DiscoverResponse",
            ResponseKind::Read(_) => "ReadResponse",
            ResponseKind::Write => "WriteResponse",
            ResponseKind::WriteAttr => "WriteAttrResponse",
            ResponseKind::Execute => "ExecuteResponse",
            ResponseKind::Create => "CreateResponse",
            ResponseKind::Delete => "DeleteResponse",
            ResponseKind::Observe(_) => "ObserveResponse",
            ResponseKind::CancelObserve(_) => "CancelObserveResponse",
        }
    }

    /// Whether this response answers the given request kind
    pub fn answers(&self, request: &RequestKind) -> bool {
        matches!(
            (self, request),
            (ResponseKind::Discover(_), RequestKind::Discover { .. })
                | (ResponseKind::Read(_), RequestKind::Read { .. })
                | (ResponseKind::Write, RequestKind::Write { .. })
                | (ResponseKind::WriteAttr, RequestKind::WriteAttr { .. })
                | (ResponseKind::Execute, RequestKind::Execute { .. })
                | (ResponseKind::Create, RequestKind::Create { .. })
                | (ResponseKind::Delete, RequestKind::Delete { .. })
                | (ResponseKind::Observe(_), RequestKind::Observe { .. })
                | (ResponseKind::CancelObserve(_), RequestKind::CancelObserve { .. })
        )
    }
}

/// Uplink answer to a request
#[derive(Debug, Clone)]
pub struct Response {
    pub ep: String,
    pub code: CoapResponseCode,
    pub req_path: Path,
    pub kind: ResponseKind,
    pub timestamp: DateTime<Local>,
    /// Round trip time, stamped by the engine
    pub dt: Option<TimeDelta>,
    /// Notification queue of an observe, attached by the engine
    pub notifications: Option<Subscription>,
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        self.ep == other.ep
            && self.code == other.code
            && self.req_path == other.req_path
            && self.kind == other.kind
    }
}

impl Response {
    pub fn new(
        ep: impl Into<String>,
        code: CoapResponseCode,
        req_path: impl Into<Path>,
        kind: ResponseKind,
    ) -> Self {
        Self {
            ep: ep.into(),
            code,
            req_path: req_path.into(),
            kind,
            timestamp: Local::now(),
            dt: None,
            notifications: None,
        }
    }

    /// Fails with [`Error::Response`] unless the code is 2.xx
    pub fn check(&self) -> Result<(), Error> {
        if self.code.is_success() {
            Ok(())
        } else {
            Err(Error::Response(Box::new(Message::Response(self.clone()))))
        }
    }

    /// Resource values carried by read and observe responses
    pub fn content(&self) -> Option<&Content> {
        match &self.kind {
            ResponseKind::Read(content)
            | ResponseKind::Observe(content)
            | ResponseKind::CancelObserve(content) => Some(content),
            _ => None,
        }
    }

    /// The value at the requested path
    ///
    /// Only a read of a single resource has one. Reads of an object or an
    /// instance yield [`Error::NoValue`]; use [`Response::content`] for the
    /// whole map.
    pub fn value(&self) -> Result<&Value, Error> {
        self.check()?;
        let content = self
            .content()
            .ok_or_else(|| Error::NoValue(self.kind.name().to_string()))?;
        content
            .get(&self.req_path)
            .ok_or_else(|| Error::NoValue(format!("{} has no {}", self.kind.name(), self.req_path)))
    }

    pub fn links(&self) -> Option<&BTreeMap<Path, LinkAttributes>> {
        match &self.kind {
            ResponseKind::Discover(links) => Some(links),
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({}, {}, {})",
            self.kind.name(),
            self.ep,
            self.code,
            self.req_path
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Payload shared by registrations and registration updates
#[derive(Debug, Clone)]
pub struct Registration {
    pub ep: String,
    /// Lifetime in seconds
    pub lt: u64,
    pub sms: Option<String>,
    pub lwm2m: String,
    /// Binding mode
    pub b: Option<String>,
    pub alternate_path: String,
    pub object_list: Vec<Path>,
    pub timestamp: DateTime<Local>,
}

impl PartialEq for Registration {
    fn eq(&self, other: &Self) -> bool {
        self.ep == other.ep
            && self.lt == other.lt
            && self.sms == other.sms
            && self.lwm2m == other.lwm2m
            && self.b == other.b
            && self.alternate_path == other.alternate_path
            && self.object_list == other.object_list
    }
}

impl Registration {
    pub fn object_list(&self) -> &[Path] {
        &self.object_list
    }
}

/// Observe notification
#[derive(Debug, Clone)]
pub struct Notification {
    pub ep: String,
    pub code: CoapResponseCode,
    pub req_path: Path,
    pub seq_num: u64,
    pub data: Content,
    pub timestamp: DateTime<Local>,
}

impl PartialEq for Notification {
    fn eq(&self, other: &Self) -> bool {
        self.ep == other.ep
            && self.code == other.code
            && self.req_path == other.req_path
            && self.seq_num == other.seq_num
            && self.data == other.data
    }
}

impl Notification {
    pub fn check(&self) -> Result<(), Error> {
        if self.code.is_success() {
            Ok(())
        } else {
            Err(Error::Response(Box::new(Message::Event(
                Event::Notification(self.clone()),
            ))))
        }
    }

    pub fn value(&self) -> Result<&Value, Error> {
        self.check()?;
        self.data
            .get(&self.req_path)
            .ok_or_else(|| Error::NoValue(format!("Notification has no {}", self.req_path)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Registration(Registration),
    Update(Registration),
    Notification(Notification),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Registration(_) => "Registration",
            Event::Update(_) => "Update",
            Event::Notification(_) => "Notification",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// Anything exchanged with an endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl Message {
    pub fn endpoint(&self) -> &str {
        match self {
            Message::Request(r) => &r.ep,
            Message::Response(r) => &r.ep,
            Message::Event(Event::Registration(r) | Event::Update(r)) => &r.ep,
            Message::Event(Event::Notification(n)) => &n.ep,
        }
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        match self {
            Message::Request(r) => r.timestamp,
            Message::Response(r) => r.timestamp,
            Message::Event(Event::Registration(r) | Event::Update(r)) => r.timestamp,
            Message::Event(Event::Notification(n)) => n.timestamp,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Message::Request(_) => Direction::Downlink,
            Message::Response(_) | Message::Event(_) => Direction::Uplink,
        }
    }

    /// Concrete variant name, e.g. `ReadResponse`
    pub fn name(&self) -> &'static str {
        match self {
            Message::Request(r) => r.kind.name(),
            Message::Response(r) => r.kind.name(),
            Message::Event(e) => e.name(),
        }
    }

    /// Whether the message belongs to `class`
    pub fn is(&self, class: MessageClass) -> bool {
        match class {
            MessageClass::Message => true,
            MessageClass::Uplink => self.direction() == Direction::Uplink,
            MessageClass::Downlink => self.direction() == Direction::Downlink,
            MessageClass::Request => matches!(self, Message::Request(_)),
            MessageClass::Response => matches!(self, Message::Response(_)),
            MessageClass::Event => matches!(self, Message::Event(_)),
            MessageClass::Registration => matches!(self, Message::Event(Event::Registration(_))),
            MessageClass::Update => matches!(self, Message::Event(Event::Update(_))),
            MessageClass::Notification => matches!(self, Message::Event(Event::Notification(_))),
        }
    }

    /// Most specific class the message belongs to
    pub fn class(&self) -> MessageClass {
        match self {
            Message::Request(_) => MessageClass::Request,
            Message::Response(_) => MessageClass::Response,
            Message::Event(Event::Registration(_)) => MessageClass::Registration,
            Message::Event(Event::Update(_)) => MessageClass::Update,
            Message::Event(Event::Notification(_)) => MessageClass::Notification,
        }
    }

    /// Fails for responses and notifications carrying a non 2.xx code
    pub fn check(&self) -> Result<(), Error> {
        match self {
            Message::Response(r) => r.check(),
            Message::Event(Event::Notification(n)) => n.check(),
            _ => Ok(()),
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Message::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_notification(&self) -> Option<&Notification> {
        match self {
            Message::Event(Event::Notification(n)) => Some(n),
            _ => None,
        }
    }

    pub fn into_notification(self) -> Option<Notification> {
        match self {
            Message::Event(Event::Notification(n)) => Some(n),
            _ => None,
        }
    }

    pub fn as_registration(&self) -> Option<&Registration> {
        match self {
            Message::Event(Event::Registration(r) | Event::Update(r)) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Request(r) => write!(f, "{}", r),
            Message::Response(r) => write!(f, "{}", r),
            Message::Event(event) => match event {
                Event::Notification(n) => write!(
                    f,
                    "Notification({}, {}, {}, seq={})",
                    n.ep, n.code, n.req_path, n.seq_num
                ),
                Event::Registration(r) | Event::Update(r) => {
                    write!(f, "{}({}, lt={})", event.name(), r.ep, r.lt)
                }
            },
        }
    }
}
