//! JSON payload codec
//!
//! Translates between typed [`Message`]s and the gateway's JSON envelopes, and
//! derives the internal router topic a decoded message is published under.
//!
//! ```text
//! downlink  {"reqID": 7, "msgType": "read", "data": {"path": "/1/0/1"}}
//! uplink    {"reqID": 7, "msgType": "read",
//!            "data": {"code": "2.05", "reqPath": "/1/0/1",
//!                     "content": [{"path": "/1/0/1", "value": 60}]}}
//! notify    {"reqID": 9, "msgType": "notify", "seqNum": 3, "data": {...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value as Json};
use std::collections::BTreeMap;

use crate::lwm2m::{
    Attributes, CoapResponseCode, Content, Direction, Event, LinkAttributes, Message,
    MessageClass, Notification, Path, Registration, Request, RequestKind, Response, ResponseKind,
    Value,
};
use crate::router::TopicPattern;

/// Request identifier carried in `reqID`
pub type ReqId = i64;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No {direction} message of type {msg_type:?}")]
    UnknownMsgType {
        direction: &'static str,
        msg_type: String,
    },

    #[error("Value {0} cannot be carried by the gateway")]
    UnsupportedValue(String),

    #[error("{0} request carries no values")]
    EmptyContent(&'static str),

    #[error("Path {path} cannot be grouped with {first}")]
    Ungroupable { path: Path, first: Path },
}

/// `msgType` of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Discover,
    Read,
    Write,
    WriteAttr,
    Execute,
    Create,
    Delete,
    Observe,
    CancelObserve,
    Register,
    Update,
    Notify,
}

impl MsgType {
    const ALL: [MsgType; 12] = [
        MsgType::Discover,
        MsgType::Read,
        MsgType::Write,
        MsgType::WriteAttr,
        MsgType::Execute,
        MsgType::Create,
        MsgType::Delete,
        MsgType::Observe,
        MsgType::CancelObserve,
        MsgType::Register,
        MsgType::Update,
        MsgType::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Discover => "discover",
            MsgType::Read => "read",
            MsgType::Write => "write",
            MsgType::WriteAttr => "write-attr",
            MsgType::Execute => "execute",
            MsgType::Create => "create",
            MsgType::Delete => "delete",
            MsgType::Observe => "observe",
            MsgType::CancelObserve => "cancel-observe",
            MsgType::Register => "register",
            MsgType::Update => "update",
            MsgType::Notify => "notify",
        }
    }

    pub fn from_wire(msg_type: &str) -> Option<MsgType> {
        Self::ALL.into_iter().find(|t| t.as_str() == msg_type)
    }

    pub fn of(kind: &RequestKind) -> MsgType {
        match kind {
            RequestKind::Discover { .. } => MsgType::Discover,
            RequestKind::Read { .. } => MsgType::Read,
            RequestKind::Write { .. } => MsgType::Write,
            RequestKind::WriteAttr { .. } => MsgType::WriteAttr,
            RequestKind::Execute { .. } => MsgType::Execute,
            RequestKind::Create { .. } => MsgType::Create,
            RequestKind::Delete { .. } => MsgType::Delete,
            RequestKind::Observe { .. } => MsgType::Observe,
            RequestKind::CancelObserve { .. } => MsgType::CancelObserve,
        }
    }
}

/// A decoded payload together with the request ID it carried
#[derive(Debug, Clone)]
pub struct Decoded {
    pub message: Message,
    pub req_id: Option<ReqId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire structures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "reqID", default, skip_serializing_if = "Option::is_none")]
    req_id: Option<ReqId>,
    #[serde(rename = "msgType")]
    msg_type: String,
    #[serde(rename = "seqNum", default, skip_serializing_if = "Option::is_none")]
    seq_num: Option<u64>,
    #[serde(default)]
    data: Json,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentItem {
    path: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    value_type: Option<String>,
    value: Json,
}

#[derive(Debug, Serialize, Deserialize)]
struct BatchData {
    #[serde(rename = "basePath")]
    base_path: String,
    content: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WriteData {
    Batch(BatchData),
    Single(ContentItem),
}

#[derive(Debug, Deserialize)]
struct PathData {
    path: Path,
}

#[derive(Debug, Deserialize)]
struct ExecuteData {
    path: Path,
    #[serde(default)]
    args: String,
}

#[derive(Debug, Serialize)]
struct WriteAttrOut {
    path: Path,
    pmin: Option<String>,
    pmax: Option<String>,
    gt: Option<String>,
    lt: Option<String>,
    st: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WriteAttrIn {
    path: Path,
    #[serde(default)]
    pmin: Json,
    #[serde(default)]
    pmax: Json,
    #[serde(default)]
    gt: Json,
    #[serde(default)]
    lt: Json,
    #[serde(default)]
    st: Json,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    code: CoapResponseCode,
    #[serde(rename = "reqPath")]
    req_path: Path,
    #[serde(default)]
    content: Option<Json>,
    #[serde(rename = "seqNum", default)]
    seq_num: Option<u64>,
}

fn default_alternate_path() -> String {
    "/".to_string()
}

#[derive(Debug, Deserialize)]
struct RegisterData {
    lt: u64,
    #[serde(default)]
    sms: Option<String>,
    lwm2m: String,
    #[serde(default)]
    b: Option<String>,
    #[serde(rename = "alternatePath", default = "default_alternate_path")]
    alternate_path: String,
    #[serde(rename = "objectList", default)]
    object_list: Vec<Path>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Serializes a downlink request under the given request ID
pub fn encode(request: &Request, req_id: ReqId) -> Result<Vec<u8>, CodecError> {
    let data = match &request.kind {
        RequestKind::Discover { path }
        | RequestKind::Read { path }
        | RequestKind::Delete { path }
        | RequestKind::Observe { path }
        | RequestKind::CancelObserve { path } => json!({ "path": path }),
        RequestKind::Execute { path, args } => json!({ "path": path, "args": args }),
        RequestKind::WriteAttr { path, attributes } => {
            serde_json::to_value(write_attr_data(path, attributes))?
        }
        RequestKind::Write { data } => encode_write(data)?,
        RequestKind::Create { data } => encode_create(data)?,
    };
    let envelope = Envelope {
        req_id: Some(req_id),
        msg_type: MsgType::of(&request.kind).as_str().to_string(),
        seq_num: None,
        data,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn write_attr_data(path: &Path, attributes: &Attributes) -> WriteAttrOut {
    fn text<T: ToString>(value: Option<T>) -> Option<String> {
        value.map(|v| v.to_string())
    }
    WriteAttrOut {
        path: path.clone(),
        pmin: text(attributes.pmin),
        pmax: text(attributes.pmax),
        gt: text(attributes.gt),
        lt: text(attributes.lt),
        st: text(attributes.st),
    }
}

/// Wire type and JSON representation of a value
fn encode_value(value: &Value) -> Result<(&'static str, Json), CodecError> {
    let json = match value {
        Value::Boolean(b) => Json::String(b.to_string()),
        Value::Integer(i) => Json::from(*i),
        Value::Float(f) => Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| CodecError::UnsupportedValue(f.to_string()))?,
        Value::String(s) => Json::String(s.clone()),
    };
    Ok((value.wire_type(), json))
}

fn content_item(path: String, value: &Value) -> Result<ContentItem, CodecError> {
    let (value_type, value) = encode_value(value)?;
    Ok(ContentItem {
        path,
        value_type: Some(value_type.to_string()),
        value,
    })
}

/// Resource paths `oid/iid/rid` only
fn resource_parts(path: &Path, first: &Path) -> Result<[String; 3], CodecError> {
    match path.parts().as_slice() {
        [oid, iid, rid] => Ok([oid.to_string(), iid.to_string(), rid.to_string()]),
        _ => Err(CodecError::Ungroupable {
            path: path.clone(),
            first: first.clone(),
        }),
    }
}

fn encode_write(data: &Content) -> Result<Json, CodecError> {
    let Some((first, first_value)) = data.iter().next() else {
        return Err(CodecError::EmptyContent("Write"));
    };
    if data.len() == 1 {
        let item = content_item(first.to_string(), first_value)?;
        return Ok(serde_json::to_value(item)?);
    }

    resource_parts(first, first)?;
    let base = first.parent().unwrap_or_default();
    let mut content = Vec::with_capacity(data.len());
    for (path, value) in data {
        let [_, _, rid] = resource_parts(path, first)?;
        if path.parent().as_ref() != Some(&base) {
            return Err(CodecError::Ungroupable {
                path: path.clone(),
                first: first.clone(),
            });
        }
        content.push(content_item(rid, value)?);
    }
    let batch = BatchData {
        base_path: format!("{}/", base),
        content,
    };
    Ok(serde_json::to_value(batch)?)
}

fn encode_create(data: &Content) -> Result<Json, CodecError> {
    let Some(first) = data.keys().next() else {
        return Err(CodecError::EmptyContent("Create"));
    };
    let [oid, _, _] = resource_parts(first, first)?;
    let mut content = Vec::with_capacity(data.len());
    for (path, value) in data {
        let [path_oid, iid, rid] = resource_parts(path, first)?;
        if path_oid != oid || path.is_absolute() != first.is_absolute() {
            return Err(CodecError::Ungroupable {
                path: path.clone(),
                first: first.clone(),
            });
        }
        content.push(content_item(format!("/{}/{}", iid, rid), value)?);
    }
    let base_path = if first.is_absolute() {
        format!("/{}", oid)
    } else {
        oid
    };
    Ok(serde_json::to_value(BatchData { base_path, content })?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a gateway payload published on a topic of `endpoint`
pub fn decode(direction: Direction, endpoint: &str, payload: &[u8]) -> Result<Decoded, CodecError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    let req_id = envelope.req_id;
    let unknown = || CodecError::UnknownMsgType {
        direction: match direction {
            Direction::Uplink => "uplink",
            Direction::Downlink => "downlink",
        },
        msg_type: envelope.msg_type.clone(),
    };
    let msg_type = MsgType::from_wire(&envelope.msg_type).ok_or_else(unknown)?;

    let message = match (direction, msg_type) {
        (Direction::Downlink, MsgType::Register | MsgType::Update | MsgType::Notify) => {
            return Err(unknown());
        }
        (Direction::Downlink, _) => {
            Message::Request(decode_request(endpoint, msg_type, envelope.data)?)
        }
        (Direction::Uplink, MsgType::Register) => {
            Message::Event(Event::Registration(decode_registration(endpoint, envelope.data)?))
        }
        (Direction::Uplink, MsgType::Update) => {
            Message::Event(Event::Update(decode_registration(endpoint, envelope.data)?))
        }
        (Direction::Uplink, MsgType::Notify) => {
            let data: ResponseData = serde_json::from_value(envelope.data)?;
            let seq_num = envelope.seq_num.or(data.seq_num).unwrap_or_default();
            Message::Event(Event::Notification(Notification {
                ep: endpoint.to_string(),
                code: data.code,
                req_path: data.req_path,
                seq_num,
                data: decode_content(data.content)?,
                timestamp: chrono::Local::now(),
            }))
        }
        (Direction::Uplink, _) => Message::Response(decode_response(endpoint, msg_type, envelope.data)?),
    };

    Ok(Decoded { message, req_id })
}

fn decode_request(endpoint: &str, msg_type: MsgType, data: Json) -> Result<Request, CodecError> {
    let path = |data: Json| -> Result<Path, CodecError> {
        Ok(serde_json::from_value::<PathData>(data)?.path)
    };
    let kind = match msg_type {
        MsgType::Discover => RequestKind::Discover { path: path(data)? },
        MsgType::Read => RequestKind::Read { path: path(data)? },
        MsgType::Delete => RequestKind::Delete { path: path(data)? },
        MsgType::Observe => RequestKind::Observe { path: path(data)? },
        MsgType::CancelObserve => RequestKind::CancelObserve { path: path(data)? },
        MsgType::Execute => {
            let ExecuteData { path, args } = serde_json::from_value(data)?;
            RequestKind::Execute { path, args }
        }
        MsgType::WriteAttr => {
            let attrs: WriteAttrIn = serde_json::from_value(data)?;
            RequestKind::WriteAttr {
                attributes: Attributes {
                    pmin: attr_field(&attrs.pmin)?,
                    pmax: attr_field(&attrs.pmax)?,
                    lt: attr_field(&attrs.lt)?,
                    st: attr_field(&attrs.st)?,
                    gt: attr_field(&attrs.gt)?,
                },
                path: attrs.path,
            }
        }
        MsgType::Write => {
            let data = match serde_json::from_value(data)? {
                WriteData::Single(item) => {
                    let path = Path::new(&item.path);
                    Content::from([(path, decode_value(item.value, item.value_type.as_deref())?)])
                }
                WriteData::Batch(batch) => decode_batch(batch)?,
            };
            RequestKind::Write { data }
        }
        MsgType::Create => RequestKind::Create {
            data: decode_batch(serde_json::from_value(data)?)?,
        },
        MsgType::Register | MsgType::Update | MsgType::Notify => {
            return Err(CodecError::UnknownMsgType {
                direction: "downlink",
                msg_type: msg_type.as_str().to_string(),
            });
        }
    };
    Ok(Request::new(endpoint, kind))
}

/// Write attributes travel as strings, but numbers and null are accepted
fn attr_field<T: std::str::FromStr>(field: &Json) -> Result<Option<T>, CodecError> {
    let text = match field {
        Json::Null => return Ok(None),
        Json::String(s) if s.trim().is_empty() => return Ok(None),
        Json::String(s) => s.trim().to_string(),
        Json::Number(n) => n.to_string(),
        other => return Err(CodecError::UnsupportedValue(other.to_string())),
    };
    text.parse()
        .map(Some)
        .map_err(|_| CodecError::UnsupportedValue(text))
}

fn decode_batch(batch: BatchData) -> Result<Content, CodecError> {
    let base = Path::new(&batch.base_path);
    batch
        .content
        .into_iter()
        .map(|item| {
            let value = decode_value(item.value, item.value_type.as_deref())?;
            Ok((base.join(&item.path), value))
        })
        .collect()
}

fn decode_response(endpoint: &str, msg_type: MsgType, data: Json) -> Result<Response, CodecError> {
    let data: ResponseData = serde_json::from_value(data)?;
    let kind = match msg_type {
        MsgType::Discover => {
            let links: Vec<String> = match data.content {
                Some(content) => serde_json::from_value(content)?,
                None => Vec::new(),
            };
            ResponseKind::Discover(parse_links(&links))
        }
        MsgType::Read => ResponseKind::Read(decode_content(data.content)?),
        MsgType::Observe => ResponseKind::Observe(decode_content(data.content)?),
        MsgType::CancelObserve => ResponseKind::CancelObserve(decode_content(data.content)?),
        MsgType::Write => ResponseKind::Write,
        MsgType::WriteAttr => ResponseKind::WriteAttr,
        MsgType::Execute => ResponseKind::Execute,
        MsgType::Create => ResponseKind::Create,
        MsgType::Delete => ResponseKind::Delete,
        MsgType::Register | MsgType::Update | MsgType::Notify => {
            return Err(CodecError::UnknownMsgType {
                direction: "uplink",
                msg_type: msg_type.as_str().to_string(),
            });
        }
    };
    Ok(Response::new(endpoint, data.code, data.req_path, kind))
}

fn decode_content(content: Option<Json>) -> Result<Content, CodecError> {
    let Some(content) = content else {
        return Ok(Content::new());
    };
    let items: Vec<ContentItem> = serde_json::from_value(content)?;
    items
        .into_iter()
        .map(|item| {
            let value = decode_value(item.value, item.value_type.as_deref())?;
            Ok((Path::new(&item.path), value))
        })
        .collect()
}

fn decode_registration(endpoint: &str, data: Json) -> Result<Registration, CodecError> {
    let data: RegisterData = serde_json::from_value(data)?;
    Ok(Registration {
        ep: endpoint.to_string(),
        lt: data.lt,
        sms: data.sms,
        lwm2m: data.lwm2m,
        b: data.b,
        alternate_path: data.alternate_path,
        object_list: data.object_list,
        timestamp: chrono::Local::now(),
    })
}

/// JSON value to [`Value`]; typed strings are coerced by their wire type
fn decode_value(json: Json, value_type: Option<&str>) -> Result<Value, CodecError> {
    match json {
        Json::Bool(b) => Ok(Value::Boolean(b)),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Float))
            .ok_or_else(|| CodecError::UnsupportedValue(n.to_string())),
        Json::String(s) => match value_type {
            Some("Boolean" | "Integer" | "Float") => Ok(Value::coerce(&s)),
            _ => Ok(Value::String(s)),
        },
        other => Err(CodecError::UnsupportedValue(other.to_string())),
    }
}

/// CoRE link format, e.g. `</3/0>;ver=1.0,</3/0/1>`
pub fn parse_links<S: AsRef<str>>(items: &[S]) -> BTreeMap<Path, LinkAttributes> {
    let mut links = BTreeMap::new();
    for link in items.iter().flat_map(|item| item.as_ref().split(',')) {
        let mut fields = link.split(';');
        let target = fields
            .next()
            .unwrap_or_default()
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>');
        if target.is_empty() {
            continue;
        }
        let attributes = fields
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .map(|field| match field.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), Value::coerce(value.trim())),
                None => (field.to_string(), Value::String(String::new())),
            })
            .collect();
        links.insert(Path::new(target), attributes);
    }
    links
}

// ─────────────────────────────────────────────────────────────────────────────
// Router topics
// ─────────────────────────────────────────────────────────────────────────────

fn type_segment(message: &Message) -> &'static str {
    match message {
        Message::Request(_) => "Request",
        Message::Response(_) => "Response",
        Message::Event(_) => "Event",
    }
}

fn variant_segment(message: &Message) -> &'static str {
    match message {
        Message::Request(r) => r.kind.name().trim_end_matches("Request"),
        Message::Response(r) => r.kind.name().trim_end_matches("Response"),
        Message::Event(e) => e.name(),
    }
}

/// Internal topic a decoded message is published under
///
/// ```text
/// dev1/Uplink/Response/Read/7
/// dev1/Uplink/Event/Notification/9/3//3/0/13
/// dev1/Uplink/Event/Registration
/// ```
pub fn router_topic(message: &Message, req_id: Option<ReqId>) -> String {
    let mut topic = format!(
        "{}/{}/{}/{}",
        message.endpoint(),
        message.direction().as_str(),
        type_segment(message),
        variant_segment(message)
    );
    if message.is(MessageClass::Registration) || message.is(MessageClass::Update) {
        return topic;
    }
    match req_id {
        Some(id) => topic.push_str(&format!("/{}", id)),
        // Keeps ID-less notifications apart from every observe's route
        None if message.is(MessageClass::Notification) => topic.push_str("/-"),
        None => {}
    }
    if let Message::Event(Event::Notification(n)) = message {
        topic.push_str(&format!("/{}/{}", n.seq_num, n.req_path));
    }
    topic
}

fn class_scope(class: MessageClass) -> &'static str {
    match class {
        MessageClass::Message => "#",
        MessageClass::Uplink => "Uplink/#",
        MessageClass::Downlink => "Downlink/#",
        MessageClass::Request => "Downlink/Request/#",
        MessageClass::Response => "Uplink/Response/#",
        MessageClass::Event => "Uplink/Event/#",
        MessageClass::Registration => "Uplink/Event/Registration/#",
        MessageClass::Update => "Uplink/Event/Update/#",
        MessageClass::Notification => "Uplink/Event/Notification/#",
    }
}

/// Router pattern selecting the given message classes of an endpoint
///
/// An empty class list selects everything.
pub fn class_pattern(endpoint: &str, classes: &[MessageClass]) -> TopicPattern {
    let mut scopes: Vec<&str> = if classes.is_empty() {
        vec![class_scope(MessageClass::Message)]
    } else {
        classes.iter().map(|class| class_scope(*class)).collect()
    };
    scopes.sort_by_key(|scope| scope.len());
    TopicPattern::scoped(endpoint, &scopes)
}

/// Pattern of the response to request `req_id`, whatever its kind
pub fn response_pattern(endpoint: &str, req_id: ReqId) -> TopicPattern {
    TopicPattern::scoped(endpoint, &[format!("Uplink/Response/+/{}", req_id)])
}

/// Pattern of the notifications of observe `req_id`
pub fn notification_pattern(endpoint: &str, req_id: ReqId) -> TopicPattern {
    TopicPattern::scoped(endpoint, &[format!("Uplink/Event/Notification/{}/#", req_id)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(request: Request) {
        let payload = encode(&request, 42).unwrap();
        let decoded = decode(Direction::Downlink, &request.ep, &payload).unwrap();
        assert_eq!(decoded.req_id, Some(42));
        assert_eq!(decoded.message, Message::Request(request));
    }

    fn json_of(payload: &[u8]) -> Json {
        serde_json::from_slice(payload).unwrap()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Encoding
    // ───────────────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_read() {
        let payload = encode(&Request::read("dev1", "/3/0/0"), 7).unwrap();
        assert_eq!(
            json_of(&payload),
            json!({"reqID": 7, "msgType": "read", "data": {"path": "/3/0/0"}})
        );
    }

    #[test]
    fn test_encode_single_write() {
        let payload = encode(&Request::write("dev1", [("/1/0/1", true)]), 1).unwrap();
        assert_eq!(
            json_of(&payload)["data"],
            json!({"path": "/1/0/1", "type": "Boolean", "value": "true"})
        );
    }

    #[test]
    fn test_encode_batch_write() {
        let request = Request::write(
            "dev1",
            [("/1/0/1", Value::from(60)), ("/1/0/2", Value::from("x"))],
        );
        let data = json_of(&encode(&request, 1).unwrap())["data"].clone();
        assert_eq!(data["basePath"], "/1/0/");
        assert_eq!(
            data["content"],
            json!([
                {"path": "1", "type": "Integer", "value": 60},
                {"path": "2", "type": "String", "value": "x"}
            ])
        );
    }

    #[test]
    fn test_encode_create() {
        let request = Request::create("dev1", [("/123/1/0", 5)]);
        let data = json_of(&encode(&request, 1).unwrap())["data"].clone();
        assert_eq!(data["basePath"], "/123");
        assert_eq!(data["content"][0]["path"], "/1/0");
    }

    #[test]
    fn test_encode_write_attr() {
        let request = Request::write_attr("dev1", "/3/0/9", Attributes::periods(Some(0), Some(60)));
        let data = json_of(&encode(&request, 1).unwrap())["data"].clone();
        assert_eq!(
            data,
            json!({"path": "/3/0/9", "pmin": "0", "pmax": "60", "gt": null, "lt": null, "st": null})
        );
    }

    #[test]
    fn test_encode_failures() {
        let nan = Request::write("dev1", [("/1/0/1", f64::NAN)]);
        assert!(matches!(encode(&nan, 1), Err(CodecError::UnsupportedValue(_))));

        let mixed = Request::write("dev1", [("/1/0/1", 1), ("/2/0/1", 2)]);
        assert!(matches!(encode(&mixed, 1), Err(CodecError::Ungroupable { .. })));

        let empty = Request::write("dev1", Vec::<(Path, Value)>::new());
        assert!(matches!(encode(&empty, 1), Err(CodecError::EmptyContent(_))));
    }

    #[test]
    fn test_request_round_trips() {
        round_trip(Request::discover("dev1", "/3"));
        round_trip(Request::read("dev1", "/3/0/0"));
        round_trip(Request::write("dev1", [("/1/0/1", 60)]));
        round_trip(Request::write("dev1", [("/1/0/1", Value::from(1.5)), ("/1/0/7", Value::from(false))]));
        round_trip(Request::write("dev1", [("1/0/1", "a"), ("1/0/2", "b")]));
        round_trip(Request::write_attr(
            "dev1",
            "/3/0/9",
            Attributes {
                pmin: Some(1),
                pmax: None,
                lt: Some(-2.5),
                st: None,
                gt: Some(10.0),
            },
        ));
        round_trip(Request::execute("dev1", "/3/0/4", "0='x'"));
        round_trip(Request::create("dev1", [("/123/1/0", 5), ("/123/1/1", 6)]));
        round_trip(Request::delete("dev1", "/123/1"));
        round_trip(Request::observe("dev1", "/3/0/13"));
        round_trip(Request::cancel_observe("dev1", "/3/0/13"));
    }

    // ───────────────────────────────────────────────────────────────────────
    // Decoding
    // ───────────────────────────────────────────────────────────────────────

    #[test]
    fn test_decode_read_response() {
        let payload = br#"{"reqID":7,"msgType":"read","data":{"code":"2.05","reqPath":"/1/0/1","content":[{"path":"/1/0/1","value":60}]}}"#;
        let decoded = decode(Direction::Uplink, "dev1", payload).unwrap();
        assert_eq!(decoded.req_id, Some(7));
        let response = decoded.message.into_response().unwrap();
        assert_eq!(response.code, CoapResponseCode::Content);
        assert_eq!(response.req_path, "/1/0/1");
        assert_eq!(response.value().unwrap(), &Value::Integer(60));
    }

    #[test]
    fn test_decode_discover() {
        let payload = br#"{"reqID":3,"msgType":"discover","data":{"code":"2.05","reqPath":"/3","content":["</3>;ver=1.1,</3/0/1>","</3/0/13>;pmin=10;dim"]}}"#;
        let response = decode(Direction::Uplink, "dev1", payload)
            .unwrap()
            .message
            .into_response()
            .unwrap();
        let links = response.links().unwrap();
        assert_eq!(links.len(), 3);
        assert_eq!(links[&Path::new("/3")]["ver"], Value::Float(1.1));
        assert!(links[&Path::new("/3/0/1")].is_empty());
        assert_eq!(links[&Path::new("/3/0/13")]["pmin"], Value::Integer(10));
        assert_eq!(links[&Path::new("/3/0/13")]["dim"], Value::String(String::new()));
    }

    #[test]
    fn test_decode_notification() {
        let payload = br#"{"reqID":9,"msgType":"notify","seqNum":3,"data":{"code":"2.05","reqPath":"/3/0/13","content":[{"path":"/3/0/13","value":1700000000}]}}"#;
        let decoded = decode(Direction::Uplink, "dev1", payload).unwrap();
        let notification = decoded.message.as_notification().unwrap();
        assert_eq!(notification.seq_num, 3);
        assert_eq!(notification.value().unwrap(), &Value::Integer(1_700_000_000));
        assert_eq!(
            router_topic(&decoded.message, decoded.req_id),
            "dev1/Uplink/Event/Notification/9/3//3/0/13"
        );
    }

    #[test]
    fn test_decode_registration() {
        let payload = br#"{"msgType":"register","data":{"ep":"dev1","lt":300,"lwm2m":"1.0","b":"U","alternatePath":"/","objectList":["/1/0","/3/0"]}}"#;
        let decoded = decode(Direction::Uplink, "dev1", payload).unwrap();
        let registration = decoded.message.as_registration().unwrap();
        assert_eq!(registration.lt, 300);
        assert_eq!(registration.b.as_deref(), Some("U"));
        assert_eq!(registration.object_list(), &[Path::new("/1/0"), Path::new("/3/0")]);
        assert_eq!(router_topic(&decoded.message, None), "dev1/Uplink/Event/Registration");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode(Direction::Uplink, "dev1", b"not json"),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            decode(Direction::Uplink, "dev1", br#"{"msgType":"bootstrap","data":{}}"#),
            Err(CodecError::UnknownMsgType { .. })
        ));
        assert!(matches!(
            decode(Direction::Downlink, "dev1", br#"{"msgType":"notify","data":{}}"#),
            Err(CodecError::UnknownMsgType { .. })
        ));
        assert!(decode(
            Direction::Uplink,
            "dev1",
            br#"{"reqID":1,"msgType":"read","data":{"code":"9.99","reqPath":"/1"}}"#
        )
        .is_err());
    }

    // ───────────────────────────────────────────────────────────────────────
    // Topics
    // ───────────────────────────────────────────────────────────────────────

    #[test]
    fn test_router_topics() {
        let request = Message::Request(Request::read("dev1", "/3/0/0"));
        assert_eq!(router_topic(&request, Some(4)), "dev1/Downlink/Request/Read/4");

        let response = Message::Response(Response::new(
            "dev1",
            CoapResponseCode::Changed,
            "/3/0/9",
            ResponseKind::WriteAttr,
        ));
        assert_eq!(router_topic(&response, Some(5)), "dev1/Uplink/Response/WriteAttr/5");
        assert_eq!(
            class_pattern("dev1", &[MessageClass::Response]).as_str(),
            "dev1/Uplink/Response/#"
        );
        assert_eq!(class_pattern("dev1", &[]).as_str(), "dev1/#");
        assert_eq!(response_pattern("dev1", 5).as_str(), "dev1/Uplink/Response/+/5");
    }

    #[test]
    fn test_notification_without_request_id() {
        let payload = br#"{"msgType":"notify","seqNum":7,"data":{"code":"2.05","reqPath":"/3/0/13","content":[{"path":"/3/0/13","value":1}]}}"#;
        let decoded = decode(Direction::Uplink, "dev1", payload).unwrap();
        let topic = router_topic(&decoded.message, decoded.req_id);
        assert_eq!(topic, "dev1/Uplink/Event/Notification/-/7//3/0/13");
        assert!(!notification_pattern("dev1", 7).matches(&topic));
        assert!(class_pattern("dev1", &[MessageClass::Notification]).matches(&topic));
    }
}
