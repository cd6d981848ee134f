//! # LwM2M Message Model
//!
//! The vocabulary every other module speaks: paths, response codes, resource
//! values, write attributes and the closed set of requests, responses and
//! events exchanged with a device.
//!
//! ```text
//! lwm2m/
//! ├── path.rs        - Path and Level
//! ├── code.rs        - CoapResponseCode
//! ├── value.rs       - Value and string coercion
//! ├── attributes.rs  - Attributes ([pmin,pmax]lt:st:gt)
//! ├── message.rs     - Message, Request, Response, Event
//! └── tracker.rs     - NotificationsTracker
//! ```
//!
//! Nothing in here performs I/O.

pub mod attributes;
pub mod code;
pub mod message;
pub mod path;
pub mod tracker;
pub mod value;

pub use attributes::{Attributes, AttributesError};
pub use code::{CoapResponseCode, CodeClass};
pub use message::{
    Content, Direction, Event, LinkAttributes, Message, MessageClass, Notification, Registration,
    Request, RequestKind, Response, ResponseKind,
};
pub use path::{Level, Path, PathError};
pub use tracker::NotificationsTracker;
pub use value::Value;
