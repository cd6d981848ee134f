//! # MQTT Integration Module
//!
//! Everything that touches the broker or the gateway's wire format. The engine
//! only ever sees typed messages; this module turns them into JSON payloads on
//! gateway topics and back.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Broker connection settings
//! ├── topics.rs        - Gateway topic layout under the mountpoint
//! ├── codec.rs         - JSON payloads and router topics
//! ├── message.rs       - Raw broker message
//! ├── transport.rs     - Transport trait and connection state
//! └── mqtt_handler.rs  - rumqttc backed transport
//! ```
//!
//! ## Topics
//!
//! With the default layout an endpoint `dev1` is commanded on
//! `lwm2m/dev1/dn` and answers on `lwm2m/dev1/up/resp`. Notifications arrive on
//! `lwm2m/dev1/up/notify`. The engine subscribes `lwm2m/dev1/#` once per
//! endpoint, so its own downlinks come back too and show up in wiretaps.

pub mod codec;
pub mod config;
pub mod message;
pub mod mqtt_handler;
pub mod topics;
pub mod transport;

#[cfg(test)]
pub mod mock;

pub use codec::{CodecError, ReqId};
pub use config::BrokerConfig;
pub use message::MqttMessage;
pub use mqtt_handler::MqttHandler;
pub use topics::Topics;
pub use transport::{ConnectionState, Transport, TransportError};
