//! # lwm2m-mqtt
//!
//! Client side LwM2M over MQTT. Devices talk CoAP to a gateway that bridges
//! them onto an MQTT broker with JSON payloads; this crate sends typed LwM2M
//! requests through that gateway and correlates the uplink traffic back to
//! whoever is waiting for it.
//!
//! ```text
//! lwm2m/    - Message model: paths, codes, values, requests, responses, events
//! mqtt/     - Broker transport, topic layout and JSON codec
//! router/   - Topic pattern fan-out to independent queues
//! engine/   - Correlation engine, endpoint handles, blocking facade
//! config.rs - TOML configuration
//! error.rs  - Error type shared by the public API
//! ```
//!
//! ```no_run
//! # async fn run() -> lwm2m_mqtt::Result<()> {
//! use lwm2m_mqtt::{Connecting, Engine, EngineConfig};
//!
//! let engine = Engine::<Connecting>::connect(EngineConfig::load(None)?).await?;
//! let device = engine.endpoint("urn:imei:123456789012345", None)?;
//! let response = device.read("/3/0/0").await?;
//! println!("{}", response.value()?);
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod lwm2m;
pub mod mqtt;
pub mod router;

pub use config::EngineConfig;
pub use engine::blocking::{BlockingEndpoint, BlockingEngine, BlockingSubscription};
pub use engine::{Connecting, Disconnected, Draining, Endpoint, Engine, Running};
pub use error::{Error, Result};
pub use lwm2m::{Message, MessageClass, Path, Request, Response, Value};
pub use router::Subscription;
