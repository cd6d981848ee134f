//! Gateway topic layout
//!
//! ```text
//! {mountpoint}/{endpoint}/dn          downlink commands
//! {mountpoint}/{endpoint}/up/resp     responses, registrations, updates
//! {mountpoint}/{endpoint}/up/notify   observe notifications
//! ```
//!
//! Every uplink sub-topic lives below `up/`; the pump relies on that to tell
//! directions apart.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::lwm2m::Direction;

const UPLINK_SEGMENT: &str = "up";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    pub mountpoint: String,
    pub command: String,
    pub response: String,
    pub notify: String,
    pub register: String,
    pub update: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            mountpoint: "lwm2m".to_string(),
            command: "dn".to_string(),
            response: "up/resp".to_string(),
            notify: "up/notify".to_string(),
            register: "up/resp".to_string(),
            update: "up/resp".to_string(),
        }
    }
}

impl Topics {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mountpoint.is_empty() || self.mountpoint.contains(['+', '#']) {
            return Err(ConfigError::Invalid(format!(
                "mountpoint {:?} must be a non-empty topic without wildcards",
                self.mountpoint
            )));
        }
        if self.command.starts_with("up/") || self.command == UPLINK_SEGMENT {
            return Err(ConfigError::Invalid(format!(
                "command topic {:?} is not allowed to start with 'up'",
                self.command
            )));
        }
        for part in [&self.response, &self.notify, &self.register, &self.update] {
            if !part.starts_with("up/") {
                return Err(ConfigError::Invalid(format!(
                    "uplink topic {:?} does not start with 'up/'",
                    part
                )));
            }
        }
        Ok(())
    }

    /// Everything below the mountpoint
    pub fn all(&self) -> String {
        format!("{}/#", self.mountpoint)
    }

    /// Uplink and downlink tree of one endpoint
    pub fn endpoint_tree(&self, endpoint: &str) -> String {
        format!("{}/{}/#", self.mountpoint, endpoint)
    }

    pub fn downlink(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.mountpoint, endpoint, self.command)
    }

    pub fn uplink(&self, endpoint: &str) -> String {
        format!("{}/{}/{}/#", self.mountpoint, endpoint, UPLINK_SEGMENT)
    }

    pub fn response(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.mountpoint, endpoint, self.response)
    }

    pub fn notify(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.mountpoint, endpoint, self.notify)
    }

    pub fn register(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.mountpoint, endpoint, self.register)
    }

    pub fn update(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.mountpoint, endpoint, self.update)
    }

    /// Endpoint name and the remainder of a gateway topic
    fn split<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = topic
            .strip_prefix(self.mountpoint.as_str())?
            .strip_prefix('/')?;
        let (endpoint, tail) = rest.split_once('/')?;
        if endpoint.is_empty() {
            return None;
        }
        Some((endpoint, tail))
    }

    pub fn parse_endpoint<'a>(&self, topic: &'a str) -> Option<&'a str> {
        self.split(topic).map(|(endpoint, _)| endpoint)
    }

    /// Uplink when the segment after the endpoint is `up`
    pub fn direction(&self, topic: &str) -> Option<Direction> {
        let (_, tail) = self.split(topic)?;
        let first = tail.split('/').next().unwrap_or_default();
        if first == UPLINK_SEGMENT {
            Some(Direction::Uplink)
        } else {
            Some(Direction::Downlink)
        }
    }
}
