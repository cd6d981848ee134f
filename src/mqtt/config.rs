use rumqttc::{MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;

/// Broker connection settings, the `[broker]` table of the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// Capacity of the client request channel and the inbound message queue
    pub channel_capacity: usize,
    /// 0, 1 or 2
    pub qos: u8,
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "lwm2m-mqtt".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            channel_capacity: 100,
            qos: 0,
            connect_timeout_secs: 10,
        }
    }
}

impl BrokerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn qos(&self) -> Result<QoS, ConfigError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ConfigError::Invalid(format!(
                "qos {} is not one of 0, 1, 2",
                other
            ))),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.qos()?;
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("broker host is empty".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid("client id is empty".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)))
            .set_clean_session(true);
        if let Some(user) = &self.username {
            options.set_credentials(user.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}
