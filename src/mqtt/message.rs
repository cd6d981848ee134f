use chrono::{DateTime, Local};
use std::borrow::Cow;
use std::fmt;

const PREVIEW_CHARS: usize = 60;

/// A raw publish as seen on the broker, before any decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Local>,
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: Local::now(),
        }
    }

    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Full text form with the untruncated payload
    pub fn render(&self) -> String {
        format!("{}: {}\n{}", self.timestamp, self.topic, self.payload_str())
    }
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let payload = self.payload_str();
        let preview: String = payload.chars().take(PREVIEW_CHARS).collect();
        if payload.chars().count() > PREVIEW_CHARS {
            write!(f, "{} {} - {}...", self.timestamp, self.topic, preview)
        } else {
            write!(f, "{} {} - {}", self.timestamp, self.topic, preview)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_is_truncated() {
        let short = MqttMessage::new("lwm2m/dev1/dn", "{}");
        assert!(short.to_string().ends_with("lwm2m/dev1/dn - {}"));

        let long = MqttMessage::new("lwm2m/dev1/dn", "x".repeat(200));
        assert!(long.to_string().ends_with("..."));
        assert!(long.render().contains(&"x".repeat(200)));
    }
}
