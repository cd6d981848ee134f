use crate::config::ConfigError;
use crate::lwm2m::{Message, PathError, Request};
use crate::mqtt::codec::CodecError;
use crate::mqtt::transport::TransportError;

/// Errors surfaced to callers of the engine and endpoint handles
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path segment was missing or not numeric
    #[error(transparent)]
    BadPath(#[from] PathError),

    /// The device answered with a non 2.xx code
    #[error("{0} failed")]
    Response(Box<Message>),

    /// No response arrived within the timeout
    #[error("No response to {0}")]
    NoResponse(Box<Request>),

    /// The message carries no value for the requested path
    #[error("No value: {0}")]
    NoValue(String),

    /// A request could not be translated to a gateway payload
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Maximum number of endpoint subscriptions reached
    #[error("Subscription limit of {limit} endpoints reached")]
    Capacity { limit: usize },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The blocking facade could not start its runtime
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    /// The engine has been shut down
    #[error("Engine is disconnected")]
    Disconnected,
}

impl Error {
    /// True for device side failures, a bad code or no answer at all
    pub fn is_response_error(&self) -> bool {
        matches!(self, Error::Response(_) | Error::NoResponse(_))
    }

    /// The failed response or notification, if any
    pub fn message(&self) -> Option<&Message> {
        match self {
            Error::Response(message) => Some(message),
            _ => None,
        }
    }

    /// The request that went unanswered, if any
    pub fn request(&self) -> Option<&Request> {
        match self {
            Error::NoResponse(request) => Some(request),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
