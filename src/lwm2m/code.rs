//! CoAP response codes as reported by the gateway

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Response code carried by every response and notification
///
/// The gateway forwards the CoAP code unmodified as a `"major.minor"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CoapResponseCode {
    Created,
    Deleted,
    Valid,
    Changed,
    Content,
    BadRequest,
    Unauthorized,
    BadOption,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    PreconditionFailed,
    RequestEntityTooLarge,
    UnsupportedContentFormat,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    ProxyingNotSupported,
}

/// Response class derived from the major digit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    Success,
    ClientError,
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown CoAP response code {0:?}")]
pub struct UnknownCode(pub String);

impl CoapResponseCode {
    const ALL: [CoapResponseCode; 21] = [
        CoapResponseCode::Created,
        CoapResponseCode::Deleted,
        CoapResponseCode::Valid,
        CoapResponseCode::Changed,
        CoapResponseCode::Content,
        CoapResponseCode::BadRequest,
        CoapResponseCode::Unauthorized,
        CoapResponseCode::BadOption,
        CoapResponseCode::Forbidden,
        CoapResponseCode::NotFound,
        CoapResponseCode::MethodNotAllowed,
        CoapResponseCode::NotAcceptable,
        CoapResponseCode::PreconditionFailed,
        CoapResponseCode::RequestEntityTooLarge,
        CoapResponseCode::UnsupportedContentFormat,
        CoapResponseCode::InternalServerError,
        CoapResponseCode::NotImplemented,
        CoapResponseCode::BadGateway,
        CoapResponseCode::ServiceUnavailable,
        CoapResponseCode::GatewayTimeout,
        CoapResponseCode::ProxyingNotSupported,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CoapResponseCode::Created => "2.01",
            CoapResponseCode::Deleted => "2.02",
            CoapResponseCode::Valid => "2.03",
            CoapResponseCode::Changed => "2.04",
            CoapResponseCode::Content => "2.05",
            CoapResponseCode::BadRequest => "4.00",
            CoapResponseCode::Unauthorized => "4.01",
            CoapResponseCode::BadOption => "4.02",
            CoapResponseCode::Forbidden => "4.03",
            CoapResponseCode::NotFound => "4.04",
            CoapResponseCode::MethodNotAllowed => "4.05",
            CoapResponseCode::NotAcceptable => "4.06",
            CoapResponseCode::PreconditionFailed => "4.12",
            CoapResponseCode::RequestEntityTooLarge => "4.13",
            CoapResponseCode::UnsupportedContentFormat => "4.15",
            CoapResponseCode::InternalServerError => "5.00",
            CoapResponseCode::NotImplemented => "5.01",
            CoapResponseCode::BadGateway => "5.02",
            CoapResponseCode::ServiceUnavailable => "5.03",
            CoapResponseCode::GatewayTimeout => "5.04",
            CoapResponseCode::ProxyingNotSupported => "5.05",
        }
    }

    pub fn class(&self) -> CodeClass {
        match self.as_str().as_bytes()[0] {
            b'2' => CodeClass::Success,
            b'4' => CodeClass::ClientError,
            _ => CodeClass::ServerError,
        }
    }

    pub fn is_success(&self) -> bool {
        self.class() == CodeClass::Success
    }
}

impl fmt::Display for CoapResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {:?}", self.as_str(), self)
    }
}

impl FromStr for CoapResponseCode {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|code| code.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownCode(s.to_string()))
    }
}

impl TryFrom<String> for CoapResponseCode {
    type Error = UnknownCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CoapResponseCode> for String {
    fn from(value: CoapResponseCode) -> Self {
        value.as_str().to_string()
    }
}
