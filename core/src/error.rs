//! Error types delivered to callers of an endpoint.
//!
//! # Design
//! Every failure, whatever its origin, reaches the caller as one `ApiError`
//! shape: a message plus an optional name tag, severity level, code and
//! metadata. Structured server payloads (`{"message", "type", "level",
//! "code", "metaData"}`) map onto it field by field. `TransportError` is what
//! a `Transport` reports; it converts into an `ApiError` when no response is
//! available to describe the failure better.

use serde_json::Value;
use thiserror::Error;

use crate::http::HttpResponse;

/// Name tag of errors built from a bare message.
pub const GENERIC_ERROR: &str = "Error";

/// The normalized error returned by `Endpoint::call`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{name}: {message}")]
pub struct ApiError {
    pub name: String,
    pub message: String,
    pub level: Option<String>,
    pub code: Option<Value>,
    pub metadata: Option<Value>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::named(GENERIC_ERROR, message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            level: None,
            code: None,
            metadata: None,
        }
    }

    /// Map a server error payload field by field.
    ///
    /// Missing or non-string `message`/`type` fall back to an empty message
    /// and the generic name.
    pub fn from_payload(data: &Value) -> Self {
        let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        let present = |key: &str| data.get(key).filter(|value| !value.is_null()).cloned();
        Self {
            name: text("type").unwrap_or_else(|| GENERIC_ERROR.to_string()),
            message: text("message").unwrap_or_default(),
            level: text("level"),
            code: present("code"),
            metadata: present("metaData").or_else(|| present("metadata")),
        }
    }

    pub(crate) fn serialization(err: serde_json::Error) -> Self {
        Self::named("SerializationError", err.to_string())
    }

    pub(crate) fn deserialization(err: serde_json::Error) -> Self {
        Self::named("DeserializationError", err.to_string())
    }

    pub(crate) fn unsettled() -> Self {
        Self::named("UnsettledError", "handler finished without settling the call")
    }
}

/// Check whether `error` carries the name tag `name`.
pub fn is_error_type(name: &str, error: &ApiError) -> bool {
    !name.is_empty() && error.name == name
}

/// Kind of failure reported by a `Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection, DNS or I/O failure before a response arrived.
    Network,
    Timeout,
    /// The server answered with a non-success status.
    Status,
}

impl TransportErrorKind {
    fn error_name(&self) -> &'static str {
        match self {
            TransportErrorKind::Network => "NetworkError",
            TransportErrorKind::Timeout => "TimeoutError",
            TransportErrorKind::Status => "HttpError",
        }
    }
}

/// Failure of one transport round-trip.
///
/// `response` holds whatever the server sent when the failure is a
/// non-success status.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub response: Option<HttpResponse>,
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            message: message.into(),
            response: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
            response: None,
        }
    }

    pub fn status(response: HttpResponse) -> Self {
        Self {
            kind: TransportErrorKind::Status,
            message: format!("request failed with status code {}", response.status),
            response: Some(response),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::named(err.kind.error_name(), err.message)
    }
}
