//! HTTP request and response descriptors exchanged with a `Transport`.
//!
//! # Design
//! Requests and responses are plain data. The handler lifecycle decorates an
//! `HttpRequest` and inspects an `HttpResponse`, but never touches the network
//! itself; a `Transport` implementation performs the round-trip. Bodies are
//! carried as `serde_json::Value` because that is the shape the handler hooks
//! and the error normalization work with.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EndpointConfig;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// An HTTP request described as plain data.
///
/// Assembled by the endpoint from the decorated per-call config. Headers are
/// already flattened: common headers first, endpoint-specific ones after.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Build the outgoing descriptor. A `null` payload means "no body".
    pub fn from_config(config: &EndpointConfig, url: String, body: Value) -> Self {
        Self {
            method: config.method,
            url,
            headers: config.headers.flatten(),
            query: config.query.clone(),
            timeout: config.timeout_ms.map(Duration::from_millis),
            body: (!body.is_null()).then_some(body),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data.
///
/// `body` is `None` when the server sent nothing. JSON bodies are decoded;
/// anything else is kept as a `Value::String`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
