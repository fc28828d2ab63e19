//! The HTTP round-trip behind every endpoint call.
//!
//! # Design
//! `Transport` is the only place that touches the network. The endpoint hands
//! it a fully decorated `HttpRequest` and gets back either an `HttpResponse`
//! (2xx) or a `TransportError`. Non-success statuses are errors that still
//! carry the response, so the handler can classify what the server said.
//!
//! `UreqTransport` runs a blocking `ureq` agent on tokio's blocking pool. Tests
//! substitute an in-memory implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `Transport` backed by `ureq`.
///
/// A request's own timeout takes precedence over the transport default.
#[derive(Debug, Clone, Default)]
pub struct UreqTransport {
    default_timeout: Option<Duration>,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl Transport for UreqTransport {
    async fn invoke(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout.or(self.default_timeout);
        tokio::task::spawn_blocking(move || execute(request, timeout))
            .await
            .map_err(|e| TransportError::network(format!("transport task failed: {e}")))?
    }
}

/// Execute `request` with ureq.
///
/// ureq's own status-as-error behavior is disabled so the response of a
/// failed call can be attached to the `TransportError`.
fn execute(
    request: HttpRequest,
    timeout: Option<Duration>,
) -> Result<HttpResponse, TransportError> {
    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(timeout)
        .build()
        .new_agent();

    let url = request.url.as_str();
    let body = request
        .body
        .as_ref()
        .map(serde_json::to_vec)
        .transpose()
        .map_err(|e| TransportError::network(format!("request body could not be encoded: {e}")))?;

    let result = match request.method {
        HttpMethod::Get => decorate(agent.get(url), &request).call(),
        HttpMethod::Delete => decorate(agent.delete(url), &request).call(),
        HttpMethod::Head => decorate(agent.head(url), &request).call(),
        HttpMethod::Post => send(decorate(agent.post(url), &request), &request, body),
        HttpMethod::Put => send(decorate(agent.put(url), &request), &request, body),
        HttpMethod::Patch => send(decorate(agent.patch(url), &request), &request, body),
    };

    let mut response = result.map_err(transport_error)?;
    let status = response.status();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let bytes = response.body_mut().read_to_vec().map_err(transport_error)?;

    let response = HttpResponse {
        status: status.as_u16(),
        status_text: status_text(status.as_u16(), status.canonical_reason()),
        headers,
        body: decode_body(bytes),
    };

    if response.is_success() {
        Ok(response)
    } else {
        Err(TransportError::status(response))
    }
}

fn decorate<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    for (name, value) in &request.query {
        builder = builder.query(name, value);
    }
    builder
}

fn send(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    request: &HttpRequest,
    body: Option<Vec<u8>>,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Some(body) if request.header("content-type").is_none() => {
            builder.content_type("application/json").send(&body[..])
        }
        Some(body) => builder.send(&body[..]),
        None => builder.send_empty(),
    }
}

fn status_text(status: u16, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => reason.to_string(),
        None => format!("HTTP {status}"),
    }
}

/// JSON bodies are decoded; anything else stays a string, with invalid UTF-8
/// replaced. Empty means none.
fn decode_body(bytes: Vec<u8>) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn transport_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::timeout(err.to_string()),
        other => TransportError::network(other.to_string()),
    }
}
