//! Declarative endpoint configuration.
//!
//! # Design
//! An `EndpointConfig` is declared once by the application and shared by every
//! call of the endpoint built from it. The endpoint clones it at the start of
//! each call, so header injection (e.g. `Authorization`) by one call's handler
//! never leaks into another call. Configs can be declared in code with the
//! `with_*` builders or loaded from JSON; the handler override cannot be
//! expressed in JSON and is skipped by serde.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::handler::{HandlerFactory, RequestHandler};
use crate::http::HttpMethod;

/// Request headers: an endpoint-specific map plus a nested `common` map.
///
/// The auth header is injected into `common`. When both maps hold the same
/// header (case-insensitively), the endpoint-specific value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    #[serde(default)]
    pub common: BTreeMap<String, String>,
    #[serde(flatten)]
    pub entries: BTreeMap<String, String>,
}

impl Headers {
    /// Merge both maps into the list sent on the wire.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = self
            .common
            .iter()
            .filter(|(name, _)| !self.entries.keys().any(|own| own.eq_ignore_ascii_case(name)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        merged.extend(self.entries.iter().map(|(name, value)| (name.clone(), value.clone())));
        merged
    }
}

/// Whether, and under which storage key, a bearer token is attached.
///
/// Accepts either a boolean (`true` reads the `"token"` key) or the key
/// itself as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseToken {
    Flag(bool),
    Key(String),
}

impl UseToken {
    pub fn is_enabled(&self) -> bool {
        match self {
            UseToken::Flag(enabled) => *enabled,
            UseToken::Key(key) => !key.is_empty(),
        }
    }
}

impl Default for UseToken {
    fn default() -> Self {
        UseToken::Flag(false)
    }
}

impl From<bool> for UseToken {
    fn from(enabled: bool) -> Self {
        UseToken::Flag(enabled)
    }
}

impl From<&str> for UseToken {
    fn from(key: &str) -> Self {
        UseToken::Key(key.to_string())
    }
}

impl From<String> for UseToken {
    fn from(key: String) -> Self {
        UseToken::Key(key)
    }
}

/// Static description of one API endpoint.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub use_token: UseToken,
    /// Produces the handler driving each call; `DefaultHandler` when unset.
    #[serde(skip)]
    pub handler: Option<HandlerFactory>,
    /// Let the handler compute the final URL from the request payload.
    #[serde(default)]
    pub resolve_url_parameters: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl EndpointConfig {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load a declaration such as
    /// `{"method":"POST","url":"/notes","useToken":true}`.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entries.insert(name.into(), value.into());
        self
    }

    pub fn with_common_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.common.insert(name.into(), value.into());
        self
    }

    pub fn with_token(mut self, use_token: impl Into<UseToken>) -> Self {
        self.use_token = use_token.into();
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_url_parameters(mut self, enabled: bool) -> Self {
        self.resolve_url_parameters = enabled;
        self
    }

    /// Drive calls through a custom handler instead of `DefaultHandler`.
    pub fn with_handler<H, F>(mut self, factory: F) -> Self
    where
        H: RequestHandler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(move || Box::new(factory()) as Box<dyn RequestHandler>));
        self
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("use_token", &self.use_token)
            .field("handler", &self.handler.as_ref().map(|_| "custom"))
            .field("resolve_url_parameters", &self.resolve_url_parameters)
            .field("query", &self.query)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
