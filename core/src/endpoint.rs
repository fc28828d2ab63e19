//! Builds typed request functions out of endpoint configs.
//!
//! # Design
//! `EndpointFactory` holds the two injected collaborators (transport and
//! token store). Each `Endpoint` it builds keeps the declared config behind an
//! `Arc` and clones it at the start of every call, so a handler can decorate
//! its copy freely. One call drives one fresh handler through the lifecycle
//! and awaits the handler's one-shot completion.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::EndpointConfig;
use crate::error::ApiError;
use crate::handler::{Completion, DefaultHandler, RequestHandler};
use crate::http::HttpRequest;
use crate::token::{self, TokenStore};
use crate::transport::Transport;

/// Produces endpoints sharing one transport and token store.
#[derive(Clone)]
pub struct EndpointFactory {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
}

impl EndpointFactory {
    pub fn new(transport: impl Transport + 'static, tokens: impl TokenStore + 'static) -> Self {
        Self::from_shared(Arc::new(transport), Arc::new(tokens))
    }

    pub fn from_shared(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenStore>) -> Self {
        Self { transport, tokens }
    }

    pub fn build_endpoint<Req, Resp>(&self, config: EndpointConfig) -> Endpoint<Req, Resp> {
        Endpoint {
            config: Arc::new(config),
            transport: Arc::clone(&self.transport),
            tokens: Arc::clone(&self.tokens),
            _types: PhantomData,
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Remove a stored token, `"token"` unless another key is given.
    pub fn clear_token(&self, key: Option<&str>) {
        token::clear_token(self.tokens.as_ref(), key);
    }
}

impl fmt::Debug for EndpointFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointFactory").finish_non_exhaustive()
    }
}

/// A reusable request function for one endpoint.
pub struct Endpoint<Req, Resp> {
    config: Arc<EndpointConfig>,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Clone for Endpoint<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
            tokens: Arc::clone(&self.tokens),
            _types: PhantomData,
        }
    }
}

impl<Req, Resp> fmt::Debug for Endpoint<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<Req, Resp> Endpoint<Req, Resp> {
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Run one call with an already-encoded payload (`null` for no body).
    pub async fn dispatch(&self, request: Value) -> Result<Value, ApiError> {
        let config = EndpointConfig::clone(&self.config);
        let mut handler: Box<dyn RequestHandler> = match &config.handler {
            Some(factory) => factory(),
            None => Box::new(DefaultHandler::default()),
        };

        let (completion, settled) = Completion::channel();
        handler.init(config, Arc::clone(&self.tokens), completion);

        let config = handler.config().clone();
        handler.set_request(request);
        let body = handler.request();
        let url = if config.resolve_url_parameters {
            handler.resolve_url(&body)
        } else {
            config.url.clone()
        };

        let request = HttpRequest::from_config(&config, url, body);
        tracing::debug!(
            method = request.method.as_str(),
            url = %request.url,
            "dispatching request"
        );

        match self.transport.invoke(request).await {
            Ok(response) => handler.process_server_response(Some(response), true),
            Err(err) => {
                tracing::debug!(kind = ?err.kind, error = %err, "request failed");
                handler.process_server_response(err.response.clone(), false);
                handler.handle_error(err);
            }
        }

        debug_assert!(handler.state().is_settled(), "handler finished without settling");
        drop(handler);
        settled.await.unwrap_or_else(|_| Err(ApiError::unsettled()))
    }
}

impl<Req, Resp> Endpoint<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    pub async fn call(&self, request: Req) -> Result<Resp, ApiError> {
        let payload = serde_json::to_value(&request).map_err(ApiError::serialization)?;
        let value = self.dispatch(payload).await?;
        serde_json::from_value(value).map_err(ApiError::deserialization)
    }
}
