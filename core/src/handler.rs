//! Per-call request/response handler.
//!
//! # Design
//! A handler owns everything one call needs: its private copy of the endpoint
//! config, the outgoing payload, the raw response once the transport is done,
//! and the one-shot completion the caller is waiting on. `RequestHandler`
//! supplies the lifecycle as default methods; an endpoint customizes it by
//! implementing the trait on its own type (embedding a `HandlerState`) and
//! overriding only the hooks it needs.
//!
//! Lifecycle: `Uninitialized → Initialized → RequestSet → Settled`. The first
//! `resolve`/`reject` moves the handler to `Settled`; later attempts are
//! logged and dropped, so the caller sees exactly one outcome.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::config::EndpointConfig;
use crate::error::{ApiError, TransportError};
use crate::http::HttpResponse;
use crate::token::{token_name, TokenStore};
use crate::url::substitute_path_params;

pub const AUTHORIZATION: &str = "Authorization";

/// Final value of one call before it is decoded into the response type.
pub type Outcome = Result<Value, ApiError>;

/// Produces a fresh handler for each call of an endpoint.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn RequestHandler> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Uninitialized,
    Initialized,
    RequestSet,
    Settled,
}

/// Sending half of a call's one-shot result.
#[derive(Debug)]
pub struct Completion {
    sender: Option<oneshot::Sender<Outcome>>,
}

impl Completion {
    pub fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender: Some(sender) }, receiver)
    }

    pub fn is_settled(&self) -> bool {
        self.sender.is_none()
    }

    fn settle(&mut self, outcome: Outcome) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // The receiver is gone only if the caller dropped the call future.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Input to error normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    /// Already a normalized error; passed through unchanged.
    Error(ApiError),
    /// Server-provided description to map field by field.
    Data(Value),
}

/// State carried across one request/response cycle.
#[derive(Default)]
pub struct HandlerState {
    phase: Phase,
    config: EndpointConfig,
    request: Value,
    server_response: Option<HttpResponse>,
    tokens: Option<Arc<dyn TokenStore>>,
    completion: Option<Completion>,
}

impl HandlerState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EndpointConfig {
        &mut self.config
    }

    pub fn request(&self) -> &Value {
        &self.request
    }

    pub fn server_response(&self) -> Option<&HttpResponse> {
        self.server_response.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        self.phase == Phase::Settled
    }

    pub fn resolve(&mut self, value: Value) {
        self.settle(Ok(value));
    }

    pub fn reject(&mut self, error: ApiError) {
        self.settle(Err(error));
    }

    fn settle(&mut self, outcome: Outcome) {
        if self.phase == Phase::Settled {
            tracing::warn!(url = %self.config.url, "ignoring second settlement of a call");
            return;
        }
        debug_assert_ne!(self.phase, Phase::Uninitialized, "handler settled before init");
        let delivered = self
            .completion
            .as_mut()
            .is_some_and(|completion| completion.settle(outcome));
        if !delivered {
            tracing::warn!(url = %self.config.url, "handler has no completion to settle");
        }
        self.phase = Phase::Settled;
    }
}

/// Hook points of the request/response lifecycle.
///
/// Implementors only provide access to their `HandlerState`; every other
/// method has a default and may be overridden.
pub trait RequestHandler: Send {
    fn state(&self) -> &HandlerState;
    fn state_mut(&mut self) -> &mut HandlerState;

    /// Take ownership of the per-call config and completion. When the config
    /// asks for a token, `Authorization: Bearer <token>` is added to the
    /// common headers.
    fn init(
        &mut self,
        mut config: EndpointConfig,
        tokens: Arc<dyn TokenStore>,
        completion: Completion,
    ) {
        debug_assert_eq!(self.state().phase, Phase::Uninitialized, "handler initialized twice");
        self.state_mut().tokens = Some(tokens);

        if config.use_token.is_enabled() {
            let token = self.get_token(&token_name(&config));
            config
                .headers
                .common
                .insert(AUTHORIZATION.to_string(), format!("Bearer {token}"));
        }

        let state = self.state_mut();
        state.config = config;
        state.completion = Some(completion);
        state.phase = Phase::Initialized;
    }

    /// The per-call config; override to decorate it before the transport call.
    fn config(&mut self) -> &mut EndpointConfig {
        &mut self.state_mut().config
    }

    fn set_request(&mut self, request: Value) {
        let state = self.state_mut();
        state.request = request;
        if state.phase == Phase::Initialized {
            state.phase = Phase::RequestSet;
        }
    }

    /// The payload sent on the wire; override to transform it.
    fn request(&self) -> Value {
        self.state().request.clone()
    }

    /// Final URL when `resolve_url_parameters` is enabled.
    fn resolve_url(&self, _request: &Value) -> String {
        self.state().config.url.clone()
    }

    /// MIME type of the recorded response, without parameters.
    fn content_type(&self) -> Option<String> {
        let response = self.state().server_response.as_ref();
        debug_assert!(response.is_some(), "content type read before a response was recorded");
        let raw = response?.header("content-type")?;
        raw.split(';')
            .next()
            .map(|mime| mime.trim().to_ascii_lowercase())
            .filter(|mime| !mime.is_empty())
    }

    /// Pick what describes a failed call best: an HTML error page is reduced
    /// to its status text, any other response body is used as is, and without
    /// a response the transport error itself is reported.
    fn error_payload(&self, error: TransportError) -> ErrorPayload {
        let Some(response) = self.state().server_response.as_ref() else {
            return ErrorPayload::Error(error.into());
        };
        match (self.content_type().as_deref(), &response.body) {
            (Some("text/html"), _) | (_, None) => {
                ErrorPayload::Error(ApiError::new(response.status_text.clone()))
            }
            (_, Some(body)) => ErrorPayload::Data(body.clone()),
        }
    }

    fn create_error(&self, payload: ErrorPayload) -> ApiError {
        create_error(payload)
    }

    fn handle_error(&mut self, error: TransportError) {
        let payload = self.error_payload(error);
        let error = self.create_error(payload);
        self.state_mut().reject(error);
    }

    fn handle_response(&mut self, result: Value) {
        self.state_mut().resolve(result);
    }

    /// Record the response. With `call_handler` the call resolves with the
    /// body (an empty object when there is none); otherwise the response is
    /// only kept for `handle_error` to inspect.
    fn process_server_response(&mut self, response: Option<HttpResponse>, call_handler: bool) {
        let body = response.as_ref().and_then(|response| response.body.clone());
        self.state_mut().server_response = response;
        if call_handler {
            self.handle_response(body_or_empty(body));
        }
    }

    fn get_token(&self, key: &str) -> String {
        self.state()
            .tokens
            .as_ref()
            .and_then(|tokens| tokens.get(key))
            .unwrap_or_default()
    }
}

/// Normalize an error payload into an `ApiError`.
pub fn create_error(payload: ErrorPayload) -> ApiError {
    match payload {
        ErrorPayload::Error(error) => error,
        ErrorPayload::Data(data) => ApiError::from_payload(&data),
    }
}

fn body_or_empty(body: Option<Value>) -> Value {
    match body {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::String(s)) if s.is_empty() => Value::Object(Map::new()),
        Some(body) => body,
    }
}

/// Handler used when an endpoint does not supply its own.
#[derive(Default)]
pub struct DefaultHandler {
    state: HandlerState,
}

impl RequestHandler for DefaultHandler {
    fn state(&self) -> &HandlerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut HandlerState {
        &mut self.state
    }
}

/// Handler that fills `{name}` / `:name` URL segments from the request
/// object. Only consulted when the endpoint enables `resolve_url_parameters`.
#[derive(Default)]
pub struct TemplateHandler {
    state: HandlerState,
}

impl RequestHandler for TemplateHandler {
    fn state(&self) -> &HandlerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut HandlerState {
        &mut self.state
    }

    fn resolve_url(&self, request: &Value) -> String {
        substitute_path_params(&self.state.config.url, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::token::MemoryTokenStore;
    use serde_json::json;

    fn store_with(entries: &[(&str, &str)]) -> Arc<MemoryTokenStore> {
        let store = MemoryTokenStore::new();
        for (key, value) in entries {
            store.set(key, value);
        }
        Arc::new(store)
    }

    fn initialized<H: RequestHandler + Default>(
        config: EndpointConfig,
        tokens: Arc<MemoryTokenStore>,
    ) -> (H, oneshot::Receiver<Outcome>) {
        let (completion, receiver) = Completion::channel();
        let mut handler = H::default();
        handler.init(config, tokens, completion);
        (handler, receiver)
    }

    /// Initialized handler on a public endpoint with an empty token store.
    fn fresh<H: RequestHandler + Default>() -> (H, oneshot::Receiver<Outcome>) {
        initialized(endpoint(false), store_with(&[]))
    }

    fn response(
        status: u16,
        status_text: &str,
        content_type: Option<&str>,
        body: Option<Value>,
    ) -> HttpResponse {
        HttpResponse {
            status,
            status_text: status_text.to_string(),
            headers: content_type
                .map(|ct| vec![("Content-Type".to_string(), ct.to_string())])
                .unwrap_or_default(),
            body,
        }
    }

    fn endpoint(use_token: impl Into<crate::config::UseToken>) -> EndpointConfig {
        EndpointConfig::new(HttpMethod::Get, "http://localhost/me").with_token(use_token)
    }

    fn authorization(handler: &mut impl RequestHandler) -> Option<String> {
        handler.config().headers.common.get(AUTHORIZATION).cloned()
    }

    #[test]
    fn init_injects_default_token() {
        let (mut handler, _rx) =
            initialized::<DefaultHandler>(endpoint(true), store_with(&[("token", "abc")]));
        assert_eq!(handler.state().phase(), Phase::Initialized);
        assert_eq!(authorization(&mut handler).as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn init_reads_custom_token_key() {
        let store = store_with(&[("token", "abc"), ("admin", "root")]);
        let (mut handler, _rx) = initialized::<DefaultHandler>(endpoint("admin"), store);
        assert_eq!(authorization(&mut handler).as_deref(), Some("Bearer root"));
    }

    #[test]
    fn init_without_token_leaves_headers_alone() {
        let (mut handler, _rx) =
            initialized::<DefaultHandler>(endpoint(false), store_with(&[("token", "abc")]));
        assert!(handler.config().headers.common.is_empty());
    }

    #[test]
    fn missing_token_still_sends_bearer_scheme() {
        let (mut handler, _rx) = initialized::<DefaultHandler>(endpoint(true), store_with(&[]));
        assert_eq!(authorization(&mut handler).as_deref(), Some("Bearer "));
        assert_eq!(handler.get_token("token"), "");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "handler initialized twice")]
    fn second_init_is_rejected() {
        let (mut handler, _rx) = fresh::<DefaultHandler>();
        let (completion, _again) = Completion::channel();
        handler.init(endpoint(false), store_with(&[]), completion);
    }

    #[test]
    fn set_request_advances_phase() {
        let (mut handler, _rx) = fresh::<DefaultHandler>();
        handler.set_request(json!({"title": "milk"}));
        assert_eq!(handler.state().phase(), Phase::RequestSet);
        assert_eq!(handler.request(), json!({"title": "milk"}));
    }

    #[test]
    fn success_resolves_with_body() {
        let (mut handler, mut rx) = fresh::<DefaultHandler>();
        handler.set_request(Value::Null);
        let ok = response(200, "OK", Some("application/json"), Some(json!({"id": 1})));
        handler.process_server_response(Some(ok), true);
        assert!(handler.state().is_settled());
        assert_eq!(rx.try_recv().unwrap(), Ok(json!({"id": 1})));
    }

    #[test]
    fn missing_body_resolves_with_empty_object() {
        let (mut handler, mut rx) = fresh::<DefaultHandler>();
        handler.process_server_response(Some(response(204, "No Content", None, None)), true);
        assert_eq!(rx.try_recv().unwrap(), Ok(json!({})));
    }

    #[test]
    fn empty_string_body_resolves_with_empty_object() {
        let (mut handler, mut rx) = fresh::<DefaultHandler>();
        let ok = response(200, "OK", Some("text/plain"), Some(json!("")));
        handler.process_server_response(Some(ok), true);
        assert_eq!(rx.try_recv().unwrap(), Ok(json!({})));
    }

    #[test]
    fn recording_without_handler_does_not_settle() {
        let (mut handler, mut rx) = fresh::<DefaultHandler>();
        let failed = response(500, "Internal Server Error", None, None);
        handler.process_server_response(Some(failed), false);
        assert!(!handler.state().is_settled());
        assert!(handler.state().server_response().is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn settles_at_most_once() {
        let (mut handler, mut rx) = fresh::<DefaultHandler>();
        let first = response(200, "OK", None, Some(json!({"ok": true})));
        let second = response(200, "OK", None, Some(json!({"ok": false})));
        handler.process_server_response(Some(first), true);
        handler.handle_error(TransportError::network("late failure"));
        handler.process_server_response(Some(second), true);

        assert_eq!(rx.try_recv().unwrap(), Ok(json!({"ok": true})));
        assert_eq!(handler.state().phase(), Phase::Settled);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "handler settled before init")]
    fn settling_before_init_is_rejected() {
        HandlerState::default().resolve(json!({}));
    }

    #[test]
    fn content_type_strips_parameters() {
        let (mut handler, _rx) = fresh::<DefaultHandler>();
        let page = response(404, "Not Found", Some("Text/HTML; charset=utf-8"), None);
        handler.process_server_response(Some(page), false);
        assert_eq!(handler.content_type().as_deref(), Some("text/html"));
    }

    #[test]
    fn content_type_absent_header() {
        let (mut handler, _rx) = fresh::<DefaultHandler>();
        let failed = response(500, "Internal Server Error", None, None);
        handler.process_server_response(Some(failed), false);
        assert!(handler.content_type().is_none());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "content type read before a response was recorded")]
    fn content_type_before_response_is_rejected() {
        let (handler, _rx) = fresh::<DefaultHandler>();
        let _ = handler.content_type();
    }

    #[test]
    fn html_response_reduces_to_status_text() {
        let (mut handler, _rx) = fresh::<DefaultHandler>();
        let page = json!("<html><body>missing</body></html>");
        handler.process_server_response(
            Some(response(404, "Not Found", Some("text/html; charset=utf-8"), Some(page))),
            false,
        );
        let payload = handler.error_payload(TransportError::network("ignored"));
        assert_eq!(payload, ErrorPayload::Error(ApiError::new("Not Found")));
    }

    #[test]
    fn json_response_body_is_payload() {
        let (mut handler, _rx) = fresh::<DefaultHandler>();
        let body = json!({"message": "x"});
        handler.process_server_response(
            Some(response(422, "Unprocessable Entity", Some("application/json"), Some(body))),
            false,
        );
        let payload = handler.error_payload(TransportError::network("ignored"));
        assert_eq!(payload, ErrorPayload::Data(json!({"message": "x"})));
    }

    #[test]
    fn missing_response_uses_transport_error() {
        let (handler, _rx) = fresh::<DefaultHandler>();
        let payload = handler.error_payload(TransportError::timeout("timed out"));
        assert_eq!(payload, ErrorPayload::Error(ApiError::named("TimeoutError", "timed out")));
    }

    #[test]
    fn create_error_passes_existing_error_through() {
        let mut original = ApiError::named("QuotaError", "limit reached");
        original.level = Some("fatal".to_string());
        original.code = Some(json!("Q-1"));
        assert_eq!(create_error(ErrorPayload::Error(original.clone())), original);
    }

    #[test]
    fn create_error_maps_payload_fields() {
        let payload = json!({"message": "bad", "type": "ValidationError", "code": 42});
        let error = create_error(ErrorPayload::Data(payload));
        assert_eq!(error.message, "bad");
        assert_eq!(error.name, "ValidationError");
        assert_eq!(error.code, Some(json!(42)));
    }

    #[test]
    fn handle_error_rejects_with_structured_error() {
        let (mut handler, mut rx) = fresh::<DefaultHandler>();
        let body = json!({
            "message": "expired",
            "type": "AuthenticationError",
            "level": "warning",
            "code": 401
        });
        let failed = response(401, "Unauthorized", Some("application/json"), Some(body));
        handler.process_server_response(Some(failed.clone()), false);
        handler.handle_error(TransportError::status(failed));

        let error = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(error.name, "AuthenticationError");
        assert_eq!(error.level.as_deref(), Some("warning"));
        assert_eq!(error.code, Some(json!(401)));
    }

    #[test]
    fn template_handler_fills_path_parameters() {
        let config = EndpointConfig::new(HttpMethod::Get, "http://localhost/notes/{id}");
        let (handler, _rx) = initialized::<TemplateHandler>(config, store_with(&[]));
        assert_eq!(handler.resolve_url(&json!({"id": 9})), "http://localhost/notes/9");
    }

    #[test]
    fn default_handler_keeps_configured_url() {
        let config = EndpointConfig::new(HttpMethod::Get, "http://localhost/notes/{id}");
        let (handler, _rx) = initialized::<DefaultHandler>(config, store_with(&[]));
        assert_eq!(handler.resolve_url(&json!({"id": 9})), "http://localhost/notes/{id}");
    }

    #[derive(Default)]
    struct EnvelopeHandler {
        state: HandlerState,
    }

    impl RequestHandler for EnvelopeHandler {
        fn state(&self) -> &HandlerState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut HandlerState {
            &mut self.state
        }

        fn handle_response(&mut self, result: Value) {
            match result.get("data").cloned() {
                Some(data) => self.state.resolve(data),
                None => self
                    .state
                    .reject(ApiError::named("EnvelopeError", "response has no data field")),
            }
        }
    }

    #[test]
    fn overridden_response_hook_unwraps_envelope() {
        let (mut handler, mut rx) = fresh::<EnvelopeHandler>();
        let ok = response(200, "OK", None, Some(json!({"data": [1, 2]})));
        handler.process_server_response(Some(ok), true);
        assert_eq!(rx.try_recv().unwrap(), Ok(json!([1, 2])));
    }

    #[test]
    fn overridden_response_hook_can_reject() {
        let (mut handler, mut rx) = fresh::<EnvelopeHandler>();
        let ok = response(200, "OK", None, Some(json!({"items": []})));
        handler.process_server_response(Some(ok), true);
        let error = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(error.name, "EnvelopeError");
    }
}
