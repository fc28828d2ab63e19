//! Typed endpoint dispatch over a pluggable HTTP transport.
//!
//! # Overview
//! An application declares each API endpoint once as an `EndpointConfig` and
//! turns it into an `Endpoint<Req, Resp>` through an `EndpointFactory`. Every
//! `Endpoint::call` runs one request/response cycle: attach the bearer token,
//! resolve the URL, invoke the transport, and normalize the outcome into
//! `Result<Resp, ApiError>`, settled exactly once.
//!
//! # Design
//! - The lifecycle lives in `RequestHandler`, a trait whose default methods are
//!   the hook points (`config`, `request`, `resolve_url`, `handle_response`,
//!   `handle_error`, ...). Endpoints opt into custom behavior by naming a
//!   handler factory in their config.
//! - Transport and token store are injected into the factory, so tests run
//!   against in-memory fakes and the core never reaches global state.
//! - Configs are cloned per call; concurrent calls never share header state.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod http;
pub mod token;
pub mod transport;
pub mod url;

pub use config::{EndpointConfig, Headers, UseToken};
pub use endpoint::{Endpoint, EndpointFactory};
pub use error::{is_error_type, ApiError, TransportError, TransportErrorKind};
pub use handler::{
    create_error, Completion, DefaultHandler, ErrorPayload, HandlerFactory, HandlerState, Outcome,
    Phase, RequestHandler, TemplateHandler,
};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use token::{
    clear_token, token_name, FileTokenStore, MemoryTokenStore, TokenStore, DEFAULT_TOKEN_KEY,
};
pub use transport::{Transport, UreqTransport};
