use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub title: String,
    pub owner: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Session {
    pub token: Uuid,
    pub username: String,
}

#[derive(Deserialize)]
pub struct Login {
    pub username: String,
}

#[derive(Deserialize)]
pub struct CreateNote {
    pub title: String,
}

/// Structured error body, in the shape clients normalize field by field.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub level: String,
    pub code: u16,
    #[serde(rename = "metaData", skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<serde_json::Value>,
}

#[derive(Default)]
pub struct Store {
    sessions: HashMap<Uuid, String>,
    notes: HashMap<Uuid, Note>,
    revoked: HashSet<Uuid>,
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route("/session", post(login).delete(logout))
        .route("/me", get(me))
        .route("/notes", post(create_note))
        .route("/notes/{id}", get(get_note).delete(delete_note))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn unauthorized(message: &str) -> Response {
    let body = ErrorBody {
        message: message.to_string(),
        kind: "AuthenticationError".to_string(),
        level: "warning".to_string(),
        code: 401,
        meta_data: None,
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

fn not_found_page() -> Response {
    (
        StatusCode::NOT_FOUND,
        Html("<!doctype html><html><body><h1>404 Not Found</h1></body></html>"),
    )
        .into_response()
}

fn bearer(headers: &HeaderMap) -> Option<Uuid> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ")?.trim().parse().ok()
}

/// Resolve the caller's username from the bearer token, or the 401 response.
async fn authenticate(db: &Db, headers: &HeaderMap) -> Result<String, Response> {
    let Some(token) = bearer(headers) else {
        return Err(unauthorized("missing or malformed bearer token"));
    };
    let store = db.read().await;
    if store.revoked.contains(&token) {
        return Err(unauthorized("session has been revoked"));
    }
    store
        .sessions
        .get(&token)
        .cloned()
        .ok_or_else(|| unauthorized("unknown session"))
}

async fn login(State(db): State<Db>, Json(input): Json<Login>) -> Response {
    if input.username.trim().is_empty() {
        let body = ErrorBody {
            message: "username is required".to_string(),
            kind: "ValidationError".to_string(),
            level: "error".to_string(),
            code: 422,
            meta_data: Some(serde_json::json!({"field": "username"})),
        };
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
    }
    let session = Session {
        token: Uuid::new_v4(),
        username: input.username,
    };
    db.write().await.sessions.insert(session.token, session.username.clone());
    (StatusCode::CREATED, Json(session)).into_response()
}

async fn logout(State(db): State<Db>, headers: HeaderMap) -> Response {
    if let Err(response) = authenticate(&db, &headers).await {
        return response;
    }
    if let Some(token) = bearer(&headers) {
        let mut store = db.write().await;
        store.sessions.remove(&token);
        store.revoked.insert(token);
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn me(State(db): State<Db>, headers: HeaderMap) -> Response {
    match authenticate(&db, &headers).await {
        Ok(username) => Json(serde_json::json!({ "username": username })).into_response(),
        Err(response) => response,
    }
}

async fn create_note(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<CreateNote>,
) -> Response {
    let owner = match authenticate(&db, &headers).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };
    let note = Note {
        id: Uuid::new_v4(),
        title: input.title,
        owner,
    };
    db.write().await.notes.insert(note.id, note.clone());
    (StatusCode::CREATED, Json(note)).into_response()
}

async fn get_note(State(db): State<Db>, Path(id): Path<Uuid>) -> Response {
    match db.read().await.notes.get(&id) {
        Some(note) => Json(note.clone()).into_response(),
        None => not_found_page(),
    }
}

async fn delete_note(State(db): State<Db>, headers: HeaderMap, Path(id): Path<Uuid>) -> Response {
    if let Err(response) = authenticate(&db, &headers).await {
        return response;
    }
    match db.write().await.notes.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found_page(),
    }
}
