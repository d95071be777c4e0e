//! Route handlers.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | `GET` | `/` | `{status, upstream_url}` |
//! | `GET` | `/api/conversations` | conversation summaries |
//! | `POST` | `/api/conversations` | the created summary |
//! | `DELETE` | `/api/conversations/{id}` | `{status, id}` |
//! | `GET` | `/api/conversations/{id}/messages` | messages in append order |
//! | `POST` | `/api/chat/stream` | server-sent events |
//! | `GET` | `/api/models` | `{models}` |

use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chat_relay_core::RelayEvent;
use chat_relay_core::conversation::{ConversationSummary, Message};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::state::AppState;

/// Creates the router with all routes, without middleware.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/conversations/{id}", delete(delete_conversation))
        .route("/conversations/{id}/messages", get(get_messages))
        .route("/chat/stream", post(stream_chat))
        .route("/models", get(list_models));

    Router::new()
        .route("/", get(health_check))
        .nest("/api", api)
        .with_state(state)
}

/// Body of `POST /api/conversations`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversation {
    /// Explicit title. Absent, `null` and empty all mean "derive one".
    #[serde(default)]
    pub title: Option<String>,
}

/// Body of `POST /api/chat/stream`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The conversation to continue.
    pub conversation_id: String,
    /// The user's message.
    pub message: String,
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "Chat API is running",
        "upstream_url": &*state.upstream_url,
    }))
}

async fn list_conversations(
    State(state): State<AppState>,
) -> Json<Vec<ConversationSummary>> {
    Json(state.store().list())
}

async fn create_conversation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ConversationSummary>, ApiError> {
    // The browser client sometimes posts without a body.
    let request: CreateConversation = if body.iter().all(u8::is_ascii_whitespace) {
        CreateConversation::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::BadRequest(err.to_string()))?
    };
    Ok(Json(state.store().create(request.title)))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store().delete(&id)?;
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.store().get(&id)?.messages))
}

async fn stream_chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = request?;
    let exchange = state
        .relay
        .stream_exchange(&request.conversation_id, request.message)
        .await?;

    // Dropping the response body on client disconnect drops the exchange,
    // which cancels it.
    let events = exchange.map(|event| Ok::<_, Infallible>(sse_event(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn sse_event(event: RelayEvent) -> Event {
    let (name, data) = match event {
        RelayEvent::Content(content) => ("message", json!({ "content": content })),
        RelayEvent::Done => ("done", json!({ "status": "completed" })),
        RelayEvent::Error(error) => ("error", json!({ "error": error })),
    };
    Event::default().event(name).data(data.to_string())
}

async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let models = state
        .relay
        .model_client()
        .list_models()
        .await
        .unwrap_or_else(|err| {
            warn!("model list unavailable, returning an empty list: {err}");
            vec![]
        });
    Json(json!({ "models": models }))
}

