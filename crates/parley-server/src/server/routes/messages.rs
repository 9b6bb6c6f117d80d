//! Message API Routes
//!
//! - POST /api/messages/addmsg - Store a message without live relay
//! - POST /api/messages/getmsg - Conversation between two users, oldest first
//! - GET /api/messages/pending/:user_id - Messages that missed live delivery

use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parley_relay::{MessageEvent, MessageStore, StoreError, StoredMessage, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Create the messages router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/addmsg", post(add_message_handler))
        .route("/getmsg", post(get_messages_handler))
        .route("/pending/:user_id", get(pending_handler))
        .with_state(state)
}

// === Request/Response Types ===

/// Request body for storing a message
#[derive(Debug, Deserialize)]
pub struct AddMessageRequest {
    pub from: UserId,
    pub to: UserId,
    pub message: String,
}

/// Request body for fetching a conversation
#[derive(Debug, Deserialize)]
pub struct GetMessagesRequest {
    pub from: UserId,
    pub to: UserId,
}

/// One conversation entry, from the requesting user's point of view
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub from_self: bool,
    pub message: String,
}

impl ConversationEntry {
    fn project(viewer: &UserId, message: StoredMessage) -> Self {
        Self {
            from_self: message.sender.as_ref() == Some(viewer),
            message: message.body,
        }
    }
}

// === Handlers ===

/// POST /api/messages/addmsg
#[instrument(skip_all, fields(from = %request.from, to = %request.to))]
async fn add_message_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddMessageRequest>,
) -> Response {
    let event = MessageEvent::new(Some(request.from), request.to, request.message);
    let store = Arc::clone(state.store());

    match with_timeout(&state, store.persist(&event)).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "msg": "Message added successfully." })),
        )
            .into_response(),
        Err(e) => store_error_response(e, "Failed to add message to the database"),
    }
}

/// POST /api/messages/getmsg
#[instrument(skip_all, fields(from = %request.from, to = %request.to))]
async fn get_messages_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GetMessagesRequest>,
) -> Response {
    let store = Arc::clone(state.store());

    match with_timeout(&state, store.fetch_conversation(&request.from, &request.to)).await {
        Ok(messages) => {
            let entries: Vec<ConversationEntry> = messages
                .into_iter()
                .map(|m| ConversationEntry::project(&request.from, m))
                .collect();
            (StatusCode::OK, Json(entries)).into_response()
        }
        Err(e) => store_error_response(e, "Failed to fetch messages"),
    }
}

/// GET /api/messages/pending/:user_id
#[instrument(skip_all, fields(user_id = %user_id))]
async fn pending_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    let Some(user_id) = UserId::new(user_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "msg": "user id must not be blank" })),
        )
            .into_response();
    };
    let store = Arc::clone(state.store());

    match with_timeout(&state, store.fetch_undelivered(&user_id)).await {
        Ok(messages) => (StatusCode::OK, Json(messages)).into_response(),
        Err(e) => store_error_response(e, "Failed to fetch pending messages"),
    }
}

// === Helper Functions ===

async fn with_timeout<T>(
    state: &AppState,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(state.config.store_timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::unavailable(format!(
            "message store timed out after {:?}",
            state.config.store_timeout
        ))),
    }
}

/// Convert a store error to an HTTP response
fn store_error_response(err: StoreError, unavailable_msg: &str) -> Response {
    match err {
        StoreError::InvalidMessage(reason) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "msg": reason })),
        )
            .into_response(),
        StoreError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "msg": format!("Message not found: {}", id) })),
        )
            .into_response(),
        StoreError::Unavailable(reason) => {
            warn!(error = %reason, "Message store unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "msg": unavailable_msg })),
            )
                .into_response()
        }
    }
}
