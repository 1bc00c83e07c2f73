//! Message ingestion and range query endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::messages;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::models::message::{Message, NewMessage};
use crate::AppState;

/// Maximum accepted message length, in characters.
const MAX_CONTENT_CHARS: usize = 128;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", post(post_message))
        .route("/messages/range", get(message_range))
}

// ---------------------------------------------------------------------------
// POST /api/v1/messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct PostMessageRequest {
    pub content: Option<String>,
    #[serde(default)]
    pub sequence_number: i32,
}

#[utoipa::path(
    post,
    path = "/api/v1/messages",
    tag = "Messages",
    request_body = PostMessageRequest,
    responses(
        (status = 201, description = "Message accepted and broadcast", body = Message),
        (status = 400, description = "Invalid message", body = ApiErrorBody),
    ),
)]
pub async fn post_message(
    State(state): State<AppState>,
    Json(body): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let content = validate_content(body.content.as_deref())?;

    let mut conn = state.db.get().await?;

    let message: Message = diesel_async::RunQueryDsl::get_result(
        diesel::insert_into(messages::table)
            .values(NewMessage {
                content,
                created_at: Utc::now(),
                sequence_number: body.sequence_number,
            })
            .returning(Message::as_returning()),
        &mut conn,
    )
    .await?;

    tracing::info!(
        message_id = message.id,
        sequence_number = message.sequence_number,
        "message persisted"
    );

    // Fan out only after the insert has committed. Delivery is best-effort;
    // dropped subscribers are visible in logs, never to the sender.
    let event = message_event_json(&message);
    let attempts = state.broadcaster.broadcast(&event).await;
    tracing::info!(message_id = message.id, attempts, "message broadcast");

    Ok((StatusCode::CREATED, Json(message)))
}

fn validate_content(content: Option<&str>) -> Result<&str, ApiError> {
    match content {
        None | Some("") => Err(ApiError::validation(vec![FieldError {
            field: "content".to_string(),
            message: "Message content is required".to_string(),
        }])),
        Some(c) if c.chars().count() > MAX_CONTENT_CHARS => {
            Err(ApiError::validation(vec![FieldError {
                field: "content".to_string(),
                message: format!("Message content must be {MAX_CONTENT_CHARS} characters or fewer"),
            }]))
        }
        Some(c) => Ok(c),
    }
}

/// Canonical serialized form handed to the broadcast engine: identical bytes
/// go to every subscriber.
#[derive(Debug, Serialize)]
struct MessageEvent<'a> {
    id: i64,
    content: &'a str,
    created_at: String,
    sequence_number: i32,
}

fn message_event_json(message: &Message) -> String {
    serde_json::to_string(&MessageEvent {
        id: message.id,
        content: &message.content,
        created_at: message
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        sequence_number: message.sequence_number,
    })
    .expect("message event serializes")
}

// ---------------------------------------------------------------------------
// GET /api/v1/messages/range
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    /// Start of the range (RFC 3339, UTC, inclusive).
    pub from: DateTime<Utc>,
    /// End of the range (RFC 3339, UTC, inclusive).
    pub to: DateTime<Utc>,
}

#[utoipa::path(
    get,
    path = "/api/v1/messages/range",
    tag = "Messages",
    params(
        ("from" = String, Query, description = "Start of the range (RFC 3339, UTC)"),
        ("to" = String, Query, description = "End of the range (RFC 3339, UTC)"),
    ),
    responses(
        (status = 200, description = "Messages in the range, oldest first", body = Vec<Message>),
        (status = 400, description = "Invalid range", body = ApiErrorBody),
    ),
)]
pub async fn message_range(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<Message>>, ApiError> {
    if params.from > params.to {
        return Err(ApiError::bad_request("`from` must not be after `to`"));
    }

    let mut conn = state.db.get().await?;

    let data: Vec<Message> = diesel_async::RunQueryDsl::load(
        messages::table
            .filter(messages::created_at.between(params.from, params.to))
            .order(messages::created_at.asc())
            .select(Message::as_select()),
        &mut conn,
    )
    .await?;

    tracing::debug!(count = data.len(), "range query served");

    Ok(Json(data))
}
