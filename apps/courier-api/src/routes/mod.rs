pub mod health;
pub mod messages;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", messages::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Messages
        messages::post_message,
        messages::message_range,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::message::Message,
            // Route request types
            messages::PostMessageRequest,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Messages", description = "Message ingestion and queries"),
    )
)]
pub struct ApiDoc;
