//! HTTP API
//!
//! REST endpoints for queue control, the PCM stream endpoints fetched by
//! renderers, and a server-sent-events feed of queue events.

pub mod handlers;
pub mod sse;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;

use ensemble_common::Error;

use crate::queue::QueueController;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: QueueController,
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // queue inspection
                .route("/queues", get(handlers::list_queues))
                .route(
                    "/queues/:queue_id",
                    get(handlers::get_queue)
                        .post(handlers::register_player)
                        .delete(handlers::remove_player),
                )
                .route("/queues/:queue_id/items", get(handlers::get_queue_items))
                // queue mutation
                .route("/queues/:queue_id/play_media", post(handlers::play_media))
                .route("/queues/:queue_id/items/:item_id/move", post(handlers::move_item))
                .route("/queues/:queue_id/items/:item_id", delete(handlers::delete_item))
                .route("/queues/:queue_id/clear", post(handlers::clear))
                .route("/queues/:queue_id/shuffle", post(handlers::set_shuffle))
                .route("/queues/:queue_id/repeat", post(handlers::set_repeat))
                .route(
                    "/queues/:queue_id/dont_stop_the_music",
                    post(handlers::set_dont_stop_the_music),
                )
                .route("/queues/:queue_id/transfer", post(handlers::transfer_queue))
                // transport
                .route("/queues/:queue_id/play", post(handlers::play))
                .route("/queues/:queue_id/pause", post(handlers::pause))
                .route("/queues/:queue_id/play_pause", post(handlers::play_pause))
                .route("/queues/:queue_id/stop", post(handlers::stop))
                .route("/queues/:queue_id/next", post(handlers::next))
                .route("/queues/:queue_id/previous", post(handlers::previous))
                .route("/queues/:queue_id/seek", post(handlers::seek))
                .route("/queues/:queue_id/skip", post(handlers::skip))
                .route("/queues/:queue_id/resume", post(handlers::resume))
                .route("/queues/:queue_id/play_index", post(handlers::play_index))
                // player driver callbacks
                .route("/queues/:queue_id/player_update", post(handlers::player_update))
                .route(
                    "/queues/:queue_id/items/:item_id/loaded",
                    post(handlers::track_loaded_in_buffer),
                )
                // events
                .route("/events", get(sse::event_stream)),
        )
        // renderer-facing stream endpoints, outside the api prefix because
        // their urls are handed to third-party devices
        .route("/stream/flow/:queue_id/:item_id", get(handlers::stream_flow))
        .route("/stream/single/:queue_id/:item_id", get(handlers::stream_single))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "ensemble-server",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
    }))
}

/// Maps engine errors onto HTTP responses
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::MediaNotFound(_) => StatusCode::NOT_FOUND,
            Error::PlayerUnavailable(_) => StatusCode::NOT_FOUND,
            Error::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedFeature(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::QueueEmpty(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
