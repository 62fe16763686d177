//! Thin edge handlers (C8/C10): stream-redirect routes and health check.
//! Re-export route/response shaping beyond these deterministic projections
//! is out of scope.

use crate::model::ContentType;
use crate::resolver::StreamResolver;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect},
};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<StreamResolver>,
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn redirect_to_source(
    state: &AppState,
    title_id: &str,
    content_type: ContentType,
    season: Option<u32>,
    episode: Option<u32>,
) -> axum::response::Response {
    match state
        .resolver
        .get_best_source(title_id, content_type, season, episode)
        .await
    {
        Ok(Some(url)) => Redirect::temporary(&url).into_response(),
        Ok(None) => crate::error::AppError::service_unavailable(format!("no live source for {title_id}")).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /api/stream/movies/:title_id` (§6.2).
pub async fn stream_movie(State(state): State<AppState>, Path(title_id): Path<String>) -> impl IntoResponse {
    redirect_to_source(&state, &title_id, ContentType::Movies, None, None).await
}

/// `GET /api/stream/tvshows/:title_id/:season/:episode` (§6.2).
pub async fn stream_episode(
    State(state): State<AppState>,
    Path((title_id, season, episode)): Path<(String, u32, u32)>,
) -> impl IntoResponse {
    redirect_to_source(&state, &title_id, ContentType::Tvshows, Some(season), Some(episode)).await
}
