use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::SkillRequest;
use crate::error::AppResult;
use crate::exchange::{NewRequest, StatusUpdate};
use crate::extractors::{CurrentUser, JsonBody};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/skill-requests", post(create))
        .route("/api/skill-requests/received", get(received))
        .route("/api/skill-requests/sent", get(sent))
        .route("/api/skill-requests/{id}/status", put(update_status))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(body): JsonBody<NewRequest>,
) -> AppResult<(StatusCode, Json<SkillRequest>)> {
    let request = state.exchange.create_request(&user.caller(), body).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn received(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<SkillRequest>>> {
    Ok(Json(state.exchange.list_received(&user.caller()).await?))
}

async fn sent(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<SkillRequest>>> {
    Ok(Json(state.exchange.list_sent(&user.caller()).await?))
}

async fn update_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<StatusBody>,
) -> AppResult<Json<StatusUpdate>> {
    let update = state
        .exchange
        .update_request_status(&user.caller(), &id, &body.status)
        .await?;
    Ok(Json(update))
}
