use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};

use crate::db::models::Session;
use crate::error::AppResult;
use crate::exchange::{NewSession, SessionPatch};
use crate::extractors::{CurrentUser, JsonBody};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", get(list).post(create))
        .route("/api/sessions/{id}", put(update))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(body): JsonBody<NewSession>,
) -> AppResult<(StatusCode, Json<Session>)> {
    let session = state.exchange.create_session(&user.caller(), body).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<Session>>> {
    Ok(Json(state.exchange.list_sessions(&user.caller()).await?))
}

async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<SessionPatch>,
) -> AppResult<Json<Session>> {
    let session = state
        .exchange
        .update_session(&user.caller(), &id, patch)
        .await?;
    Ok(Json(session))
}
