use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use crate::db::models::Review;
use crate::error::AppResult;
use crate::exchange::NewReview;
use crate::extractors::{CurrentUser, JsonBody};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/reviews", post(create))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(body): JsonBody<NewReview>,
) -> AppResult<(StatusCode, Json<Review>)> {
    let review = state.exchange.create_review(&user.caller(), body).await?;
    Ok((StatusCode::CREATED, Json(review)))
}
