pub mod admin;
pub mod home;
pub mod requests;
pub mod reviews;
pub mod sessions;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Every route, with tracing and CORS applied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(home::index))
        .merge(requests::router())
        .merge(sessions::router())
        .merge(reviews::router())
        .merge(admin::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
