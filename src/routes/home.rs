use axum::Json;
use serde_json::{json, Value};

pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "skillswap",
        "version": env!("CARGO_PKG_VERSION"),
        "message": "SkillSwap API is running",
    }))
}
