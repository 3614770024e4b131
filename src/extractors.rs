use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header;
use axum::http::request::Parts;
use axum::Json;
use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::auth::{bearer_token, verify_bearer, Caller};
use crate::db::models::Role;
use crate::error::AppError;
use crate::state::AppState;

/// The authenticated user behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn caller(&self) -> Caller {
        Caller {
            id: self.id.clone(),
            role: self.role,
        }
    }
}

/// Extractor that requires authentication.
/// Returns 401 for a missing, unknown or expired token and 403 for a banned user.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token)
            .ok_or(AppError::Unauthorized)?;

        let conn = state.db.get()?;
        let user = verify_bearer(&conn, token, Utc::now())?;

        Ok(CurrentUser {
            id: user.id,
            role: user.role,
        })
    }
}

/// Extractor that additionally requires the admin role.
pub struct AdminUser(pub CurrentUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            tracing::info!(user_id = %user.id, uri = %parts.uri, "Non-admin denied");
            return Err(AppError::Forbidden("Admin access required".into()));
        }
        Ok(AdminUser(user))
    }
}

/// JSON body extractor whose rejections come back as `{"message"}` 400s.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}
