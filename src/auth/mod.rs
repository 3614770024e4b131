// Identity gate. Tokens are issued elsewhere; this module only verifies them.
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{Role, User, USER_COLUMNS};
use crate::error::{AppError, AppResult};

/// The verified identity performing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            role: user.role,
        }
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve a bearer token to its user.
///
/// Unknown and expired tokens are `Unauthorized`; a banned user is `Forbidden`.
pub fn verify_bearer(conn: &Connection, token: &str, now: DateTime<Utc>) -> AppResult<User> {
    let found: Option<(Option<DateTime<Utc>>, String)> = conn
        .query_row(
            "SELECT expires_at, user_id FROM api_tokens WHERE token = ?1",
            params![token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (expires_at, user_id) = found.ok_or(AppError::Unauthorized)?;
    if expires_at.is_some_and(|at| at <= now) {
        tracing::debug!(user_id = %user_id, "Rejected expired token");
        return Err(AppError::Unauthorized);
    }

    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![user_id],
            User::from_row,
        )
        .optional()?
        .ok_or(AppError::Unauthorized)?;

    if user.is_banned {
        tracing::info!(user_id = %user.id, "Rejected banned user");
        return Err(AppError::Forbidden("Your account has been banned".into()));
    }

    Ok(user)
}
