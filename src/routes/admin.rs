use axum::extract::{Path, State};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::auth::Caller;
use crate::db::models::{Session, SkillRequest, User, REQUEST_COLUMNS, SESSION_COLUMNS, USER_COLUMNS};
use crate::error::{AppError, AppResult};
use crate::extractors::AdminUser;
use crate::state::AppState;

/// Everything an admin can do. Each route maps to exactly one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    DashboardStats,
    ListSessions,
    DeleteSession(String),
    ListRequests,
    ToggleUserBan(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_admins: i64,
    pub total_accounts: i64,
    pub banned_users: i64,
    pub reported_users: i64,
    pub total_skills: i64,
    pub total_requests: i64,
    pub total_sessions: i64,
    pub total_reviews: i64,
    pub pending_notifications: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AdminReply {
    Stats(DashboardStats),
    Sessions(Vec<Session>),
    Requests(Vec<SkillRequest>),
    Deleted { message: String },
    User(User),
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/dashboard-stats", get(dashboard_stats))
        .route("/api/admin/sessions", get(list_sessions))
        .route("/api/admin/sessions/{id}", delete(delete_session))
        .route("/api/admin/skill-requests", get(list_requests))
        .route("/api/admin/users/{id}/toggle-ban", put(toggle_ban))
}

fn run(state: &AppState, admin: &AdminUser, cmd: AdminCommand) -> AppResult<Json<AdminReply>> {
    let conn = state.db.get()?;
    let reply = execute(&conn, &admin.0.caller(), cmd)?;
    Ok(Json(reply))
}

async fn dashboard_stats(State(state): State<AppState>, admin: AdminUser) -> AppResult<Json<AdminReply>> {
    run(&state, &admin, AdminCommand::DashboardStats)
}

async fn list_sessions(State(state): State<AppState>, admin: AdminUser) -> AppResult<Json<AdminReply>> {
    run(&state, &admin, AdminCommand::ListSessions)
}

async fn delete_session(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<AdminReply>> {
    run(&state, &admin, AdminCommand::DeleteSession(id))
}

async fn list_requests(State(state): State<AppState>, admin: AdminUser) -> AppResult<Json<AdminReply>> {
    run(&state, &admin, AdminCommand::ListRequests)
}

async fn toggle_ban(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<AdminReply>> {
    run(&state, &admin, AdminCommand::ToggleUserBan(id))
}

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<i64> {
    conn.query_row(sql, [], |row| row.get(0))
}

/// Run one admin command. The caller is expected to hold the admin role.
pub fn execute(conn: &Connection, admin: &Caller, cmd: AdminCommand) -> AppResult<AdminReply> {
    if !admin.is_admin() {
        return Err(AppError::Forbidden("Admin access required".into()));
    }

    match cmd {
        AdminCommand::DashboardStats => {
            let total_users = count(conn, "SELECT COUNT(*) FROM users WHERE role = 'user'")?;
            let total_admins = count(conn, "SELECT COUNT(*) FROM users WHERE role = 'admin'")?;
            Ok(AdminReply::Stats(DashboardStats {
                total_users,
                total_admins,
                total_accounts: total_users + total_admins,
                banned_users: count(conn, "SELECT COUNT(*) FROM users WHERE is_banned = 1")?,
                reported_users: count(conn, "SELECT COUNT(*) FROM users WHERE is_reported = 1")?,
                total_skills: count(conn, "SELECT COUNT(*) FROM skills")?,
                total_requests: count(conn, "SELECT COUNT(*) FROM skill_requests")?,
                total_sessions: count(conn, "SELECT COUNT(*) FROM sessions")?,
                total_reviews: count(conn, "SELECT COUNT(*) FROM reviews")?,
                pending_notifications: count(
                    conn,
                    "SELECT COUNT(*) FROM outbox WHERE delivered_at IS NULL",
                )?,
            }))
        }
        AdminCommand::ListSessions => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id DESC"
            ))?;
            let sessions = stmt
                .query_map([], Session::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(AdminReply::Sessions(sessions))
        }
        AdminCommand::DeleteSession(id) => {
            let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(AppError::NotFound("Session not found".into()));
            }
            tracing::info!(session_id = %id, admin = %admin.id, "Session deleted by admin");
            Ok(AdminReply::Deleted {
                message: "Session deleted".into(),
            })
        }
        AdminCommand::ListRequests => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM skill_requests ORDER BY created_at DESC, id DESC"
            ))?;
            let requests = stmt
                .query_map([], SkillRequest::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(AdminReply::Requests(requests))
        }
        AdminCommand::ToggleUserBan(id) => {
            if id == admin.id {
                return Err(AppError::BadRequest("You cannot ban yourself".into()));
            }
            let changed = conn.execute(
                "UPDATE users SET is_banned = NOT is_banned WHERE id = ?1",
                params![id],
            )?;
            if changed == 0 {
                return Err(AppError::NotFound("User not found".into()));
            }
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id],
                    User::from_row,
                )
                .optional()?
                .ok_or_else(|| AppError::NotFound("User not found".into()))?;
            tracing::info!(user_id = %user.id, banned = user.is_banned, admin = %admin.id, "User ban toggled");
            Ok(AdminReply::User(user))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::models::Role;
    use crate::state::DbPool;
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup() -> (DbPool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::create_pool(&temp_dir.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        for (id, role) in [("root", "admin"), ("alice", "user"), ("bob", "user")] {
            conn.execute(
                "INSERT INTO users (id, name, email, role, created_at) VALUES (?1, ?1, ?2, ?3, ?4)",
                params![id, format!("{id}@example.com"), role, Utc::now()],
            )
            .unwrap();
        }
        (pool, temp_dir)
    }

    fn admin() -> Caller {
        Caller {
            id: "root".into(),
            role: Role::Admin,
        }
    }

    #[test]
    fn stats_count_accounts_by_role() {
        let (pool, _temp) = setup();
        let conn = pool.get().unwrap();

        let AdminReply::Stats(stats) = execute(&conn, &admin(), AdminCommand::DashboardStats).unwrap() else {
            panic!("expected stats");
        };
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.total_admins, 1);
        assert_eq!(stats.total_accounts, 3);
        assert_eq!(stats.total_sessions, 0);
    }

    #[test]
    fn toggle_ban_flips_flag_both_ways() {
        let (pool, _temp) = setup();
        let conn = pool.get().unwrap();

        let AdminReply::User(user) =
            execute(&conn, &admin(), AdminCommand::ToggleUserBan("alice".into())).unwrap()
        else {
            panic!("expected user");
        };
        assert!(user.is_banned);

        let AdminReply::User(user) =
            execute(&conn, &admin(), AdminCommand::ToggleUserBan("alice".into())).unwrap()
        else {
            panic!("expected user");
        };
        assert!(!user.is_banned);
    }

    #[test]
    fn admin_cannot_ban_themselves() {
        let (pool, _temp) = setup();
        let conn = pool.get().unwrap();
        let result = execute(&conn, &admin(), AdminCommand::ToggleUserBan("root".into()));
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn deleting_missing_session_is_not_found() {
        let (pool, _temp) = setup();
        let conn = pool.get().unwrap();
        let result = execute(&conn, &admin(), AdminCommand::DeleteSession("ghost".into()));
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn non_admin_is_forbidden() {
        let (pool, _temp) = setup();
        let conn = pool.get().unwrap();
        let user = Caller {
            id: "alice".into(),
            role: Role::User,
        };
        let result = execute(&conn, &user, AdminCommand::ListRequests);
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }
}
