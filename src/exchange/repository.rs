// Repository pattern - isolates all database side effects
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::Arc;
use thiserror::Error;

use crate::db::models::{
    Review, Session, SessionStatus, Skill, SkillRequest, REQUEST_COLUMNS, REVIEW_COLUMNS,
    SESSION_COLUMNS, SKILL_COLUMNS,
};
use crate::exchange::domain::{Party, RequestStatus};
use crate::notify::DomainEvent;
use crate::retry::Retryable;
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),
}

impl Retryable for RepositoryError {
    /// Pool timeouts and lock contention may clear up; everything else will not.
    fn is_transient(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Sql(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// A status change checked against the status it was decided from.
#[derive(Debug, Clone)]
pub struct RequestTransition {
    pub request_id: String,
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub at: DateTime<Utc>,
    /// Created in the same transaction when the request is accepted.
    pub session: Option<Session>,
}

/// Columns a participant may change on a session. `None` leaves the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionChanges {
    pub scheduled_time: Option<DateTime<FixedOffset>>,
    pub status: Option<SessionStatus>,
    pub meet_link: Option<String>,
    pub comment: Option<String>,
}

/// Repository trait - all exchange persistence
#[async_trait]
pub trait ExchangeRepository: Send + Sync {
    async fn find_skill(&self, id: &str) -> Result<Option<Skill>, RepositoryError>;

    async fn find_request(&self, id: &str) -> Result<Option<SkillRequest>, RepositoryError>;

    async fn find_session(&self, id: &str) -> Result<Option<Session>, RepositoryError>;

    async fn find_session_for_request(
        &self,
        request_id: &str,
    ) -> Result<Option<Session>, RepositoryError>;

    async fn find_review(
        &self,
        reviewer_id: &str,
        session_id: &str,
    ) -> Result<Option<Review>, RepositoryError>;

    /// Requests where `user_id` is on the given side, newest first.
    async fn requests_for(
        &self,
        user_id: &str,
        party: Party,
    ) -> Result<Vec<SkillRequest>, RepositoryError>;

    /// Sessions `user_id` takes part in, newest first.
    async fn sessions_for(&self, user_id: &str) -> Result<Vec<Session>, RepositoryError>;

    /// Insert a new request together with its outbox messages.
    async fn insert_request(
        &self,
        request: &SkillRequest,
        events: &[DomainEvent],
    ) -> Result<(), RepositoryError>;

    /// Atomically apply a status change, the accepted-request session, and the
    /// outbox messages. Fails with `Conflict` if the stored status is no longer
    /// `transition.from` or a session already exists for the request.
    async fn apply_transition(
        &self,
        transition: &RequestTransition,
        events: &[DomainEvent],
    ) -> Result<(), RepositoryError>;

    /// Insert a session, failing with `Conflict` if its request already has one.
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Write only the present `changes` in one transaction and return the
    /// session as stored afterwards.
    async fn patch_session(
        &self,
        id: &str,
        changes: &SessionChanges,
        at: DateTime<Utc>,
    ) -> Result<Session, RepositoryError>;

    /// Insert a review, failing with `Conflict` if the reviewer already reviewed the session.
    async fn insert_review(&self, review: &Review) -> Result<(), RepositoryError>;
}

/// SQLite implementation
pub struct SqliteExchangeRepository {
    pool: DbPool,
}

impl SqliteExchangeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn ensure_no_session(tx: &Transaction<'_>, request_id: &str) -> Result<(), RepositoryError> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM sessions WHERE request_id = ?1",
            params![request_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(_) => Err(RepositoryError::Conflict(
            "Session already exists for this request".into(),
        )),
        None => Ok(()),
    }
}

fn insert_session_row(tx: &Transaction<'_>, session: &Session) -> Result<(), RepositoryError> {
    tx.execute(
        &format!(
            "INSERT INTO sessions ({SESSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            session.id,
            session.skill_id,
            session.requester_id,
            session.owner_id,
            session.scheduled_time,
            session.meet_link,
            session.comment,
            session.status.as_str(),
            session.request_id,
            session.created_at,
            session.updated_at,
        ],
    )?;
    Ok(())
}

fn insert_outbox(
    tx: &Transaction<'_>,
    events: &[DomainEvent],
    at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    for event in events {
        let payload = serde_json::to_string(event)?;
        for message in event.messages() {
            tx.execute(
                "INSERT INTO outbox (id, event_kind, recipient_id, subject, body, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    uuid::Uuid::now_v7().to_string(),
                    event.kind(),
                    message.recipient_id,
                    message.subject,
                    message.body,
                    payload,
                    at,
                ],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl ExchangeRepository for SqliteExchangeRepository {
    async fn find_skill(&self, id: &str) -> Result<Option<Skill>, RepositoryError> {
        let conn = self.pool.get()?;
        let skill = conn
            .query_row(
                &format!("SELECT {SKILL_COLUMNS} FROM skills WHERE id = ?1"),
                params![id],
                Skill::from_row,
            )
            .optional()?;
        Ok(skill)
    }

    async fn find_request(&self, id: &str) -> Result<Option<SkillRequest>, RepositoryError> {
        let conn = self.pool.get()?;
        let request = conn
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM skill_requests WHERE id = ?1"),
                params![id],
                SkillRequest::from_row,
            )
            .optional()?;
        Ok(request)
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>, RepositoryError> {
        let conn = self.pool.get()?;
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                Session::from_row,
            )
            .optional()?;
        Ok(session)
    }

    async fn find_session_for_request(
        &self,
        request_id: &str,
    ) -> Result<Option<Session>, RepositoryError> {
        let conn = self.pool.get()?;
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE request_id = ?1"),
                params![request_id],
                Session::from_row,
            )
            .optional()?;
        Ok(session)
    }

    async fn find_review(
        &self,
        reviewer_id: &str,
        session_id: &str,
    ) -> Result<Option<Review>, RepositoryError> {
        let conn = self.pool.get()?;
        let review = conn
            .query_row(
                &format!(
                    "SELECT {REVIEW_COLUMNS} FROM reviews WHERE reviewer_id = ?1 AND session_id = ?2"
                ),
                params![reviewer_id, session_id],
                Review::from_row,
            )
            .optional()?;
        Ok(review)
    }

    async fn requests_for(
        &self,
        user_id: &str,
        party: Party,
    ) -> Result<Vec<SkillRequest>, RepositoryError> {
        let column = match party {
            Party::Owner => "owner_id",
            Party::Requester => "requester_id",
        };
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM skill_requests WHERE {column} = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let requests = stmt
            .query_map(params![user_id], SkillRequest::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    async fn sessions_for(&self, user_id: &str) -> Result<Vec<Session>, RepositoryError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE owner_id = ?1 OR requester_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let sessions = stmt
            .query_map(params![user_id], Session::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    async fn insert_request(
        &self,
        request: &SkillRequest,
        events: &[DomainEvent],
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            &format!(
                "INSERT INTO skill_requests ({REQUEST_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                request.id,
                request.skill_id,
                request.requester_id,
                request.owner_id,
                request.message,
                request.preferred_schedule,
                request.status.as_str(),
                request.created_at,
                request.updated_at,
            ],
        )?;
        insert_outbox(&tx, events, request.created_at)?;

        tx.commit()?;
        Ok(())
    }

    async fn apply_transition(
        &self,
        transition: &RequestTransition,
        events: &[DomainEvent],
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.get()?;
        // IMMEDIATE takes the write lock up front, so concurrent transitions serialize
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE skill_requests SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                transition.to.as_str(),
                transition.at,
                transition.request_id,
                transition.from.as_str(),
            ],
        )?;

        if changed == 0 {
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM skill_requests WHERE id = ?1",
                    params![transition.request_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match current {
                Some(status) => RepositoryError::Conflict(format!("Request is already {status}")),
                None => RepositoryError::NotFound("Request not found".into()),
            });
        }

        if let Some(session) = &transition.session {
            ensure_no_session(&tx, &session.request_id)?;
            insert_session_row(&tx, session)?;
        }
        insert_outbox(&tx, events, transition.at)?;

        tx.commit()?;
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        ensure_no_session(&tx, &session.request_id)?;
        insert_session_row(&tx, session)?;

        tx.commit()?;
        Ok(())
    }

    async fn patch_session(
        &self,
        id: &str,
        changes: &SessionChanges,
        at: DateTime<Utc>,
    ) -> Result<Session, RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // absent fields bind NULL and keep the column as concurrent writers left it
        let changed = tx.execute(
            "UPDATE sessions
             SET scheduled_time = COALESCE(?1, scheduled_time),
                 status = COALESCE(?2, status),
                 meet_link = COALESCE(?3, meet_link),
                 comment = COALESCE(?4, comment),
                 updated_at = ?5
             WHERE id = ?6",
            params![
                changes.scheduled_time,
                changes.status.map(|s| s.as_str()),
                changes.meet_link,
                changes.comment,
                at,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound("Session not found".into()));
        }

        let session = tx.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![id],
            Session::from_row,
        )?;

        tx.commit()?;
        Ok(session)
    }

    async fn insert_review(&self, review: &Review) -> Result<(), RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM reviews WHERE reviewer_id = ?1 AND session_id = ?2",
                params![review.reviewer_id, review.session_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(RepositoryError::Conflict(
                "You have already reviewed this session".into(),
            ));
        }

        tx.execute(
            &format!(
                "INSERT INTO reviews ({REVIEW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                review.id,
                review.reviewer_id,
                review.reviewee_id,
                review.session_id,
                review.rating,
                review.comment,
                review.created_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }
}

/// Type alias for Arc-wrapped repository (for AppState)
pub type DynExchangeRepository = Arc<dyn ExchangeRepository>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_repo() -> (SqliteExchangeRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = db::create_pool(&db_path).unwrap();
        db::run_migrations(&pool).unwrap();

        (SqliteExchangeRepository::new(pool), temp_dir)
    }

    fn pending_request(id: &str) -> SkillRequest {
        let now = Utc::now();
        SkillRequest {
            id: id.into(),
            skill_id: "skill-1".into(),
            requester_id: "bob".into(),
            owner_id: "alice".into(),
            message: "Teach me".into(),
            preferred_schedule: "Friday".into(),
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn session_for(request: &SkillRequest, id: &str) -> Session {
        let now = Utc::now();
        Session {
            id: id.into(),
            skill_id: request.skill_id.clone(),
            requester_id: request.requester_id.clone(),
            owner_id: request.owner_id.clone(),
            scheduled_time: now.fixed_offset(),
            meet_link: String::new(),
            comment: String::new(),
            status: SessionStatus::Scheduled,
            request_id: request.id.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    fn accept(request: &SkillRequest, session: Option<Session>) -> RequestTransition {
        RequestTransition {
            request_id: request.id.clone(),
            from: RequestStatus::Pending,
            to: RequestStatus::Accepted,
            at: Utc::now(),
            session,
        }
    }

    fn outbox_count(repo: &SqliteExchangeRepository) -> i64 {
        let conn = repo.pool.get().unwrap();
        conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
            .unwrap()
    }

    fn created_event(request: &SkillRequest) -> DomainEvent {
        DomainEvent::RequestCreated {
            request_id: request.id.clone(),
            skill_id: request.skill_id.clone(),
            skill_title: "Guitar".into(),
            owner_id: request.owner_id.clone(),
            requester_id: request.requester_id.clone(),
            message: request.message.clone(),
            preferred_schedule: request.preferred_schedule.clone(),
        }
    }

    #[tokio::test]
    async fn insert_and_find_request() {
        let (repo, _temp) = create_test_repo();
        let request = pending_request("req-1");

        repo.insert_request(&request, &[created_event(&request)])
            .await
            .unwrap();

        let loaded = repo.find_request("req-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::Pending);
        assert_eq!(loaded.owner_id, "alice");
        assert_eq!(outbox_count(&repo), 1);
    }

    #[tokio::test]
    async fn missing_records_are_none() {
        let (repo, _temp) = create_test_repo();
        assert!(repo.find_skill("nope").await.unwrap().is_none());
        assert!(repo.find_request("nope").await.unwrap().is_none());
        assert!(repo.find_session("nope").await.unwrap().is_none());
        assert!(repo.find_review("bob", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accept_writes_status_and_session_together() {
        let (repo, _temp) = create_test_repo();
        let request = pending_request("req-1");
        repo.insert_request(&request, &[]).await.unwrap();

        let session = session_for(&request, "sess-1");
        repo.apply_transition(&accept(&request, Some(session)), &[])
            .await
            .unwrap();

        let loaded = repo.find_request("req-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::Accepted);
        let session = repo.find_session_for_request("req-1").await.unwrap().unwrap();
        assert_eq!(session.id, "sess-1");
        assert_eq!(session.status, SessionStatus::Scheduled);
    }

    #[tokio::test]
    async fn stale_transition_is_a_conflict() {
        let (repo, _temp) = create_test_repo();
        let request = pending_request("req-1");
        repo.insert_request(&request, &[]).await.unwrap();

        repo.apply_transition(&accept(&request, Some(session_for(&request, "s1"))), &[])
            .await
            .unwrap();
        let second = repo
            .apply_transition(&accept(&request, Some(session_for(&request, "s2"))), &[])
            .await;

        assert!(matches!(second, Err(RepositoryError::Conflict(_))));
        assert!(repo.find_session("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_of_missing_request_is_not_found() {
        let (repo, _temp) = create_test_repo();
        let request = pending_request("ghost");
        let result = repo.apply_transition(&accept(&request, None), &[]).await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn existing_session_rolls_back_status_change() {
        let (repo, _temp) = create_test_repo();
        let request = pending_request("req-1");
        repo.insert_request(&request, &[]).await.unwrap();
        repo.insert_session(&session_for(&request, "manual"))
            .await
            .unwrap();

        let result = repo
            .apply_transition(
                &accept(&request, Some(session_for(&request, "auto"))),
                &[created_event(&request)],
            )
            .await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        let loaded = repo.find_request("req-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::Pending);
        assert_eq!(outbox_count(&repo), 0);
    }

    #[tokio::test]
    async fn duplicate_session_insert_is_a_conflict() {
        let (repo, _temp) = create_test_repo();
        let request = pending_request("req-1");
        repo.insert_session(&session_for(&request, "s1"))
            .await
            .unwrap();
        let result = repo.insert_session(&session_for(&request, "s2")).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn patch_session_updates_present_fields() {
        let (repo, _temp) = create_test_repo();
        let request = pending_request("req-1");
        let session = session_for(&request, "s1");
        repo.insert_session(&session).await.unwrap();

        let later = session.scheduled_time + Duration::days(1);
        let changes = SessionChanges {
            scheduled_time: Some(later),
            meet_link: Some("https://meet.example/abc".into()),
            ..Default::default()
        };
        let patched = repo.patch_session("s1", &changes, Utc::now()).await.unwrap();

        assert_eq!(patched.meet_link, "https://meet.example/abc");
        assert_eq!(patched.scheduled_time, later);
        assert_eq!(patched.status, SessionStatus::Scheduled);
        assert_eq!(patched, repo.find_session("s1").await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn patches_to_different_fields_compose() {
        let (repo, _temp) = create_test_repo();
        let request = pending_request("req-1");
        repo.insert_session(&session_for(&request, "s1"))
            .await
            .unwrap();

        let link = SessionChanges {
            meet_link: Some("https://meet.example/abc".into()),
            ..Default::default()
        };
        let done = SessionChanges {
            status: Some(SessionStatus::Completed),
            ..Default::default()
        };
        repo.patch_session("s1", &done, Utc::now()).await.unwrap();
        repo.patch_session("s1", &link, Utc::now()).await.unwrap();

        let loaded = repo.find_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert_eq!(loaded.meet_link, "https://meet.example/abc");
    }

    #[tokio::test]
    async fn patch_missing_session_is_not_found() {
        let (repo, _temp) = create_test_repo();
        let result = repo
            .patch_session("ghost", &SessionChanges::default(), Utc::now())
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn second_review_by_same_reviewer_is_a_conflict() {
        let (repo, _temp) = create_test_repo();
        let review = Review {
            id: "r1".into(),
            reviewer_id: "bob".into(),
            reviewee_id: "alice".into(),
            session_id: "s1".into(),
            rating: 5,
            comment: "Great lessons".into(),
            created_at: Utc::now(),
        };
        repo.insert_review(&review).await.unwrap();

        let again = Review {
            id: "r2".into(),
            ..review.clone()
        };
        let result = repo.insert_review(&again).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));

        let loaded = repo.find_review("bob", "s1").await.unwrap().unwrap();
        assert_eq!(loaded, review);
    }

    #[tokio::test]
    async fn listings_filter_by_party() {
        let (repo, _temp) = create_test_repo();
        repo.insert_request(&pending_request("req-1"), &[])
            .await
            .unwrap();
        let mut other = pending_request("req-2");
        other.requester_id = "carol".into();
        other.owner_id = "bob".into();
        repo.insert_request(&other, &[]).await.unwrap();

        let received = repo.requests_for("bob", Party::Owner).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id, "req-2");

        let sent = repo.requests_for("bob", Party::Requester).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, "req-1");
        assert!(repo.sessions_for("bob").await.unwrap().is_empty());
    }
}
