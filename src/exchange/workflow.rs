use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::auth::Caller;
use crate::clock::DynClock;
use crate::db::models::{Review, Session, SessionStatus, Skill, SkillRequest};
use crate::exchange::domain::{Party, RequestStatus, ScheduleHint};
use crate::exchange::error::ExchangeError;
use crate::exchange::repository::{
    DynExchangeRepository, RepositoryError, RequestTransition, SessionChanges,
};
use crate::notify::DomainEvent;
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct NewRequest {
    pub skill_id: String,
    pub message: String,
    pub preferred_schedule: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub request_id: String,
    pub scheduled_time: DateTime<FixedOffset>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Partial session update. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPatch {
    pub scheduled_time: Option<DateTime<FixedOffset>>,
    pub status: Option<String>,
    pub meet_link: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReview {
    pub reviewee_id: String,
    pub session_id: String,
    pub rating: i64,
    pub comment: String,
}

/// Result of a status change. `session` is set only when the request was accepted.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub request: SkillRequest,
    pub session: Option<Session>,
}

/// The exchange workflow. Every operation takes the verified caller explicitly.
pub struct ExchangeService {
    repo: DynExchangeRepository,
    clock: DynClock,
    outbox: Arc<Notify>,
    retry: RetryPolicy,
}

fn require_text(value: &str, message: &str) -> Result<(), ExchangeError> {
    if value.trim().is_empty() {
        return Err(ExchangeError::Validation(message.to_string()));
    }
    Ok(())
}

fn status_changed(
    request: &SkillRequest,
    skill_title: String,
    session: Option<&Session>,
) -> DomainEvent {
    DomainEvent::RequestStatusChanged {
        request_id: request.id.clone(),
        skill_id: request.skill_id.clone(),
        skill_title,
        owner_id: request.owner_id.clone(),
        requester_id: request.requester_id.clone(),
        status: request.status,
        session_id: session.map(|s| s.id.clone()),
        scheduled_time: session.map(|s| s.scheduled_time),
    }
}

impl ExchangeService {
    pub fn new(
        repo: DynExchangeRepository,
        clock: DynClock,
        outbox: Arc<Notify>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repo,
            clock,
            outbox,
            retry,
        }
    }

    /// Run a repository call, retrying transient failures.
    async fn store<T, F, Fut>(&self, f: F) -> Result<T, ExchangeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        with_retry(self.retry, f).await.map_err(ExchangeError::from)
    }

    async fn skill(&self, id: &str) -> Result<Skill, ExchangeError> {
        self.store(|| self.repo.find_skill(id))
            .await?
            .ok_or_else(|| ExchangeError::NotFound("Skill not found".into()))
    }

    async fn request(&self, id: &str) -> Result<SkillRequest, ExchangeError> {
        self.store(|| self.repo.find_request(id))
            .await?
            .ok_or_else(|| ExchangeError::NotFound("Request not found".into()))
    }

    async fn session(&self, id: &str) -> Result<Session, ExchangeError> {
        self.store(|| self.repo.find_session(id))
            .await?
            .ok_or_else(|| ExchangeError::NotFound("Session not found".into()))
    }

    pub async fn create_request(
        &self,
        caller: &Caller,
        input: NewRequest,
    ) -> Result<SkillRequest, ExchangeError> {
        require_text(&input.message, "Message is required")?;
        require_text(&input.preferred_schedule, "Preferred schedule is required")?;

        let skill = self.skill(&input.skill_id).await?;
        if skill.owner_id == caller.id {
            return Err(ExchangeError::Conflict(
                "You cannot request your own skill".into(),
            ));
        }

        let now = self.clock.now().with_timezone(&Utc);
        let request = SkillRequest {
            id: Uuid::now_v7().to_string(),
            skill_id: skill.id.clone(),
            requester_id: caller.id.clone(),
            owner_id: skill.owner_id.clone(),
            message: input.message,
            preferred_schedule: input.preferred_schedule,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let events = [DomainEvent::RequestCreated {
            request_id: request.id.clone(),
            skill_id: skill.id,
            skill_title: skill.title,
            owner_id: request.owner_id.clone(),
            requester_id: request.requester_id.clone(),
            message: request.message.clone(),
            preferred_schedule: request.preferred_schedule.clone(),
        }];

        self.store(|| self.repo.insert_request(&request, &events))
            .await?;
        self.outbox.notify_one();

        tracing::info!(
            request_id = %request.id,
            skill_id = %request.skill_id,
            requester_id = %request.requester_id,
            "Skill request created"
        );
        Ok(request)
    }

    /// Move a pending request to `target`. Accepting also schedules its session.
    pub async fn update_request_status(
        &self,
        caller: &Caller,
        request_id: &str,
        target: &str,
    ) -> Result<StatusUpdate, ExchangeError> {
        let target: RequestStatus = target
            .parse()
            .map_err(|_| ExchangeError::Validation(format!("Invalid status: {target}")))?;

        let mut request = self.request(request_id).await?;
        let actor = Party::of(&caller.id, &request.owner_id, &request.requester_id);
        let next = request.status.transition(target, actor)?;

        let now = self.clock.now();
        let at = now.with_timezone(&Utc);
        let session = match next {
            RequestStatus::Accepted => {
                let scheduled_time = ScheduleHint::parse(&request.preferred_schedule)
                    .scheduled_time(now)
                    .ok_or_else(|| {
                        ExchangeError::Validation("Preferred schedule is out of range".into())
                    })?;
                Some(Session {
                    id: Uuid::now_v7().to_string(),
                    skill_id: request.skill_id.clone(),
                    requester_id: request.requester_id.clone(),
                    owner_id: request.owner_id.clone(),
                    scheduled_time,
                    meet_link: String::new(),
                    comment: String::new(),
                    status: SessionStatus::Scheduled,
                    request_id: request.id.clone(),
                    created_at: at,
                    updated_at: at,
                })
            }
            _ => None,
        };

        // skills are weakly referenced; a deleted skill still gets its notification
        let skill_title = self
            .store(|| self.repo.find_skill(&request.skill_id))
            .await?
            .map(|skill| skill.title)
            .unwrap_or_else(|| request.skill_id.clone());

        let transition = RequestTransition {
            request_id: request.id.clone(),
            from: request.status,
            to: next,
            at,
            session: session.clone(),
        };
        let from = request.status;
        request.status = next;
        request.updated_at = at;
        let events = [status_changed(&request, skill_title, session.as_ref())];

        self.store(|| self.repo.apply_transition(&transition, &events))
            .await?;
        self.outbox.notify_one();

        tracing::info!(
            request_id = %request.id,
            from = %from,
            to = %next,
            caller = %caller.id,
            session_id = session.as_ref().map(|s| s.id.as_str()).unwrap_or(""),
            "Request status changed"
        );
        Ok(StatusUpdate { request, session })
    }

    /// Schedule a session for an accepted request by hand.
    pub async fn create_session(
        &self,
        caller: &Caller,
        input: NewSession,
    ) -> Result<Session, ExchangeError> {
        let request = self.request(&input.request_id).await?;
        if request.owner_id != caller.id {
            return Err(ExchangeError::Authorization(
                "Only the skill owner can create a session".into(),
            ));
        }
        if request.status != RequestStatus::Accepted {
            return Err(ExchangeError::InvalidOperation(
                "Request must be accepted before scheduling a session".into(),
            ));
        }
        if self
            .store(|| self.repo.find_session_for_request(&request.id))
            .await?
            .is_some()
        {
            return Err(ExchangeError::Conflict(
                "Session already exists for this request".into(),
            ));
        }

        let now = self.clock.now().with_timezone(&Utc);
        let session = Session {
            id: Uuid::now_v7().to_string(),
            skill_id: request.skill_id,
            requester_id: request.requester_id,
            owner_id: request.owner_id,
            scheduled_time: input.scheduled_time,
            meet_link: String::new(),
            comment: input.comment.unwrap_or_default(),
            status: SessionStatus::Scheduled,
            request_id: request.id,
            created_at: now,
            updated_at: now,
        };

        self.store(|| self.repo.insert_session(&session)).await?;

        tracing::info!(session_id = %session.id, request_id = %session.request_id, "Session created");
        Ok(session)
    }

    pub async fn update_session(
        &self,
        caller: &Caller,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<Session, ExchangeError> {
        // participants never change, so checking them before the write is safe
        let session = self.session(session_id).await?;
        if !session.is_participant(&caller.id) {
            return Err(ExchangeError::Authorization(
                "You are not a participant in this session".into(),
            ));
        }

        let status = patch
            .status
            .as_deref()
            .map(str::parse::<SessionStatus>)
            .transpose()
            .map_err(|e| ExchangeError::Validation(format!("Invalid status: {}", e.value)))?;

        let changes = SessionChanges {
            scheduled_time: patch.scheduled_time,
            status,
            meet_link: patch.meet_link,
            comment: patch.comment,
        };
        let at = self.clock.now().with_timezone(&Utc);

        let session = self
            .store(|| self.repo.patch_session(&session.id, &changes, at))
            .await?;

        tracing::info!(session_id = %session.id, status = %session.status, "Session updated");
        Ok(session)
    }

    pub async fn create_review(
        &self,
        caller: &Caller,
        input: NewReview,
    ) -> Result<Review, ExchangeError> {
        let rating = u8::try_from(input.rating)
            .ok()
            .filter(|r| (1..=5).contains(r))
            .ok_or_else(|| ExchangeError::Validation("Rating must be between 1 and 5".into()))?;
        require_text(&input.comment, "Comment is required")?;

        let session = self.session(&input.session_id).await?;
        if session.status != SessionStatus::Completed {
            return Err(ExchangeError::InvalidOperation(
                "Can only review completed sessions".into(),
            ));
        }
        let counterpart = session.counterpart_of(&caller.id).ok_or_else(|| {
            ExchangeError::Authorization("You can only review sessions you took part in".into())
        })?;
        if counterpart != input.reviewee_id {
            return Err(ExchangeError::Validation(
                "Reviewee must be the other participant of the session".into(),
            ));
        }
        if self
            .store(|| self.repo.find_review(&caller.id, &session.id))
            .await?
            .is_some()
        {
            return Err(ExchangeError::Conflict(
                "You have already reviewed this session".into(),
            ));
        }

        let review = Review {
            id: Uuid::now_v7().to_string(),
            reviewer_id: caller.id.clone(),
            reviewee_id: input.reviewee_id,
            session_id: session.id,
            rating,
            comment: input.comment,
            created_at: self.clock.now().with_timezone(&Utc),
        };

        self.store(|| self.repo.insert_review(&review)).await?;

        tracing::info!(
            review_id = %review.id,
            session_id = %review.session_id,
            rating = review.rating,
            "Review created"
        );
        Ok(review)
    }

    pub async fn list_received(&self, caller: &Caller) -> Result<Vec<SkillRequest>, ExchangeError> {
        self.store(|| self.repo.requests_for(&caller.id, Party::Owner))
            .await
    }

    pub async fn list_sent(&self, caller: &Caller) -> Result<Vec<SkillRequest>, ExchangeError> {
        self.store(|| self.repo.requests_for(&caller.id, Party::Requester))
            .await
    }

    pub async fn list_sessions(&self, caller: &Caller) -> Result<Vec<Session>, ExchangeError> {
        self.store(|| self.repo.sessions_for(&caller.id)).await
    }
}
