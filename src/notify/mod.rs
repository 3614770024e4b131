//! Notifications for exchange participants.
//!
//! The workflow never sends anything itself. It records [`DomainEvent`]s,
//! which are rendered into outbox rows inside the same transaction as the
//! state change, and the [`dispatcher::OutboxDispatcher`] delivers those rows
//! later through a [`Notifier`].

pub mod dispatcher;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::exchange::domain::RequestStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    RequestCreated {
        request_id: String,
        skill_id: String,
        skill_title: String,
        owner_id: String,
        requester_id: String,
        message: String,
        preferred_schedule: String,
    },
    RequestStatusChanged {
        request_id: String,
        skill_id: String,
        skill_title: String,
        owner_id: String,
        requester_id: String,
        status: RequestStatus,
        session_id: Option<String>,
        scheduled_time: Option<DateTime<FixedOffset>>,
    },
}

/// One rendered notification, addressed by user id.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub recipient_id: String,
    pub subject: String,
    pub body: String,
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestCreated { .. } => "request_created",
            Self::RequestStatusChanged { .. } => "request_status_changed",
        }
    }

    pub fn messages(&self) -> Vec<OutboxMessage> {
        match self {
            Self::RequestCreated {
                skill_title,
                owner_id,
                message,
                preferred_schedule,
                ..
            } => vec![OutboxMessage {
                recipient_id: owner_id.clone(),
                subject: "New Skill Exchange Request".into(),
                body: format!(
                    "You have received a new request for your skill: {}\n\nMessage: {}\nPreferred Schedule: {}",
                    skill_title, message, preferred_schedule
                ),
            }],
            Self::RequestStatusChanged {
                skill_title,
                owner_id,
                requester_id,
                status,
                scheduled_time,
                ..
            } => {
                let session_line = scheduled_time
                    .map(|t| format!("\n\nA session has been scheduled for {}.", t.to_rfc2822()))
                    .unwrap_or_default();
                vec![
                    OutboxMessage {
                        recipient_id: requester_id.clone(),
                        subject: "Skill Exchange Request Update".into(),
                        body: format!(
                            "Your request for skill: {} has been {}.{}",
                            skill_title, status, session_line
                        ),
                    },
                    OutboxMessage {
                        recipient_id: owner_id.clone(),
                        subject: "Skill Exchange Request Update".into(),
                        body: format!(
                            "A request for your skill: {} has been {}.{}",
                            skill_title, status, session_line
                        ),
                    },
                ]
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("No address for recipient {0}")]
    UnknownRecipient(String),
}

/// Sends one message. Implementations must not block for long; the
/// dispatcher awaits them one at a time.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, address: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

pub type DynNotifier = Arc<dyn Notifier>;

/// Writes each notification to the log instead of delivering it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, address: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(to = %address, subject = %subject, body = %body, "notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn status_changed(status: RequestStatus, scheduled: bool) -> DomainEvent {
        let offset = FixedOffset::east_opt(0).unwrap();
        DomainEvent::RequestStatusChanged {
            request_id: "req-1".into(),
            skill_id: "skill-1".into(),
            skill_title: "Guitar".into(),
            owner_id: "alice".into(),
            requester_id: "bob".into(),
            status,
            session_id: scheduled.then(|| "sess-1".to_string()),
            scheduled_time: scheduled
                .then(|| offset.with_ymd_and_hms(2026, 10, 14, 14, 0, 0).unwrap()),
        }
    }

    #[test]
    fn created_event_notifies_owner_only() {
        let event = DomainEvent::RequestCreated {
            request_id: "req-1".into(),
            skill_id: "skill-1".into(),
            skill_title: "Guitar".into(),
            owner_id: "alice".into(),
            requester_id: "bob".into(),
            message: "Hi".into(),
            preferred_schedule: "Friday".into(),
        };
        let messages = event.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipient_id, "alice");
        assert!(messages[0].body.contains("Guitar"));
        assert!(messages[0].body.contains("Preferred Schedule: Friday"));
    }

    #[test]
    fn status_change_notifies_both_parties() {
        let messages = status_changed(RequestStatus::Rejected, false).messages();
        let recipients: Vec<_> = messages.iter().map(|m| m.recipient_id.as_str()).collect();
        assert_eq!(recipients, ["bob", "alice"]);
        assert!(messages[0].body.ends_with("has been rejected."));
    }

    #[test]
    fn acceptance_mentions_session_time() {
        let messages = status_changed(RequestStatus::Accepted, true).messages();
        assert!(messages
            .iter()
            .all(|m| m.body.contains("A session has been scheduled for")));
    }

    #[test]
    fn event_payload_is_tagged() {
        let json = serde_json::to_value(status_changed(RequestStatus::Accepted, true)).unwrap();
        assert_eq!(json["event"], "request_status_changed");
        assert_eq!(json["status"], "accepted");
    }
}
