use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use crate::exchange::domain::RequestStatus;

/// Returned when a stored or submitted string is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillKind {
    Offer,
    Request,
}

impl FromStr for SkillKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(Self::Offer),
            "request" => Ok(Self::Request),
            other => Err(ParseEnumError::new("skill kind", other)),
        }
    }
}

/// Session status. Any participant may move a session to any status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
    Rescheduled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rescheduled => "rescheduled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "rescheduled" => Ok(Self::Rescheduled),
            other => Err(ParseEnumError::new("session status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_banned: bool,
    pub is_reported: bool,
    pub learning_goals: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub kind: SkillKind,
    pub owner_id: String,
    pub availability: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRequest {
    pub id: String,
    pub skill_id: String,
    pub requester_id: String,
    /// Copied from the skill when the request is created.
    pub owner_id: String,
    pub message: String,
    pub preferred_schedule: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub skill_id: String,
    pub requester_id: String,
    pub owner_id: String,
    /// Keeps the offset it was scheduled in.
    pub scheduled_time: DateTime<FixedOffset>,
    pub meet_link: String,
    pub comment: String,
    pub status: SessionStatus,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.requester_id == user_id
    }

    /// The participant on the other side from `user_id`, if `user_id` took part.
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.owner_id == user_id {
            Some(&self.requester_id)
        } else if self.requester_id == user_id {
            Some(&self.owner_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub reviewer_id: String,
    pub reviewee_id: String,
    pub session_id: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

// -- Row mapping --

pub const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, is_banned, is_reported, learning_goals, created_at";
pub const SKILL_COLUMNS: &str =
    "id, title, description, category, kind, owner_id, availability, created_at";
pub const REQUEST_COLUMNS: &str =
    "id, skill_id, requester_id, owner_id, message, preferred_schedule, status, created_at, updated_at";
pub const SESSION_COLUMNS: &str = "id, skill_id, requester_id, owner_id, scheduled_time, meet_link, \
     comment, status, request_id, created_at, updated_at";
pub const REVIEW_COLUMNS: &str =
    "id, reviewer_id, reviewee_id, session_id, rating, comment, created_at";

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

impl User {
    /// Map a row selected with `USER_COLUMNS`.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            role: parse_enum(row, 4)?,
            is_banned: row.get(5)?,
            is_reported: row.get(6)?,
            learning_goals: parse_list(row, 7)?,
            created_at: row.get(8)?,
        })
    }
}

impl Skill {
    /// Map a row selected with `SKILL_COLUMNS`.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            kind: parse_enum(row, 4)?,
            owner_id: row.get(5)?,
            availability: parse_list(row, 6)?,
            created_at: row.get(7)?,
        })
    }
}

impl SkillRequest {
    /// Map a row selected with `REQUEST_COLUMNS`.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            skill_id: row.get(1)?,
            requester_id: row.get(2)?,
            owner_id: row.get(3)?,
            message: row.get(4)?,
            preferred_schedule: row.get(5)?,
            status: parse_enum(row, 6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl Session {
    /// Map a row selected with `SESSION_COLUMNS`.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            skill_id: row.get(1)?,
            requester_id: row.get(2)?,
            owner_id: row.get(3)?,
            scheduled_time: row.get(4)?,
            meet_link: row.get(5)?,
            comment: row.get(6)?,
            status: parse_enum(row, 7)?,
            request_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl Review {
    /// Map a row selected with `REVIEW_COLUMNS`.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            reviewer_id: row.get(1)?,
            reviewee_id: row.get(2)?,
            session_id: row.get(3)?,
            rating: row.get(4)?,
            comment: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}
