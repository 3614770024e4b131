// Domain rules - pure, no storage or clock access
use chrono::{DateTime, Datelike, Days, FixedOffset, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::models::ParseEnumError;

/// Hour of day (local) every accepted request is scheduled at.
pub const SESSION_HOUR: u32 = 14;

/// SkillRequest status. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The party allowed to move a request into `self`.
    /// `None` for `Pending`, which is never a valid target.
    pub fn required_party(&self) -> Option<Party> {
        match self {
            Self::Pending => None,
            Self::Accepted | Self::Rejected => Some(Party::Owner),
            Self::Cancelled => Some(Party::Requester),
        }
    }

    /// Transition: self → target, performed by `actor`.
    ///
    /// Check order: target validity, then the actor's party, then terminality.
    /// A wrong caller is told so even when the request is already closed.
    pub fn transition(
        self,
        target: RequestStatus,
        actor: Option<Party>,
    ) -> Result<RequestStatus, TransitionError> {
        let required = target
            .required_party()
            .ok_or_else(|| TransitionError::InvalidTarget(target.as_str().to_string()))?;

        if actor != Some(required) {
            return Err(TransitionError::NotPermitted { target, required });
        }

        if self.is_terminal() {
            return Err(TransitionError::Terminal(self));
        }

        Ok(target)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseEnumError::new("request status", other)),
        }
    }
}

/// Which side of a request a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Owner,
    Requester,
}

impl Party {
    /// Resolve a caller against a request's owner and requester ids.
    pub fn of(caller_id: &str, owner_id: &str, requester_id: &str) -> Option<Party> {
        if caller_id == owner_id {
            Some(Party::Owner)
        } else if caller_id == requester_id {
            Some(Party::Requester)
        } else {
            None
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "skill owner"),
            Self::Requester => write!(f, "requester"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionError {
    InvalidTarget(String),
    NotPermitted {
        target: RequestStatus,
        required: Party,
    },
    Terminal(RequestStatus),
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTarget(status) => write!(f, "Invalid status: {}", status),
            Self::NotPermitted { target, required } => {
                write!(f, "Only the {} can mark a request {}", required, target)
            }
            Self::Terminal(status) => write!(f, "Request is already {}", status),
        }
    }
}

impl std::error::Error for TransitionError {}

/// What a free-text preferred schedule tells us. Only weekday names are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleHint {
    Weekday(Weekday),
    NoHint,
}

const WEEKDAY_NAMES: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

impl ScheduleHint {
    /// First weekday name (Monday to Sunday order) found anywhere in the text.
    pub fn parse(text: &str) -> Self {
        let lowered = text.to_lowercase();
        WEEKDAY_NAMES
            .iter()
            .find(|(name, _)| lowered.contains(name))
            .map(|(_, day)| Self::Weekday(*day))
            .unwrap_or(Self::NoHint)
    }

    /// Days from `today` until the hinted weekday; 0 for the same weekday or no hint.
    pub fn days_ahead(&self, today: Weekday) -> u32 {
        match self {
            Self::Weekday(target) => {
                (target.num_days_from_sunday() + 7 - today.num_days_from_sunday()) % 7
            }
            Self::NoHint => 0,
        }
    }

    /// Session start for a request accepted at `now`: the hinted day (or today)
    /// at `SESSION_HOUR`:00 in `now`'s offset. Any time given in the text is ignored.
    /// `None` only when the hinted day lies past the end of the calendar.
    pub fn scheduled_time(&self, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let offset = *now.offset();
        let days = self.days_ahead(now.weekday());

        now.date_naive()
            .checked_add_days(Days::new(u64::from(days)))
            .and_then(|date| date.and_hms_opt(SESSION_HOUR, 0, 0))
            .and_then(|naive| naive.and_local_timezone(offset).single())
    }
}
