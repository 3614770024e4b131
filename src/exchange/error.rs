use thiserror::Error;

use crate::exchange::domain::TransitionError;
use crate::exchange::repository::RepositoryError;
use crate::retry::Retryable;

/// Failures of the exchange workflow, classified so callers can tell them apart.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("Storage temporarily unavailable: {0}")]
    Transient(#[source] RepositoryError),

    #[error("Storage error: {0}")]
    Storage(#[source] RepositoryError),
}

impl From<RepositoryError> for ExchangeError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => Self::NotFound(msg),
            RepositoryError::Conflict(msg) => Self::Conflict(msg),
            other if other.is_transient() => Self::Transient(other),
            other => Self::Storage(other),
        }
    }
}

impl From<TransitionError> for ExchangeError {
    fn from(err: TransitionError) -> Self {
        let msg = err.to_string();
        match err {
            TransitionError::InvalidTarget(_) => Self::Validation(msg),
            TransitionError::NotPermitted { .. } => Self::Authorization(msg),
            TransitionError::Terminal(_) => Self::Authorization(msg),
        }
    }
}

impl Retryable for ExchangeError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::domain::{Party, RequestStatus};

    #[test]
    fn transition_errors_map_to_taxonomy() {
        assert!(matches!(
            ExchangeError::from(TransitionError::InvalidTarget("done".into())),
            ExchangeError::Validation(_)
        ));
        assert!(matches!(
            ExchangeError::from(TransitionError::NotPermitted {
                target: RequestStatus::Accepted,
                required: Party::Owner,
            }),
            ExchangeError::Authorization(_)
        ));
        assert!(matches!(
            ExchangeError::from(TransitionError::Terminal(RequestStatus::Rejected)),
            ExchangeError::Authorization(msg) if msg == "Request is already rejected"
        ));
    }

    #[test]
    fn busy_database_is_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err = ExchangeError::from(RepositoryError::Sql(busy));
        assert!(err.is_transient());
    }

    #[test]
    fn constraint_failure_is_not_transient() {
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        let err = ExchangeError::from(RepositoryError::Sql(constraint));
        assert!(matches!(err, ExchangeError::Storage(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn repository_conflict_keeps_message() {
        let err = ExchangeError::from(RepositoryError::Conflict("taken".into()));
        assert_eq!(err.to_string(), "taken");
    }
}
