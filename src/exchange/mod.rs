// Skill exchange workflow: requests, the sessions they turn into, and reviews

pub mod domain;
pub mod error;
pub mod repository;
pub mod workflow;

pub use domain::{Party, RequestStatus, ScheduleHint, TransitionError};
pub use error::ExchangeError;
pub use repository::{
    DynExchangeRepository, ExchangeRepository, RepositoryError, RequestTransition,
    SessionChanges, SqliteExchangeRepository,
};
pub use workflow::{ExchangeService, NewRequest, NewReview, NewSession, SessionPatch, StatusUpdate};
