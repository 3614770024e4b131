// Library exports for SkillSwap
// This allows integration tests and external code to use SkillSwap modules

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod extractors;
pub mod notify;
pub mod retry;
pub mod routes;
pub mod state;
