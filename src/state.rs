use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tokio::sync::Notify;

use crate::clock::DynClock;
use crate::config::Config;
use crate::exchange::{ExchangeService, SqliteExchangeRepository};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub exchange: Arc<ExchangeService>,
    /// Poked after every commit that wrote outbox rows.
    pub outbox_wake: Arc<Notify>,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, clock: DynClock) -> Self {
        let outbox_wake = Arc::new(Notify::new());
        let repo = Arc::new(SqliteExchangeRepository::new(db.clone()));
        let exchange = Arc::new(ExchangeService::new(
            repo,
            clock,
            outbox_wake.clone(),
            config.retry,
        ));

        Self {
            db,
            config,
            exchange,
            outbox_wake,
        }
    }
}
