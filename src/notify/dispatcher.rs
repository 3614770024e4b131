use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::NotificationConfig;
use crate::exchange::repository::RepositoryError;
use crate::notify::{DynNotifier, NotifyError};
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

struct PendingMessage {
    id: String,
    recipient_id: String,
    address: Option<String>,
    subject: String,
    body: String,
}

/// Drains the outbox on its own task. Delivery failures are recorded on the
/// outbox row and never reach the request that produced the message.
pub struct OutboxDispatcher {
    pool: DbPool,
    notifier: DynNotifier,
    wake: Arc<Notify>,
    config: NotificationConfig,
}

impl OutboxDispatcher {
    pub fn new(
        pool: DbPool,
        notifier: DynNotifier,
        wake: Arc<Notify>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            pool,
            notifier,
            wake,
            config,
        }
    }

    /// Dispatch forever, on every wake-up and at least once per poll interval.
    pub async fn run(self) {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        tracing::info!(
            poll_interval_secs = interval.as_secs(),
            max_attempts = self.config.max_attempts,
            "Outbox dispatcher started"
        );

        loop {
            match self.dispatch_pending().await {
                Ok(report) if report.delivered + report.failed > 0 => {
                    tracing::debug!(
                        delivered = report.delivered,
                        failed = report.failed,
                        "Outbox pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Outbox pass failed"),
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One pass over undelivered messages that still have attempts left.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport, RepositoryError> {
        let pending = self.load_pending()?;
        let mut report = DispatchReport::default();

        for message in pending {
            let outcome = match &message.address {
                Some(address) => {
                    self.notifier
                        .notify(address, &message.subject, &message.body)
                        .await
                }
                None => Err(NotifyError::UnknownRecipient(message.recipient_id.clone())),
            };

            match outcome {
                Ok(()) => {
                    self.mark_delivered(&message.id)?;
                    report.delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        recipient = %message.recipient_id,
                        error = %e,
                        "Notification delivery failed"
                    );
                    self.record_failure(&message.id, &e.to_string())?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn load_pending(&self) -> Result<Vec<PendingMessage>, RepositoryError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT o.id, o.recipient_id, u.email, o.subject, o.body
             FROM outbox o LEFT JOIN users u ON u.id = o.recipient_id
             WHERE o.delivered_at IS NULL AND o.attempts < ?1
             ORDER BY o.created_at, o.id
             LIMIT ?2",
        )?;
        let pending = stmt
            .query_map(
                params![self.config.max_attempts, self.config.batch_size],
                |row| {
                    Ok(PendingMessage {
                        id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        address: row.get(2)?,
                        subject: row.get(3)?,
                        body: row.get(4)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    fn mark_delivered(&self, id: &str) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE outbox SET delivered_at = ?1, attempts = attempts + 1, last_error = NULL
             WHERE id = ?2",
            params![chrono::Utc::now(), id],
        )?;
        Ok(())
    }

    fn record_failure(&self, id: &str, error: &str) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE outbox SET attempts = attempts + 1, last_error = ?1 WHERE id = ?2",
            params![error, id],
        )?;
        Ok(())
    }
}
