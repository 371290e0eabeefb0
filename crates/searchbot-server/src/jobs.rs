use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use searchbot_contracts::{
    ChatId, JobCallback, JobKind, JobRecord, JobStatus, OutgoingMessage, UserId,
};
use searchbot_kernel::messages::format_job_notification;
use searchbot_kernel::{job_key, saturating_minutes, Clock};
use tokio::sync::Mutex;

use crate::stats::{Counter, UsageStats};
use crate::store::SessionStore;
use crate::transport::ChatTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Delivered,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Never recorded, already consumed, or past retention.
    UnknownJob,
    RepeatedStatus,
    DeliveryFailed,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::UnknownJob => "unknown_job",
            DropReason::RepeatedStatus => "repeated_status",
            DropReason::DeliveryFailed => "delivery_failed",
        }
    }
}

/// Routes out-of-band job completions back to the user who started the job.
///
/// Lookup is strictly by job id. A callback for a job with no record is
/// logged and dropped; nothing is ever sent to other users.
pub struct JobCorrelator {
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    transport: Arc<dyn ChatTransport>,
    stats: Arc<UsageStats>,
    resolving: Mutex<()>,
}

impl JobCorrelator {
    pub fn new(
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        retention_minutes: u64,
        transport: Arc<dyn ChatTransport>,
        stats: Arc<UsageStats>,
    ) -> Self {
        Self {
            store,
            clock,
            retention: saturating_minutes(retention_minutes),
            transport,
            stats,
            resolving: Mutex::new(()),
        }
    }

    pub async fn record(&self, job_id: &str, user_id: UserId, chat_id: ChatId, kind: JobKind) {
        let record = JobRecord {
            job_id: job_id.to_string(),
            user_id,
            chat_id,
            created_at: self.clock.now().to_rfc3339(),
            kind,
            last_status: None,
        };
        match serde_json::to_value(&record) {
            Ok(value) => {
                self.store
                    .set(&job_key(job_id), &value, Some(self.retention))
                    .await;
                self.stats.incr(Counter::JobsRecorded);
                tracing::info!(job_id, user_id, kind = ?kind, "job recorded");
            }
            Err(err) => tracing::error!(job_id, error = %err, "failed to encode job record"),
        }
    }

    pub async fn lookup(&self, job_id: &str) -> Option<JobRecord> {
        let value = self.store.get(&job_key(job_id)).await?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::error!(job_id, error = %err, "stored job record is unreadable");
                None
            }
        }
    }

    pub async fn resolve(&self, callback: &JobCallback) -> Resolution {
        let job_id = callback.job_id.as_str();
        let status = callback.status();

        let record = match self.claim(job_id, &status).await {
            Ok(record) => record,
            Err(reason) => return self.dropped(reason),
        };

        let text = format_job_notification(
            job_id,
            &status,
            callback.result.as_ref(),
            callback.error.as_deref(),
        );
        match self
            .transport
            .send(&OutgoingMessage::text(record.chat_id, text))
            .await
        {
            Ok(()) => {
                self.stats.incr(Counter::JobsNotified);
                tracing::info!(job_id, user_id = record.user_id, status = status.as_str(), "job notification delivered");
                Resolution::Delivered
            }
            Err(err) => {
                tracing::error!(job_id, user_id = record.user_id, error = %err, "job notification delivery failed");
                self.dropped(DropReason::DeliveryFailed)
            }
        }
    }

    /// Consumes or advances the record for `status`. Holds the lock only for
    /// the store round-trip; delivery happens after it is released.
    async fn claim(&self, job_id: &str, status: &JobStatus) -> Result<JobRecord, DropReason> {
        let _guard = self.resolving.lock().await;

        let Some(mut record) = self.lookup(job_id).await else {
            tracing::warn!(job_id, status = status.as_str(), "callback for unknown job dropped");
            return Err(DropReason::UnknownJob);
        };

        if status.is_terminal() {
            self.store.delete(&job_key(job_id)).await;
            return Ok(record);
        }
        if record.last_status.as_deref() == Some(status.as_str()) {
            tracing::debug!(job_id, status = status.as_str(), "repeated job status dropped");
            return Err(DropReason::RepeatedStatus);
        }
        record.last_status = Some(status.as_str().to_string());
        let remaining = self.remaining_retention(&record);
        if remaining > Duration::zero() {
            if let Ok(value) = serde_json::to_value(&record) {
                self.store.set(&job_key(job_id), &value, Some(remaining)).await;
            }
        }
        Ok(record)
    }

    fn remaining_retention(&self, record: &JobRecord) -> Duration {
        match DateTime::parse_from_rfc3339(&record.created_at) {
            Ok(created) => created
                .with_timezone(&Utc)
                .checked_add_signed(self.retention)
                .map_or(self.retention, |until| until - self.clock.now()),
            Err(_) => self.retention,
        }
    }

    fn dropped(&self, reason: DropReason) -> Resolution {
        self.stats.incr(Counter::JobsDropped);
        Resolution::Dropped(reason)
    }
}
