//! Job Queue
//!
//! Four typed lanes backed by a [`Broker`]. Enqueueing never fails the
//! caller: when the queue was built with [`JobQueue::disabled`] or the broker
//! rejects a push, the `add_*_job` methods log a warning and return `None`.
//!
//! ```text
//!   add_*_job ──▶ Broker lane (run_at ordered) ──▶ WorkerPool ──▶ JobHandler
//!                        ▲                             │
//!                        └──── retry with backoff ─────┤
//!                                                      ▼
//!                                           dead letters (exhausted)
//! ```

mod broker;
#[cfg(feature = "redis")]
mod redis_broker;
mod worker;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::orchestrator::{PayoutRequest, SwapRequest};

pub use broker::{Broker, MemoryBroker};
#[cfg(feature = "redis")]
pub use redis_broker::RedisBroker;
pub use worker::{JobHandler, WorkerConfig, WorkerHandle, WorkerPool};

/// Default delay before a funding job runs, giving the debit time to clear
pub const DEFAULT_FUNDING_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Funding,
    Conversion,
    Payout,
    Webhook,
}

impl Lane {
    pub const ALL: [Self; 4] = [Self::Funding, Self::Conversion, Self::Payout, Self::Webhook];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Funding => "funding",
            Self::Conversion => "conversion",
            Self::Payout => "payout",
            Self::Webhook => "webhook",
        }
    }

    /// Attempts before a job is dead-lettered
    pub const fn max_attempts(&self) -> u32 {
        match self {
            Self::Webhook => 5,
            _ => 3,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|lane| lane.as_str() == s)
            .ok_or_else(|| PipelineError::Validation(format!("unknown job lane '{s}'")))
    }
}

/// Settle-and-convert step for one payment intent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingJob {
    pub payment_intent_id: Uuid,
    pub company_id: Uuid,
}

/// Run the dispatcher for one stored webhook event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookJob {
    pub webhook_event_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobPayload {
    Funding(FundingJob),
    Conversion(SwapRequest),
    Payout(PayoutRequest),
    Webhook(WebhookJob),
}

impl JobPayload {
    pub const fn lane(&self) -> Lane {
        match self {
            Self::Funding(_) => Lane::Funding,
            Self::Conversion(_) => Lane::Conversion,
            Self::Payout(_) => Lane::Payout,
            Self::Webhook(_) => Lane::Webhook,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub lane: Lane,
    pub payload: JobPayload,

    /// Runs so far, failed ones included
    pub attempts: u32,

    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload, delay: Duration) -> Self {
        let lane = payload.lane();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lane,
            payload,
            attempts: 0,
            max_attempts: lane.max_attempts(),
            run_at: now + chrono::Duration::from_std(delay).unwrap_or_default(),
            last_error: None,
            created_at: now,
        }
    }

    pub const fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Reference to an enqueued job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub lane: Lane,
}

/// Enqueue side of the pipeline's job lanes
#[derive(Clone)]
pub struct JobQueue {
    broker: Option<Arc<dyn Broker>>,
    funding_delay: Duration,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("mode", &self.mode())
            .field("funding_delay", &self.funding_delay)
            .finish()
    }
}

impl JobQueue {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker: Some(broker),
            funding_delay: DEFAULT_FUNDING_DELAY,
        }
    }

    /// Degraded mode: every enqueue is dropped with a warning
    pub fn disabled() -> Self {
        tracing::warn!("Job queue disabled; asynchronous processing is off");
        Self {
            broker: None,
            funding_delay: DEFAULT_FUNDING_DELAY,
        }
    }

    #[must_use]
    pub const fn with_funding_delay(mut self, delay: Duration) -> Self {
        self.funding_delay = delay;
        self
    }

    pub const fn is_enabled(&self) -> bool {
        self.broker.is_some()
    }

    /// `redis`, `memory` or `disabled`
    pub fn mode(&self) -> &'static str {
        self.broker.as_ref().map_or("disabled", |b| b.kind())
    }

    pub fn broker(&self) -> Option<Arc<dyn Broker>> {
        self.broker.clone()
    }

    async fn enqueue(&self, payload: JobPayload, delay: Duration) -> Option<JobHandle> {
        let lane = payload.lane();
        let Some(broker) = &self.broker else {
            tracing::warn!(%lane, "Queue unavailable; job not enqueued");
            return None;
        };

        let job = Job::new(payload, delay);
        match broker.push(&job).await {
            Ok(()) => {
                tracing::debug!(%lane, job_id = %job.id, run_at = %job.run_at, "Job enqueued");
                Some(JobHandle { id: job.id, lane })
            }
            Err(e) => {
                tracing::warn!(%lane, error = %e, "Failed to enqueue job");
                None
            }
        }
    }

    pub async fn add_funding_job(&self, job: FundingJob) -> Option<JobHandle> {
        self.enqueue(JobPayload::Funding(job), self.funding_delay).await
    }

    pub async fn add_conversion_job(&self, request: SwapRequest) -> Option<JobHandle> {
        self.enqueue(JobPayload::Conversion(request), Duration::ZERO).await
    }

    pub async fn add_payout_job(&self, request: PayoutRequest) -> Option<JobHandle> {
        self.enqueue(JobPayload::Payout(request), Duration::ZERO).await
    }

    pub async fn add_webhook_job(&self, job: WebhookJob) -> Option<JobHandle> {
        self.enqueue(JobPayload::Webhook(job), Duration::ZERO).await
    }

    /// Dead-lettered jobs for a lane, newest first; empty when disabled
    pub async fn failed_jobs(&self, lane: Lane, limit: usize) -> Result<Vec<Job>> {
        match &self.broker {
            Some(broker) => broker.dead_jobs(lane, limit).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook_job() -> WebhookJob {
        WebhookJob {
            webhook_event_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_disabled_queue_returns_no_handle() {
        let queue = JobQueue::disabled();
        assert!(!queue.is_enabled());
        assert_eq!(queue.mode(), "disabled");
        assert!(queue.add_webhook_job(webhook_job()).await.is_none());
        assert!(queue.failed_jobs(Lane::Webhook, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_uses_lane_limits() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = JobQueue::new(broker.clone());

        let handle = queue.add_webhook_job(webhook_job()).await.unwrap();
        assert_eq!(handle.lane, Lane::Webhook);

        let job = broker.pop_due(Lane::Webhook, Utc::now()).await.unwrap().unwrap();
        assert_eq!(job.id, handle.id);
        assert_eq!(job.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_funding_jobs_are_delayed() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = JobQueue::new(broker.clone()).with_funding_delay(Duration::from_secs(5));

        queue
            .add_funding_job(FundingJob {
                payment_intent_id: Uuid::new_v4(),
                company_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        assert!(broker.pop_due(Lane::Funding, Utc::now()).await.unwrap().is_none());
        let later = Utc::now() + chrono::Duration::seconds(6);
        assert!(broker.pop_due(Lane::Funding, later).await.unwrap().is_some());
    }

    #[test]
    fn test_lane_parsing() {
        assert_eq!("payout".parse::<Lane>().unwrap(), Lane::Payout);
        assert!("refunds".parse::<Lane>().is_err());
        assert_eq!(Lane::Funding.max_attempts(), 3);
    }
}
