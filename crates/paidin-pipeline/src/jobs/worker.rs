//! Lane workers
//!
//! One tokio task per lane polls the broker. A completed job is acked. A failed
//! job is rescheduled with exponential backoff while its error is retryable and
//! attempts remain; otherwise it is buried in the lane's dead letters. Claims
//! left unsettled past the visibility timeout, e.g. by a crashed process, are
//! put back on the schedule whenever a lane goes idle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Broker, Job, Lane};
use crate::error::Result;

/// Executes one job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Sleep between polls of an empty lane
    pub poll_interval: Duration,

    /// Delay before the first retry; doubles per attempt
    pub base_backoff: Duration,

    pub max_backoff: Duration,

    /// Age after which an unsettled claim is rescheduled
    pub visibility_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(broker: Arc<dyn Broker>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            broker,
            handler,
            config: WorkerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.config
            .base_backoff
            .saturating_mul(factor)
            .min(self.config.max_backoff)
    }

    /// Run the next due job on `lane`. Returns whether one ran.
    pub async fn run_once(&self, lane: Lane) -> Result<bool> {
        let Some(mut job) = self.broker.pop_due(lane, Utc::now()).await? else {
            return Ok(false);
        };
        job.attempts += 1;

        match self.handler.handle(&job).await {
            Ok(()) => {
                info!(%lane, job_id = %job.id, attempts = job.attempts, "Job completed");
                self.broker.ack(&job).await?;
            }
            Err(e) => {
                job.last_error = Some(e.to_string());
                if !e.is_retryable() || job.is_exhausted() {
                    error!(
                        %lane,
                        job_id = %job.id,
                        attempts = job.attempts,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Job failed permanently"
                    );
                    self.broker.bury(&job).await?;
                } else {
                    let delay = self.backoff(job.attempts);
                    job.run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    warn!(
                        %lane,
                        job_id = %job.id,
                        attempts = job.attempts,
                        ?delay,
                        error = %e,
                        "Job failed; will retry"
                    );
                    self.broker.push(&job).await?;
                }
            }
        }
        Ok(true)
    }

    /// Reschedule claims on `lane` older than the visibility timeout
    pub async fn requeue_stale(&self, lane: Lane) -> Result<usize> {
        let timeout = chrono::Duration::from_std(self.config.visibility_timeout).unwrap_or_default();
        self.broker.requeue_stale(lane, Utc::now() - timeout).await
    }

    /// Run due jobs on `lane` until none are left. Returns how many ran.
    pub async fn drain(&self, lane: Lane) -> Result<usize> {
        let mut ran = 0;
        while self.run_once(lane).await? {
            ran += 1;
        }
        Ok(ran)
    }

    /// Start one polling task per lane
    pub fn spawn(self: Arc<Self>, lanes: &[Lane]) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = lanes
            .iter()
            .map(|&lane| {
                let pool = Arc::clone(&self);
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    info!(%lane, "Worker started");
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        match pool.run_once(lane).await {
                            Ok(true) => continue,
                            Ok(false) => {
                                if let Err(e) = pool.requeue_stale(lane).await {
                                    error!(%lane, error = %e, "Requeue of stale claims failed");
                                }
                            }
                            Err(e) => error!(%lane, error = %e, "Worker poll failed"),
                        }
                        tokio::select! {
                            () = tokio::time::sleep(pool.config.poll_interval) => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    info!(%lane, "Worker stopped");
                })
            })
            .collect();

        WorkerHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Running lane workers
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal every worker to stop after its current job and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}
