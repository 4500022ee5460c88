//! Broker contract and the in-process broker

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Job, Lane};
use crate::error::Result;

/// Durable storage for scheduled, claimed and dead jobs.
///
/// Delivery is at-least-once. `pop_due` hands each job to exactly one caller
/// and holds it as claimed until the caller acks, reschedules or buries it.
/// Claims older than a visibility timeout go back on the schedule through
/// `requeue_stale`, so handlers must tolerate running a job twice.
#[async_trait]
pub trait Broker: Send + Sync {
    /// `redis` or `memory`
    fn kind(&self) -> &'static str;

    /// Schedule `job` at its `run_at`, replacing any earlier copy with the same id
    async fn push(&self, job: &Job) -> Result<()>;

    /// Claim and return the earliest job due at `now`
    async fn pop_due(&self, lane: Lane, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Forget a job that completed
    async fn ack(&self, job: &Job) -> Result<()>;

    /// Reschedule jobs claimed at or before `claimed_before`. Returns how many.
    async fn requeue_stale(&self, lane: Lane, claimed_before: DateTime<Utc>) -> Result<usize>;

    /// Move an exhausted job to the lane's dead letters
    async fn bury(&self, job: &Job) -> Result<()>;

    /// Newest first
    async fn dead_jobs(&self, lane: Lane, limit: usize) -> Result<Vec<Job>>;

    /// Jobs scheduled on a lane, due or not
    async fn pending(&self, lane: Lane) -> Result<usize>;

    /// Jobs claimed on a lane and not yet settled
    async fn in_flight(&self, lane: Lane) -> Result<usize>;
}

#[derive(Default)]
struct Lanes {
    scheduled: HashMap<Lane, Vec<Job>>,
    claimed: HashMap<Lane, Vec<(DateTime<Utc>, Job)>>,
    dead: HashMap<Lane, Vec<Job>>,
}

impl Lanes {
    fn release(&mut self, job: &Job) {
        if let Some(claimed) = self.claimed.get_mut(&job.lane) {
            claimed.retain(|(_, j)| j.id != job.id);
        }
    }
}

/// Broker for single-process deployments and tests; jobs die with the process
#[derive(Default)]
pub struct MemoryBroker {
    lanes: Mutex<Lanes>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, job: &Job) -> Result<()> {
        let mut lanes = self.lanes.lock().await;
        lanes.release(job);
        let scheduled = lanes.scheduled.entry(job.lane).or_default();
        scheduled.retain(|j| j.id != job.id);
        scheduled.push(job.clone());
        Ok(())
    }

    async fn pop_due(&self, lane: Lane, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut lanes = self.lanes.lock().await;
        let Some(scheduled) = lanes.scheduled.get_mut(&lane) else {
            return Ok(None);
        };
        let next = scheduled
            .iter()
            .enumerate()
            .filter(|(_, j)| j.run_at <= now)
            .min_by_key(|(_, j)| j.run_at)
            .map(|(i, _)| i);
        let Some(job) = next.map(|i| scheduled.remove(i)) else {
            return Ok(None);
        };
        lanes.claimed.entry(lane).or_default().push((now, job.clone()));
        Ok(Some(job))
    }

    async fn ack(&self, job: &Job) -> Result<()> {
        self.lanes.lock().await.release(job);
        Ok(())
    }

    async fn requeue_stale(&self, lane: Lane, claimed_before: DateTime<Utc>) -> Result<usize> {
        let mut lanes = self.lanes.lock().await;
        let Some(claimed) = lanes.claimed.get_mut(&lane) else {
            return Ok(0);
        };
        let (stale, live): (Vec<_>, Vec<_>) = claimed
            .drain(..)
            .partition(|(claimed_at, _)| *claimed_at <= claimed_before);
        *claimed = live;

        let count = stale.len();
        lanes
            .scheduled
            .entry(lane)
            .or_default()
            .extend(stale.into_iter().map(|(_, job)| job));
        Ok(count)
    }

    async fn bury(&self, job: &Job) -> Result<()> {
        let mut lanes = self.lanes.lock().await;
        lanes.release(job);
        if let Some(scheduled) = lanes.scheduled.get_mut(&job.lane) {
            scheduled.retain(|j| j.id != job.id);
        }
        lanes.dead.entry(job.lane).or_default().push(job.clone());
        Ok(())
    }

    async fn dead_jobs(&self, lane: Lane, limit: usize) -> Result<Vec<Job>> {
        let lanes = self.lanes.lock().await;
        Ok(lanes
            .dead
            .get(&lane)
            .map(|dead| dead.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn pending(&self, lane: Lane) -> Result<usize> {
        Ok(self
            .lanes
            .lock()
            .await
            .scheduled
            .get(&lane)
            .map_or(0, Vec::len))
    }

    async fn in_flight(&self, lane: Lane) -> Result<usize> {
        Ok(self
            .lanes
            .lock()
            .await
            .claimed
            .get(&lane)
            .map_or(0, Vec::len))
    }
}
