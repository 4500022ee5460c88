//! Redis broker.
//!
//! Keys, per lane:
//! - `{prefix}:{lane}:scheduled` sorted set of job ids scored by `run_at` millis
//! - `{prefix}:{lane}:claimed` sorted set of claimed job ids scored by claim millis
//! - `{prefix}:{lane}:dead` list of exhausted job bodies, newest at the head
//!
//! Job bodies live in the `{prefix}:jobs` hash until the job is acked or
//! buried. Claiming moves an id from `scheduled` to `claimed` in one script.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use tracing::info;

use super::{Broker, Job, Lane};
use crate::error::{PipelineError, Result};

/// KEYS: scheduled, claimed, jobs. ARGV: due millis, claim millis.
const CLAIM_SCRIPT: &str = r"
local id = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)[1]
if not id then return false end
redis.call('ZREM', KEYS[1], id)
local body = redis.call('HGET', KEYS[3], id)
if not body then return false end
redis.call('ZADD', KEYS[2], ARGV[2], id)
return body
";

/// KEYS: claimed, scheduled. ARGV: cutoff millis, run_at millis.
const REQUEUE_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('ZADD', KEYS[2], ARGV[2], id)
end
return #ids
";

fn queue_error(err: redis::RedisError) -> PipelineError {
    PipelineError::Queue(err.to_string())
}

fn encode(job: &Job) -> Result<String> {
    serde_json::to_string(job).map_err(|e| PipelineError::Queue(e.to_string()))
}

fn decode(body: &str) -> Result<Job> {
    serde_json::from_str(body).map_err(|e| PipelineError::Queue(e.to_string()))
}

pub struct RedisBroker {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisBroker {
    /// Connect to `url` (e.g. `redis://localhost:6379`)
    pub async fn connect(url: &str, key_prefix: Option<&str>) -> Result<Self> {
        let client = Client::open(url).map_err(queue_error)?;
        let conn = ConnectionManager::new(client).await.map_err(queue_error)?;

        info!("Connected to Redis job broker");

        Ok(Self {
            conn,
            key_prefix: key_prefix.unwrap_or("paidin").to_string(),
        })
    }

    fn scheduled_key(&self, lane: Lane) -> String {
        format!("{}:{}:scheduled", self.key_prefix, lane)
    }

    fn claimed_key(&self, lane: Lane) -> String {
        format!("{}:{}:claimed", self.key_prefix, lane)
    }

    fn dead_key(&self, lane: Lane) -> String {
        format!("{}:{}:dead", self.key_prefix, lane)
    }

    fn jobs_key(&self) -> String {
        format!("{}:jobs", self.key_prefix)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let id = job.id.to_string();
        let _: () = conn
            .hset(self.jobs_key(), &id, encode(job)?)
            .await
            .map_err(queue_error)?;
        let _: () = conn
            .zadd(self.scheduled_key(job.lane), &id, job.run_at.timestamp_millis())
            .await
            .map_err(queue_error)?;
        let _: () = conn.zrem(self.claimed_key(job.lane), &id).await.map_err(queue_error)?;
        Ok(())
    }

    async fn pop_due(&self, lane: Lane, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let body: Option<String> = Script::new(CLAIM_SCRIPT)
            .key(self.scheduled_key(lane))
            .key(self.claimed_key(lane))
            .key(self.jobs_key())
            .arg(now.timestamp_millis())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;
        body.as_deref().map(decode).transpose()
    }

    async fn ack(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let id = job.id.to_string();
        let _: () = conn.zrem(self.claimed_key(job.lane), &id).await.map_err(queue_error)?;
        let _: () = conn.hdel(self.jobs_key(), &id).await.map_err(queue_error)?;
        Ok(())
    }

    async fn requeue_stale(&self, lane: Lane, claimed_before: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let requeued: usize = Script::new(REQUEUE_SCRIPT)
            .key(self.claimed_key(lane))
            .key(self.scheduled_key(lane))
            .arg(claimed_before.timestamp_millis())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(queue_error)?;
        if requeued > 0 {
            tracing::warn!(%lane, requeued, "Requeued stale job claims");
        }
        Ok(requeued)
    }

    async fn bury(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let id = job.id.to_string();
        let _: () = conn
            .lpush(self.dead_key(job.lane), encode(job)?)
            .await
            .map_err(queue_error)?;
        let _: () = conn.zrem(self.scheduled_key(job.lane), &id).await.map_err(queue_error)?;
        let _: () = conn.zrem(self.claimed_key(job.lane), &id).await.map_err(queue_error)?;
        let _: () = conn.hdel(self.jobs_key(), &id).await.map_err(queue_error)?;
        Ok(())
    }

    async fn dead_jobs(&self, lane: Lane, limit: usize) -> Result<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let bodies: Vec<String> = conn
            .lrange(self.dead_key(lane), 0, stop)
            .await
            .map_err(queue_error)?;
        bodies.iter().map(|b| decode(b)).collect()
    }

    async fn pending(&self, lane: Lane) -> Result<usize> {
        let mut conn = self.conn.clone();
        conn.zcard(self.scheduled_key(lane)).await.map_err(queue_error)
    }

    async fn in_flight(&self, lane: Lane) -> Result<usize> {
        let mut conn = self.conn.clone();
        conn.zcard(self.claimed_key(lane)).await.map_err(queue_error)
    }
}
