//! Server configuration
//!
//! Read from the environment after `.env` is loaded. Provider adapters read
//! their own variables through their `from_env` constructors.

use std::time::Duration;

use anyhow::{Context, bail};

/// Where queued jobs live
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueSetting {
    /// No broker; enqueues are dropped and webhooks are handled inline
    Disabled,

    /// In-process broker
    Memory,

    /// Redis broker at this URL
    Redis(String),
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,

    /// Use in-process sandbox providers instead of live APIs
    pub sandbox: bool,

    pub encryption_key: String,
    pub admin_token: Option<String>,
    pub queue: QueueSetting,
    pub funding_delay: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("sandbox", &self.sandbox)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("queue", &self.queue_mode())
            .field("funding_delay", &self.funding_delay)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let encryption_key = get("PAIDIN_ENCRYPTION_KEY").context("PAIDIN_ENCRYPTION_KEY not set")?;

        let sandbox = match get("PAIDIN_SANDBOX").as_deref() {
            None | Some("0" | "false" | "no") => false,
            Some("1" | "true" | "yes") => true,
            Some(other) => bail!("PAIDIN_SANDBOX must be true or false, got '{other}'"),
        };

        let queue = match get("QUEUE_URL") {
            None => QueueSetting::Disabled,
            Some(url) if url == "memory" => QueueSetting::Memory,
            Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
                QueueSetting::Redis(url)
            }
            Some(_) => bail!("QUEUE_URL must be 'memory' or a redis:// URL"),
        };

        let funding_delay = match get("FUNDING_JOB_DELAY_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse()
                    .with_context(|| format!("FUNDING_JOB_DELAY_SECS is not a number: '{secs}'"))?,
            ),
            None => paidin_pipeline::jobs::DEFAULT_FUNDING_DELAY,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            sandbox,
            encryption_key,
            admin_token: get("PAIDIN_ADMIN_TOKEN"),
            queue,
            funding_delay,
        })
    }

    pub const fn queue_mode(&self) -> &'static str {
        match self.queue {
            QueueSetting::Disabled => "disabled",
            QueueSetting::Memory => "memory",
            QueueSetting::Redis(_) => "redis",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("PAIDIN_ENCRYPTION_KEY", "k")]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert!(!config.sandbox);
        assert_eq!(config.queue, QueueSetting::Disabled);
        assert_eq!(config.funding_delay, Duration::from_secs(5));
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_encryption_key_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("PAIDIN_ENCRYPTION_KEY", "  ")]).is_err());
    }

    #[test]
    fn test_queue_settings() {
        let memory = config(&[("PAIDIN_ENCRYPTION_KEY", "k"), ("QUEUE_URL", "memory")]).unwrap();
        assert_eq!(memory.queue, QueueSetting::Memory);

        let redis = config(&[
            ("PAIDIN_ENCRYPTION_KEY", "k"),
            ("QUEUE_URL", "redis://localhost:6379"),
        ])
        .unwrap();
        assert_eq!(redis.queue_mode(), "redis");

        assert!(config(&[("PAIDIN_ENCRYPTION_KEY", "k"), ("QUEUE_URL", "amqp://x")]).is_err());
    }

    #[test]
    fn test_sandbox_and_delay() {
        let config = config(&[
            ("PAIDIN_ENCRYPTION_KEY", "k"),
            ("PAIDIN_SANDBOX", "true"),
            ("FUNDING_JOB_DELAY_SECS", "0"),
        ])
        .unwrap();
        assert!(config.sandbox);
        assert_eq!(config.funding_delay, Duration::ZERO);

        assert!(config_with_delay("soon").is_err());
    }

    fn config_with_delay(delay: &str) -> anyhow::Result<Config> {
        config(&[("PAIDIN_ENCRYPTION_KEY", "k"), ("FUNDING_JOB_DELAY_SECS", delay)])
    }

    #[test]
    fn test_debug_redacts_admin_token() {
        let config = config(&[("PAIDIN_ENCRYPTION_KEY", "k"), ("PAIDIN_ADMIN_TOKEN", "hunter2")]).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
    }
}
