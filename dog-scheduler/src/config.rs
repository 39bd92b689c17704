//! Scheduler and queue configuration.
//!
//! Both configs are plain structs with defaults and `with_*` setters.
//! Environment overrides follow the `PREFIX__FIELD` convention:
//!
//! ```bash
//! export DOG_SCHEDULER__THREAD_COUNT=4
//! export DOG_SCHEDULER__QUEUE_CAPACITY=256      # or "unbounded"
//! export DOG_SCHEDULER__ACK_TIMEOUT_MS=30000
//! ```

use std::time::Duration;

use tracing::warn;

/// Default prefix for environment overrides
pub const ENV_PREFIX: &str = "DOG_SCHEDULER__";

/// Configuration for the in-memory scheduler backend
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Name used in logs and thread names
    pub instance_name: String,
    /// Worker threads available for job callbacks. Manual-ack callbacks hold
    /// a thread until acknowledged, so this is also the in-flight ceiling.
    pub thread_count: usize,
    /// Longest the timer sleeps before re-checking triggers
    pub idle_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_name: "dog-scheduler".to_string(),
            thread_count: 10,
            idle_wait: Duration::from_secs(1),
        }
    }
}

impl SchedulerConfig {
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Set the worker pool size (at least one thread)
    pub fn with_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count.max(1);
        self
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// Defaults overridden by `DOG_SCHEDULER__*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(ENV_PREFIX, std::env::vars())
    }

    /// Defaults overridden by `prefix`-ed variables from any source
    pub fn from_vars<I>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        for (key, value) in scoped_vars(prefix, vars) {
            match key.as_str() {
                "instance_name" => config.instance_name = value,
                "thread_count" => {
                    if let Some(n) = parse_or_warn::<usize>(&key, &value) {
                        config = config.with_thread_count(n);
                    }
                }
                "idle_wait_ms" => {
                    if let Some(ms) = parse_or_warn::<u64>(&key, &value) {
                        config.idle_wait = Duration::from_millis(ms);
                    }
                }
                _ => {}
            }
        }
        config
    }
}

/// Capacity policy of the queue between scheduler and consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    /// Pushes block the firing scheduler thread while the queue is full
    Bounded(usize),
    /// Pushes never block; memory grows with consumer lag
    Unbounded,
}

/// Configuration for the queue binding of a job factory.
///
/// A bounded queue combined with manual acknowledgement and no ack timeout
/// can stall the scheduler: once every worker thread is blocked on a full
/// queue or an unacknowledged message, no further triggers fire until a
/// consumer makes progress.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: QueueCapacity,
    /// Upper bound on how long a firing thread waits for an ack; expiry is
    /// reported to the scheduler as a failed fire. `None` waits forever.
    pub ack_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: QueueCapacity::Bounded(1024),
            ack_timeout: None,
        }
    }
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self {
            capacity: QueueCapacity::Unbounded,
            ack_timeout: None,
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: QueueCapacity::Bounded(capacity.max(1)),
            ack_timeout: None,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    /// Defaults overridden by `DOG_SCHEDULER__*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(ENV_PREFIX, std::env::vars())
    }

    pub fn from_vars<I>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        for (key, value) in scoped_vars(prefix, vars) {
            match key.as_str() {
                "queue_capacity" if value.eq_ignore_ascii_case("unbounded") => {
                    config.capacity = QueueCapacity::Unbounded;
                }
                "queue_capacity" => {
                    if let Some(n) = parse_or_warn::<usize>(&key, &value) {
                        config.capacity = QueueCapacity::Bounded(n.max(1));
                    }
                }
                "ack_timeout_ms" => {
                    if let Some(ms) = parse_or_warn::<u64>(&key, &value) {
                        config.ack_timeout = Some(Duration::from_millis(ms));
                    }
                }
                _ => {}
            }
        }
        config
    }

    /// Warn about combinations that can stall the scheduler's worker pool.
    /// Returns `true` when the binding is at risk.
    pub fn check_liveness(&self, scheduler: &SchedulerConfig) -> bool {
        let at_risk = matches!(self.capacity, QueueCapacity::Bounded(_)) && self.ack_timeout.is_none();
        if at_risk {
            warn!(
                instance = %scheduler.instance_name,
                thread_count = scheduler.thread_count,
                capacity = ?self.capacity,
                "Bounded queue without ack timeout: a stalled consumer can exhaust the scheduler's worker threads"
            );
        }
        at_risk
    }
}

fn scoped_vars<'a, I>(prefix: &'a str, vars: I) -> impl Iterator<Item = (String, String)> + 'a
where
    I: IntoIterator<Item = (String, String)>,
    I::IntoIter: 'a,
{
    vars.into_iter().filter_map(move |(key, value)| {
        key.strip_prefix(prefix)
            .map(|stripped| (stripped.to_lowercase().replace("__", "."), value))
    })
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value, "Ignoring unparsable configuration override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_scheduler_env_overrides() {
        let config = SchedulerConfig::from_vars(
            ENV_PREFIX,
            vars(&[
                ("DOG_SCHEDULER__THREAD_COUNT", "0"),
                ("DOG_SCHEDULER__IDLE_WAIT_MS", "250"),
                ("DOG_SCHEDULER__INSTANCE_NAME", "billing"),
                ("OTHER__THREAD_COUNT", "99"),
            ]),
        );

        assert_eq!(config.thread_count, 1);
        assert_eq!(config.idle_wait, Duration::from_millis(250));
        assert_eq!(config.instance_name, "billing");
    }

    #[test]
    fn test_queue_env_overrides() {
        let config = QueueConfig::from_vars(
            ENV_PREFIX,
            vars(&[
                ("DOG_SCHEDULER__QUEUE_CAPACITY", "Unbounded"),
                ("DOG_SCHEDULER__ACK_TIMEOUT_MS", "1500"),
            ]),
        );

        assert_eq!(config.capacity, QueueCapacity::Unbounded);
        assert_eq!(config.ack_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_unparsable_override_keeps_default() {
        let config = QueueConfig::from_vars(ENV_PREFIX, vars(&[("DOG_SCHEDULER__QUEUE_CAPACITY", "lots")]));
        assert_eq!(config.capacity, QueueConfig::default().capacity);
    }

    #[test]
    #[traced_test]
    fn test_liveness_check() {
        let scheduler = SchedulerConfig::default();
        assert!(QueueConfig::bounded(8).check_liveness(&scheduler));
        assert!(!QueueConfig::bounded(8)
            .with_ack_timeout(Duration::from_secs(5))
            .check_liveness(&scheduler));
        assert!(!QueueConfig::unbounded().check_liveness(&scheduler));
        assert!(logs_contain("Bounded queue without ack timeout"));
    }
}
