use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently running members of one subtask group.
    pub max_parallel_subtasks: usize,
    /// Retry policy given to every planned subtask.
    pub subtask_retry: RetryPolicy,
    pub wait_for_server_timeout_ms: u64,
    /// How many optimistic-concurrency conflicts a state update absorbs
    /// before giving up.
    pub cas_retry_limit: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_subtasks: 10,
            subtask_retry: RetryPolicy::default(),
            wait_for_server_timeout_ms: 300_000,
            cas_retry_limit: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_parallelism(mut self, max: usize) -> Self {
        self.max_parallel_subtasks = max.max(1);
        self
    }

    pub fn with_subtask_retry(mut self, policy: RetryPolicy) -> Self {
        self.subtask_retry = policy;
        self
    }

    pub fn with_wait_for_server_timeout(mut self, timeout: Duration) -> Self {
        self.wait_for_server_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_cas_retry_limit(mut self, limit: u32) -> Self {
        self.cas_retry_limit = limit;
        self
    }

    pub fn wait_for_server_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_for_server_timeout_ms)
    }

    /// Policy for health waits: the attempt limit never undercuts the
    /// health wait itself.
    pub fn wait_for_server_retry(&self) -> RetryPolicy {
        let floor = self.wait_for_server_timeout() + WAIT_ATTEMPT_SLACK;
        match self.subtask_retry.timeout() {
            Some(limit) if limit < floor => self.subtask_retry.clone().with_timeout(floor),
            _ => self.subtask_retry.clone(),
        }
    }
}

/// Added on top of the health wait before a wait attempt is cut off.
const WAIT_ATTEMPT_SLACK: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_parallel_subtasks, 10);
        assert_eq!(config.cas_retry_limit, 10);
        assert_eq!(config.wait_for_server_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_default_config_limits_every_attempt() {
        let config = OrchestratorConfig::default();
        let limit = config.subtask_retry.timeout().unwrap();
        assert!(limit >= config.wait_for_server_timeout());
        assert_eq!(config.wait_for_server_retry().timeout(), Some(limit));
    }

    #[test]
    fn test_wait_retry_outlasts_health_wait() {
        let config = OrchestratorConfig::default()
            .with_subtask_retry(RetryPolicy::new(2).with_timeout(Duration::from_secs(10)))
            .with_wait_for_server_timeout(Duration::from_secs(60));

        let wait = config.wait_for_server_retry();
        assert_eq!(wait.max_attempts, 2);
        assert_eq!(wait.timeout(), Some(Duration::from_secs(65)));
        assert_eq!(
            config.subtask_retry.timeout(),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_parallelism_never_zero() {
        let config = OrchestratorConfig::default().with_parallelism(0);
        assert_eq!(config.max_parallel_subtasks, 1);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"max_parallel_subtasks": 4}"#).unwrap();

        assert_eq!(config.max_parallel_subtasks, 4);
        assert_eq!(config.subtask_retry, RetryPolicy::default());
    }
}
