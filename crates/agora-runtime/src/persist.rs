//! Optimistic read-modify-write on a single state key.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use agora_config::MonitorConfig;
use agora_core::{AgoraError, Result, StateStore};

/// How often and how patiently a conflicting conditional update is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            max_attempts: config.cas_max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.cas_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.cas_max_backoff_ms),
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_backoff)
    }
}

/// Apply `mutate` to the value under `key` until the conditional update wins.
///
/// `mutate` receives the current snapshot (`None` when absent) and returns the
/// candidate to write, or `None` when there is nothing to change. Returns
/// whether a write happened. Each attempt re-reads the snapshot, so a loser
/// of a race re-applies its change on top of the winner's.
pub async fn update_with_retry<F>(
    state: &dyn StateStore,
    key: &str,
    policy: &RetryPolicy,
    mut mutate: F,
) -> Result<bool>
where
    F: FnMut(Option<&Value>) -> Result<Option<Value>>,
{
    let mut backoff = policy.initial_backoff;
    for attempt in 1..=policy.max_attempts {
        let snapshot = state.get(key)?;
        let Some(candidate) = mutate(snapshot.as_ref())? else {
            return Ok(false);
        };
        if state.conditional_update(key, candidate, snapshot.as_ref())? {
            return Ok(true);
        }
        debug!(
            agent_id = %state.owner_id(),
            key,
            attempt,
            "conditional update lost a race, retrying"
        );
        if attempt < policy.max_attempts {
            tokio::time::sleep(backoff).await;
            backoff = policy.next_backoff(backoff);
        }
    }
    Err(AgoraError::Contention {
        key: key.to_string(),
        attempts: policy.max_attempts,
    })
}
