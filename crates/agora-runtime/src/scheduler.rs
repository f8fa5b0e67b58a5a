//! # Interval scheduler
//!
//! Delivers a request to an agent every `interval` on a tokio task. Each
//! agent gets its own [`Scheduler`] view through [`IntervalScheduler::for_agent`],
//! which addresses every scheduled request to that agent's URL.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_core::{AgoraError, Result, RpcRequest, Scheduler, TaskId, Transport};

struct ScheduledTask {
    agent_url: String,
    method: String,
    handle: JoinHandle<()>,
}

/// Process-wide set of periodic tasks.
pub struct IntervalScheduler {
    transport: Arc<dyn Transport>,
    tasks: DashMap<TaskId, ScheduledTask>,
}

impl IntervalScheduler {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            tasks: DashMap::new(),
        })
    }

    /// The scheduler seen by the agent at `agent_url`. Without a URL the
    /// agent cannot be reached and every `schedule` fails.
    pub fn for_agent(self: &Arc<Self>, agent_url: Option<String>) -> Arc<dyn Scheduler> {
        Arc::new(AgentScheduler {
            inner: Arc::clone(self),
            agent_url,
        })
    }

    fn spawn(&self, agent_url: String, request: RpcRequest, interval: Duration) -> Result<TaskId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AgoraError::Other(anyhow_error(e)))?;
        let interval = interval.max(Duration::from_millis(1));
        let task_id = Uuid::new_v4().to_string();

        let transport = Arc::clone(&self.transport);
        let url = agent_url.clone();
        let method = request.method.clone();
        let id = task_id.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!(task_id = %id, url = %url, method = %request.method, "scheduled delivery");
                if let Err(e) = transport.deliver(&url, request.clone()).await {
                    warn!(task_id = %id, url = %url, error = %e, "scheduled delivery failed");
                }
            }
        });

        info!(
            task_id = %task_id,
            url = %agent_url,
            method = %method,
            interval_ms = interval.as_millis() as u64,
            "scheduled periodic task"
        );
        self.tasks.insert(
            task_id.clone(),
            ScheduledTask {
                agent_url,
                method,
                handle,
            },
        );
        Ok(task_id)
    }

    /// Stop a task. Returns whether it existed.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.tasks.remove(task_id) {
            Some((_, task)) => {
                task.handle.abort();
                debug!(task_id, url = %task.agent_url, method = %task.method, "task cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every task addressed to `agent_url`. Returns how many were stopped.
    pub fn cancel_agent(&self, agent_url: &str) -> usize {
        let ids: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.value().agent_url == agent_url)
            .map(|t| t.key().clone())
            .collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        for task in self.tasks.iter() {
            task.value().handle.abort();
        }
    }
}

fn anyhow_error(e: tokio::runtime::TryCurrentError) -> anyhow::Error {
    anyhow::anyhow!("no tokio runtime to run scheduled tasks on: {e}")
}

/// One agent's view of the [`IntervalScheduler`].
struct AgentScheduler {
    inner: Arc<IntervalScheduler>,
    agent_url: Option<String>,
}

impl Scheduler for AgentScheduler {
    fn schedule(&self, request: RpcRequest, interval: Duration) -> Result<TaskId> {
        let url = self.agent_url.clone().ok_or_else(|| {
            AgoraError::Unbound("cannot schedule for an agent without a URL".into())
        })?;
        self.inner.spawn(url, request, interval)
    }

    fn cancel(&self, task_id: &str) -> Result<()> {
        self.inner.cancel(task_id);
        Ok(())
    }
}
