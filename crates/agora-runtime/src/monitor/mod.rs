//! # Result monitors
//!
//! A [`Monitor`] binds a remote target (`url` + `method` + `params`) to any
//! combination of a local cache, a poll schedule and a push subscription.
//! Monitors live in their owning agent's state under `_monitors`, a map keyed
//! by monitor id that is only ever replaced through conditional updates.

pub mod cache;
pub mod engine;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agora_core::{AgentId, TaskId};

pub use cache::{Cache, CacheConstructor, CacheRegistry, LATEST_CACHE_KIND, LatestValueCache};
pub use engine::{AgentHandle, AgentResolver, ResultMonitorEngine};

/// State key of the monitor map.
pub const MONITORS_KEY: &str = "_monitors";

/// Method scheduled on the owning agent for every poll tick.
pub const POLL_METHOD: &str = "onMonitorPoll";

/// Method a push target calls back on the owning agent.
pub const PUSH_CALLBACK_METHOD: &str = "onMonitorPush";

/// A persisted monitor record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    pub agent_id: AgentId,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Invoked on the owning agent with `{result}` whenever a value arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_method: Option<String>,
    #[serde(default)]
    pub scheduler_ids: Vec<TaskId>,
    #[serde(default)]
    pub remote_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_type: Option<String>,
}

/// Periodic re-fetch of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub interval: Duration,
}

impl Poll {
    pub fn every(interval: Duration) -> Self {
        Self { interval }
    }
}

/// Target-initiated updates, on a timer, on an event, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Push {
    pub interval: Option<Duration>,
    pub event: Option<String>,
}

impl Push {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            event: None,
        }
    }

    pub fn on_event(event: impl Into<String>) -> Self {
        Self {
            interval: None,
            event: Some(event.into()),
        }
    }
}

/// Something that can be attached to a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorFeature {
    /// A cache of the given kind tag.
    Cache(String),
    Poll(Poll),
    Push(Push),
}
