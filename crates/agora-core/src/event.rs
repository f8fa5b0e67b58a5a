use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscribing to this event name means "all events". It cannot be triggered.
pub const WILDCARD_EVENT: &str = "*";

/// State key under which the subscribers of `event` are stored.
pub fn subscription_key(event: &str) -> String {
    format!("subscriptions.{event}")
}

/// Payload delivered to every subscriber when an event is triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    /// URL of the agent that triggered the event.
    pub agent: String,
    pub event: String,
    #[serde(default)]
    pub params: Value,
}

impl EventNotification {
    pub fn new(agent: impl Into<String>, event: impl Into<String>, params: Value) -> Self {
        Self {
            agent: agent.into(),
            event: event.into(),
            params,
        }
    }
}
