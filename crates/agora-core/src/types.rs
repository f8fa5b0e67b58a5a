use serde::{Deserialize, Serialize};

/// Unique identifier of an agent instance.
pub type AgentId = String;

/// Identifier of a task handed out by a [`crate::Scheduler`].
pub type TaskId = String;

/// An address to notify: `(callbackUrl, callbackMethod)`.
///
/// Two callbacks are the same subscriber when both fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Callback {
    pub callback_url: String,
    pub callback_method: String,
}

impl Callback {
    pub fn new(callback_url: impl Into<String>, callback_method: impl Into<String>) -> Self {
        Self {
            callback_url: callback_url.into(),
            callback_method: callback_method.into(),
        }
    }
}

/// The routable address of an agent: `<base>/agents/<type>/<id>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentUrl {
    pub agent_type: String,
    pub agent_id: AgentId,
}

impl AgentUrl {
    /// Render the address of an agent under `base_url`.
    pub fn build(base_url: &str, agent_type: &str, agent_id: &str) -> String {
        format!(
            "{}/agents/{}/{}/",
            base_url.trim_end_matches('/'),
            agent_type,
            agent_id
        )
    }

    /// Extract the agent type and id from an agent address.
    ///
    /// Returns `None` for anything that is not a URL ending in
    /// `/agents/<type>/<id>` (with or without trailing slash).
    pub fn parse(agent_url: &str) -> Option<Self> {
        let parsed = url::Url::parse(agent_url).ok()?;
        let segments: Vec<&str> = parsed
            .path_segments()?
            .filter(|s| !s.is_empty())
            .collect();
        if segments.len() < 3 {
            return None;
        }
        let tail = &segments[segments.len() - 3..];
        if tail[0] != "agents" {
            return None;
        }
        Some(Self {
            agent_type: tail[1].to_string(),
            agent_id: tail[2].to_string(),
        })
    }

    /// Whether `agent_url` points below `base_url` (same scheme, host, port and path prefix).
    pub fn is_local(base_url: &str, agent_url: &str) -> bool {
        let (Ok(base), Ok(target)) = (url::Url::parse(base_url), url::Url::parse(agent_url)) else {
            return false;
        };
        base.scheme() == target.scheme()
            && base.host_str() == target.host_str()
            && base.port_or_known_default() == target.port_or_known_default()
            && target
                .path()
                .starts_with(base.path().trim_end_matches('/'))
    }
}
