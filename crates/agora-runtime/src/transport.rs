//! Reference transports: JSON over HTTP, and an in-process shortcut for
//! agents living in the same host.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use agora_config::TransportConfig;
use agora_core::{AgentUrl, AgoraError, Result, RpcRequest, RpcResponse, Transport};

use crate::capability::Origin;
use crate::host::AgentHost;

// ── HTTP ───────────────────────────────────────────────────────

/// POSTs requests as JSON to the agent URL.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` of zero means no timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AgoraError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.timeout_secs))
    }
}

async fn post(client: &reqwest::Client, url: &str, request: &RpcRequest) -> Result<RpcResponse> {
    let transport_err = |reason: String| AgoraError::Transport {
        url: url.to_string(),
        reason,
    };

    let resp = client
        .post(url)
        .json(request)
        .send()
        .await
        .map_err(|e| transport_err(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(transport_err(format!("HTTP {}: {}", status, body)));
    }

    resp.json::<RpcResponse>()
        .await
        .map_err(|e| transport_err(format!("invalid response: {}", e)))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, url: &str, request: RpcRequest) -> Result<RpcResponse> {
        debug!(url, method = %request.method, "http call");
        post(&self.client, url, &request).await
    }

    async fn deliver(&self, url: &str, request: RpcRequest) -> Result<()> {
        let client = self.client.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            match post(&client, &url, &request).await {
                Ok(resp) => {
                    if let Some(err) = resp.error {
                        warn!(url = %url, method = %request.method, code = err.code, error = %err.message, "delivery rejected");
                    }
                }
                Err(e) => warn!(url = %url, method = %request.method, error = %e, "delivery failed"),
            }
        });
        Ok(())
    }
}

// ── Local ──────────────────────────────────────────────────────

/// Hands requests for agents under the host's public URL straight to the
/// host; everything else goes to `remote`.
pub struct LocalTransport {
    host: Weak<AgentHost>,
    base_url: Option<String>,
    remote: Arc<dyn Transport>,
}

impl LocalTransport {
    pub fn new(host: Weak<AgentHost>, base_url: Option<String>, remote: Arc<dyn Transport>) -> Self {
        Self {
            host,
            base_url,
            remote,
        }
    }

    /// The local target of `url`, if it addresses this host.
    fn local_target(&self, url: &str) -> Option<AgentUrl> {
        let base = self.base_url.as_deref()?;
        if !AgentUrl::is_local(base, url) {
            return None;
        }
        AgentUrl::parse(url)
    }

    fn host(&self, url: &str) -> Result<Arc<AgentHost>> {
        self.host.upgrade().ok_or_else(|| AgoraError::Transport {
            url: url.to_string(),
            reason: "host has shut down".into(),
        })
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, url: &str, request: RpcRequest) -> Result<RpcResponse> {
        let Some(target) = self.local_target(url) else {
            return self.remote.call(url, request).await;
        };
        let host = self.host(url)?;
        Ok(host
            .dispatch_to(&target.agent_type, &target.agent_id, request, Origin::Remote)
            .await)
    }

    async fn deliver(&self, url: &str, request: RpcRequest) -> Result<()> {
        let Some(target) = self.local_target(url) else {
            return self.remote.deliver(url, request).await;
        };
        let host = self.host(url)?;
        tokio::spawn(async move {
            let method = request.method.clone();
            let resp = host
                .dispatch_to(&target.agent_type, &target.agent_id, request, Origin::Remote)
                .await;
            if let Some(err) = resp.error {
                warn!(
                    agent_id = %target.agent_id,
                    method = %method,
                    code = err.code,
                    error = %err.message,
                    "local delivery rejected"
                );
            }
        });
        Ok(())
    }
}
