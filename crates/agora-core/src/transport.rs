use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::rpc::{RpcRequest, RpcResponse};

/// Moves requests between agents.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to `url` and wait for the response.
    ///
    /// An `Err` means the call itself failed (unreachable peer, malformed
    /// reply); an error *response* is returned as `Ok(RpcResponse)`.
    async fn call(&self, url: &str, request: RpcRequest) -> Result<RpcResponse>;

    /// Fire-and-forget delivery. Returns once the request has been handed
    /// off; failures after that point are only logged by the transport.
    async fn deliver(&self, url: &str, request: RpcRequest) -> Result<()>;

    /// `call` followed by unwrapping the response into a value or error.
    async fn call_value(&self, url: &str, request: RpcRequest) -> Result<Value> {
        self.call(url, request).await?.into_result()
    }
}
