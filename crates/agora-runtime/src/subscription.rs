//! # Subscriptions
//!
//! Per-agent publish/subscribe. Subscribers of an event are stored as an
//! ordered list of [`Callback`]s under `subscriptions.<event>` in the agent's
//! own state and mutated through conditional updates only.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use agora_core::{
    AgoraError, Callback, EventNotification, Result, RpcRequest, StateStore, Transport,
    WILDCARD_EVENT, subscription_key,
};

use crate::persist::{RetryPolicy, update_with_retry};

/// Subscription list and event fan-out of one agent.
#[derive(Clone)]
pub struct SubscriptionManager {
    state: Arc<dyn StateStore>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

fn decode(event: &str, value: Option<&Value>) -> Result<Vec<Callback>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            AgoraError::State(format!("corrupt subscription list for '{}': {}", event, e))
        }),
    }
}

impl SubscriptionManager {
    pub fn new(
        state: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            state,
            transport,
            policy,
        }
    }

    /// Current subscribers of `event`, in subscription order.
    pub fn subscribers(&self, event: &str) -> Result<Vec<Callback>> {
        decode(event, self.state.get(&subscription_key(event))?.as_ref())
    }

    /// Add `callback` to `event`. Returns `false` when it was already subscribed.
    pub async fn subscribe(&self, event: &str, callback: Callback) -> Result<bool> {
        let added = update_with_retry(
            self.state.as_ref(),
            &subscription_key(event),
            &self.policy,
            |current| {
                let mut list = decode(event, current)?;
                if list.contains(&callback) {
                    return Ok(None);
                }
                list.push(callback.clone());
                Ok(Some(serde_json::to_value(&list)?))
            },
        )
        .await?;
        if added {
            info!(
                agent_id = %self.state.owner_id(),
                event,
                callback_url = %callback.callback_url,
                callback_method = %callback.callback_method,
                "subscribed"
            );
        } else {
            debug!(agent_id = %self.state.owner_id(), event, "already subscribed");
        }
        Ok(added)
    }

    /// Remove the first entry equal to `callback`. Returns `false` (and
    /// writes nothing) when there was no such entry.
    pub async fn unsubscribe(&self, event: &str, callback: &Callback) -> Result<bool> {
        let removed = update_with_retry(
            self.state.as_ref(),
            &subscription_key(event),
            &self.policy,
            |current| {
                let mut list = decode(event, current)?;
                let Some(pos) = list.iter().position(|c| c == callback) else {
                    return Ok(None);
                };
                list.remove(pos);
                Ok(Some(serde_json::to_value(&list)?))
            },
        )
        .await?;
        if removed {
            info!(agent_id = %self.state.owner_id(), event, "unsubscribed");
        }
        Ok(removed)
    }

    /// Notify every subscriber of `event` and of the wildcard.
    ///
    /// A callback subscribed to both receives two deliveries. Delivery
    /// failures are logged and never reach the caller. Returns the number of
    /// deliveries that were handed to the transport.
    pub async fn trigger(&self, event: &str, params: Value) -> Result<usize> {
        if event == WILDCARD_EVENT {
            return Err(AgoraError::invalid_params(
                "trigger",
                "the wildcard event '*' cannot be triggered",
            ));
        }
        let agent_url = self.state.owner_url()?;

        let mut targets = self.subscribers(event)?;
        targets.extend(self.subscribers(WILDCARD_EVENT)?);
        if targets.is_empty() {
            debug!(agent_id = %self.state.owner_id(), event, "no subscribers");
            return Ok(0);
        }

        let notification = serde_json::to_value(EventNotification::new(agent_url, event, params))?;
        let deliveries = targets.iter().map(|cb| {
            let request = RpcRequest::from_value(cb.callback_method.clone(), notification.clone());
            async move {
                let outcome = match request {
                    Ok(request) => self.transport.deliver(&cb.callback_url, request).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &outcome {
                    warn!(
                        event,
                        callback_url = %cb.callback_url,
                        callback_method = %cb.callback_method,
                        error = %e,
                        "event delivery failed"
                    );
                }
                outcome.is_ok()
            }
        });
        let delivered = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();

        debug!(
            agent_id = %self.state.owner_id(),
            event,
            subscribers = targets.len(),
            delivered,
            "event triggered"
        );
        Ok(delivered)
    }
}
