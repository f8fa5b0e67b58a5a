use serde_json::{Value, json};
use thiserror::Error;

use crate::rpc::{RpcError, codes};

/// Unified error type for the entire Agora runtime.
#[derive(Error, Debug)]
pub enum AgoraError {
    // ── Dispatch errors ────────────────────────────────────────
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid params: {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    // ── Messaging errors ───────────────────────────────────────
    #[error("transport error: {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("agent address unavailable: {0}")]
    Unbound(String),

    // ── Lookup errors ──────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    // ── State errors ───────────────────────────────────────────
    #[error("state contention on '{key}': gave up after {attempts} attempts")]
    Contention { key: String, attempts: u32 },

    #[error("state backend error: {0}")]
    State(String),

    // ── Application errors ─────────────────────────────────────
    #[error("{message}")]
    Application {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AgoraError>;

impl AgoraError {
    /// Shorthand for an application-level error with the default code.
    pub fn application(message: impl Into<String>) -> Self {
        AgoraError::Application {
            code: codes::APPLICATION_ERROR,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(method: impl Into<String>, reason: impl Into<String>) -> Self {
        AgoraError::InvalidParams {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// The JSON-RPC error code this error is reported under.
    pub fn code(&self) -> i64 {
        match self {
            AgoraError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            AgoraError::AccessDenied(_) => codes::ACCESS_DENIED,
            AgoraError::InvalidParams { .. } => codes::INVALID_PARAMS,
            AgoraError::Transport { .. } => codes::TRANSPORT_ERROR,
            AgoraError::NotFound(_) => codes::NOT_FOUND,
            AgoraError::Contention { .. } => codes::CONTENTION,
            AgoraError::Application { code, .. } => *code,
            AgoraError::Unbound(_)
            | AgoraError::Serialization(_)
            | AgoraError::State(_)
            | AgoraError::Config(_)
            | AgoraError::Io(_)
            | AgoraError::Other(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Convert into the structured error carried by a response.
    pub fn to_rpc_error(&self) -> RpcError {
        let data = match self {
            AgoraError::Application { data, .. } => data.clone(),
            AgoraError::Contention { key, attempts } => {
                Some(json!({"key": key, "attempts": attempts}))
            }
            AgoraError::Transport { url, .. } => Some(json!({"url": url})),
            _ => None,
        };
        RpcError {
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }

    /// Map a remote error response back into the local taxonomy.
    ///
    /// Dispatch, contention and transport codes round-trip to their variants;
    /// everything else surfaces as an `Application` error carrying the remote
    /// code and data.
    pub fn from_rpc_error(err: RpcError) -> Self {
        match err.code {
            codes::METHOD_NOT_FOUND => AgoraError::MethodNotFound(err.message),
            codes::ACCESS_DENIED => AgoraError::AccessDenied(err.message),
            codes::INVALID_PARAMS => AgoraError::InvalidParams {
                method: String::new(),
                reason: err.message,
            },
            codes::NOT_FOUND => AgoraError::NotFound(err.message),
            codes::CONTENTION => {
                let data = err.data.unwrap_or(Value::Null);
                AgoraError::Contention {
                    key: data["key"].as_str().unwrap_or_default().to_string(),
                    attempts: data["attempts"]
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .unwrap_or(0),
                }
            }
            codes::TRANSPORT_ERROR => AgoraError::Transport {
                url: err
                    .data
                    .as_ref()
                    .and_then(|d| d["url"].as_str())
                    .unwrap_or_default()
                    .to_string(),
                reason: err.message,
            },
            _ => AgoraError::Application {
                code: err.code,
                message: err.message,
                data: err.data,
            },
        }
    }
}
