use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgoraError, Result};

/// Named arguments of a call.
pub type Params = Map<String, Value>;

/// Error codes carried by [`RpcError`].
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const APPLICATION_ERROR: i64 = -32000;
    pub const ACCESS_DENIED: i64 = -32001;
    pub const NOT_FOUND: i64 = -32004;
    pub const CONTENTION: i64 = -32009;
    pub const TRANSPORT_ERROR: i64 = -32010;
}

/// Where the response of an asynchronous request must be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRoute {
    pub url: String,
    pub method: String,
}

/// A call addressed to an agent: `{method, params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Params,
    /// Set by `send_async`: the response is routed here instead of being
    /// returned to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackRoute>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
            callback: None,
        }
    }

    /// Build a request from any JSON value; `null` becomes empty params.
    pub fn from_value(method: impl Into<String>, params: Value) -> Result<Self> {
        let params = match params {
            Value::Null => Params::new(),
            Value::Object(map) => map,
            other => {
                let method = method.into();
                return Err(AgoraError::invalid_params(
                    method,
                    format!("params must be an object, got {other}"),
                ));
            }
        };
        Ok(Self::new(method, params))
    }

    pub fn with_callback(mut self, url: impl Into<String>, method: impl Into<String>) -> Self {
        self.callback = Some(CallbackRoute {
            url: url.into(),
            method: method.into(),
        });
        self
    }
}

/// The structured error of a failed call: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `{result: value} | {error: {code, message, data?}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            id: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: RpcError) -> Self {
        Self {
            id: None,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::err(e.to_rpc_error()),
        }
    }

    pub fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Unwrap the response, turning an error object into an [`AgoraError`].
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(AgoraError::from_rpc_error(err)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// The params object a callback receives for this response.
    pub fn to_callback_params(&self) -> Params {
        let mut params = Params::new();
        match &self.error {
            Some(err) => {
                params.insert(
                    "error".into(),
                    serde_json::to_value(err).unwrap_or(Value::Null),
                );
            }
            None => {
                params.insert(
                    "result".into(),
                    self.result.clone().unwrap_or(Value::Null),
                );
            }
        }
        params
    }
}
