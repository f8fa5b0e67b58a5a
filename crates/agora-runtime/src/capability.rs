//! # Capabilities
//!
//! The callable surface of an agent type. Each type declares an explicit
//! table of [`Capability`] entries when it is registered with the host; the
//! table is merged with the built-ins every agent carries and frozen into a
//! [`CapabilityRegistry`] that answers listing and access checks.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Value, json};
use tracing::warn;

use agora_core::{AgoraError, Params, Result};

/// Type of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
    Void,
}

impl TypeTag {
    /// Whether `value` is acceptable for this type. `null` only matches `Any` and `Void`.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            TypeTag::String => value.is_string(),
            TypeTag::Integer => value.is_i64() || value.is_u64(),
            TypeTag::Number => value.is_number(),
            TypeTag::Boolean => value.is_boolean(),
            TypeTag::Object => value.is_object(),
            TypeTag::Array => value.is_array(),
            TypeTag::Any => true,
            TypeTag::Void => value.is_null(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::String => "String",
            TypeTag::Integer => "Integer",
            TypeTag::Number => "Number",
            TypeTag::Boolean => "Boolean",
            TypeTag::Object => "Object",
            TypeTag::Array => "Array",
            TypeTag::Any => "Any",
            TypeTag::Void => "void",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named parameter of a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub type_tag: TypeTag,
    pub required: bool,
}

/// Who may invoke a capability through dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Callable by anyone.
    Public,
    /// Callable only by the host itself, on the agent's behalf.
    Private,
    /// Never callable through dispatch.
    Unavailable,
}

/// Where a dispatched request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// A named, typed, access-controlled operation of an agent type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub returns: TypeTag,
    pub access: Access,
    /// Listing only. An invisible capability is still callable.
    pub visible: bool,
    /// All named arguments are handed over as one object instead of being
    /// matched against `params`.
    pub packed: bool,
}

impl Capability {
    /// A public, visible capability without parameters returning nothing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: TypeTag::Void,
            access: Access::Public,
            visible: true,
            packed: false,
        }
    }

    /// A capability taking a single untyped object that receives every
    /// named argument of the call.
    pub fn packed(name: impl Into<String>, param_name: impl Into<String>) -> Self {
        let mut cap = Self::new(name);
        cap.params.push(ParamSpec {
            name: param_name.into(),
            type_tag: TypeTag::Object,
            required: false,
        });
        cap.packed = true;
        cap
    }

    pub fn param(mut self, name: impl Into<String>, type_tag: TypeTag) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            type_tag,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, type_tag: TypeTag) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            type_tag,
            required: false,
        });
        self
    }

    pub fn returns(mut self, type_tag: TypeTag) -> Self {
        self.returns = type_tag;
        self
    }

    pub fn private(mut self) -> Self {
        self.access = Access::Private;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.access = Access::Unavailable;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Human-readable signature, optional parameters bracketed:
    /// `String greet(String name, [Integer times])`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                if p.required {
                    format!("{} {}", p.type_tag, p.name)
                } else {
                    format!("[{} {}]", p.type_tag, p.name)
                }
            })
            .collect();
        format!("{} {}({})", self.returns, self.name, params.join(", "))
    }

    /// Structured description: `{method, params:[{name,type,required}], result:{type}}`.
    pub fn describe(&self) -> Value {
        let params: Vec<Value> = self
            .params
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "type": p.type_tag.as_str(),
                    "required": p.required,
                })
            })
            .collect();
        json!({
            "method": self.name,
            "params": params,
            "result": { "type": self.returns.as_str() },
        })
    }

    /// Check named arguments against the parameter table.
    ///
    /// A parameter set to `null` counts as missing. Arguments without a
    /// matching parameter are ignored.
    pub fn check_params(&self, params: &Params) -> Result<()> {
        if self.packed {
            return Ok(());
        }
        for spec in &self.params {
            match params.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(AgoraError::invalid_params(
                            &self.name,
                            format!("missing required parameter '{}'", spec.name),
                        ));
                    }
                }
                Some(value) => {
                    if !spec.type_tag.accepts(value) {
                        return Err(AgoraError::invalid_params(
                            &self.name,
                            format!(
                                "parameter '{}' must be of type {}",
                                spec.name, spec.type_tag
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Built-ins ──────────────────────────────────────────────────

/// Capabilities every agent type carries, whatever it declares.
///
/// The monitor callbacks are public so remote targets can reach them.
/// `onMonitorPoll` only re-fetches from the monitor's stored target, and
/// `onMonitorPush` is refused unless its `pushId` belongs to the monitor.
pub fn builtin_capabilities() -> Vec<Capability> {
    vec![
        Capability::new("getId").returns(TypeTag::String),
        Capability::new("getType").returns(TypeTag::String),
        Capability::new("getUrl").returns(TypeTag::String),
        Capability::new("getDescription").returns(TypeTag::String),
        Capability::new("getVersion").returns(TypeTag::String),
        Capability::new("getMethods")
            .optional("asJSON", TypeTag::Boolean)
            .returns(TypeTag::Array),
        Capability::new("subscribe")
            .param("event", TypeTag::String)
            .param("callbackUrl", TypeTag::String)
            .param("callbackMethod", TypeTag::String),
        Capability::new("unsubscribe")
            .param("event", TypeTag::String)
            .param("callbackUrl", TypeTag::String)
            .param("callbackMethod", TypeTag::String),
        Capability::new("registerPush")
            .param("pushId", TypeTag::String)
            .param("callbackUrl", TypeTag::String)
            .param("callbackMethod", TypeTag::String)
            .param("monitorId", TypeTag::String)
            .param("method", TypeTag::String)
            .optional("params", TypeTag::Object)
            .optional("interval", TypeTag::Integer)
            .optional("event", TypeTag::String)
            .returns(TypeTag::Array)
            .hidden(),
        Capability::new("unregisterPush")
            .param("pushId", TypeTag::String)
            .hidden(),
        Capability::new("onPushTick").param("pushId", TypeTag::String).hidden(),
        Capability::new("onPushEvent")
            .param("agent", TypeTag::String)
            .param("event", TypeTag::String)
            .optional("params", TypeTag::Any)
            .hidden(),
        Capability::new("onMonitorPoll")
            .param("monitorId", TypeTag::String)
            .hidden(),
        Capability::new("onMonitorPush")
            .param("monitorId", TypeTag::String)
            .param("pushId", TypeTag::String)
            .optional("result", TypeTag::Any)
            .hidden(),
        Capability::new("trigger")
            .param("event", TypeTag::String)
            .optional("params", TypeTag::Any)
            .unavailable()
            .hidden(),
    ]
}

// ── Registry ───────────────────────────────────────────────────

/// The frozen capability table of one agent type.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    agent_type: String,
    entries: BTreeMap<String, Capability>,
    builtins: Vec<String>,
}

impl CapabilityRegistry {
    /// Merge the built-ins with the capabilities declared by `agent_type`.
    /// A declared capability never replaces a built-in of the same name.
    pub fn new(agent_type: impl Into<String>, declared: Vec<Capability>) -> Self {
        let agent_type = agent_type.into();
        let mut entries = BTreeMap::new();
        let mut builtins = Vec::new();
        for cap in builtin_capabilities() {
            builtins.push(cap.name.clone());
            entries.insert(cap.name.clone(), cap);
        }
        for cap in declared {
            if entries.contains_key(&cap.name) {
                warn!(
                    agent_type = %agent_type,
                    method = %cap.name,
                    "declared capability clashes with an existing one, ignoring"
                );
                continue;
            }
            entries.insert(cap.name.clone(), cap);
        }
        Self {
            agent_type,
            entries,
            builtins,
        }
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.get(name)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.iter().any(|b| b == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visible, callable capabilities sorted by name, either as structured
    /// descriptions or as signature strings.
    pub fn list(&self, structured: bool) -> Vec<Value> {
        self.entries
            .values()
            .filter(|c| c.visible && c.access != Access::Unavailable)
            .map(|c| {
                if structured {
                    c.describe()
                } else {
                    Value::String(c.signature())
                }
            })
            .collect()
    }

    /// Resolve `name` for a call from `origin` and validate its arguments.
    pub fn resolve(&self, name: &str, params: &Params, origin: Origin) -> Result<&Capability> {
        let cap = self.entries.get(name).ok_or_else(|| {
            AgoraError::MethodNotFound(format!("{}.{}", self.agent_type, name))
        })?;
        match (cap.access, origin) {
            (Access::Unavailable, _) => {
                return Err(AgoraError::AccessDenied(format!(
                    "{}.{} is not callable",
                    self.agent_type, name
                )));
            }
            (Access::Private, Origin::Remote) => {
                return Err(AgoraError::AccessDenied(format!(
                    "{}.{} is private",
                    self.agent_type, name
                )));
            }
            _ => {}
        }
        cap.check_params(params)?;
        Ok(cap)
    }
}
