//! Bridge contracts
//!
//! This module defines the two external collaborators the host talks to:
//! the script runtime (which evaluates `init`/`view`/`update`) and the remote
//! call backend (which performs canister calls). Both are opaque async
//! functions from the host's point of view.

use applet_types::{CallMode, CallSpec, InboundMessage, ScriptState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle entry points exposed by a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleCall {
    Init,
    View,
    Update,
}

impl fmt::Display for LifecycleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleCall::Init => write!(f, "init"),
            LifecycleCall::View => write!(f, "view"),
            LifecycleCall::Update => write!(f, "update"),
        }
    }
}

/// Structured `{state?, ui?, effects?}` result of a lifecycle call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleResponse {
    pub state: Option<Value>,
    pub ui: Option<Value>,
    pub effects: Vec<Value>,
}

impl LifecycleResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_ui(mut self, ui: Value) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_effects(mut self, effects: Vec<Value>) -> Self {
        self.effects = effects;
        self
    }

    /// Decode a raw runtime reply.
    pub fn from_value(value: Value) -> Result<Self, BridgeError> {
        let Value::Object(mut map) = value else {
            return Err(BridgeError::Malformed(
                "lifecycle response must be a table".to_string(),
            ));
        };

        let state = map.remove("state").filter(|v| !v.is_null());
        let ui = map.remove("ui").filter(|v| !v.is_null());
        let effects = match map.remove("effects") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(Value::Object(m)) if m.is_empty() => Vec::new(),
            Some(_) => {
                return Err(BridgeError::Malformed(
                    "`effects` must be a sequence".to_string(),
                ))
            }
        };

        Ok(Self { state, ui, effects })
    }
}

/// A remote call with its host resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub canister_id: String,
    pub method: String,
    pub mode: CallMode,
    pub args: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl RemoteCall {
    /// Resolve a call spec, preferring its own host override.
    pub fn resolve(call: &CallSpec, default_host: Option<&str>) -> Self {
        Self {
            canister_id: call.canister_id.clone(),
            method: call.method.clone(),
            mode: call.mode,
            args: call.args.clone(),
            host: call
                .host
                .clone()
                .or_else(|| default_host.map(str::to_string)),
        }
    }
}

/// Script runtime contract
#[async_trait]
pub trait RuntimeBridge: Send + Sync {
    async fn init(
        &self,
        script: &str,
        initial_arg: Option<&Value>,
    ) -> Result<LifecycleResponse, BridgeError>;

    async fn view(&self, script: &str, state: &ScriptState)
        -> Result<LifecycleResponse, BridgeError>;

    async fn update(
        &self,
        script: &str,
        msg: &InboundMessage,
        state: &ScriptState,
    ) -> Result<LifecycleResponse, BridgeError>;
}

/// Remote call backend contract
///
/// `Ok(None)` and blank strings are protocol-level empty responses.
#[async_trait]
pub trait CallBridge: Send + Sync {
    async fn call_anonymous(&self, call: &RemoteCall) -> Result<Option<String>, BridgeError>;

    async fn call_authenticated(
        &self,
        call: &RemoteCall,
        private_key_b64: &str,
    ) -> Result<Option<String>, BridgeError>;
}

/// Errors raised by either bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("script error: {0}")]
    Script(String),

    #[error("malformed runtime response: {0}")]
    Malformed(String),

    #[error("remote call failed: {0}")]
    Call(String),

    #[error("bridge timed out after {0}ms")]
    Timeout(u64),

    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON from bridge: {0}")]
    Json(#[from] serde_json::Error),
}

/// Host-level errors
///
/// Every variant except `AlreadyBooted` leaves the host in its terminal
/// failed state.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("{call} failed: {source}")]
    Runtime {
        call: LifecycleCall,
        #[source]
        source: BridgeError,
    },

    #[error("malformed {call} response: {message}")]
    Malformed { call: LifecycleCall, message: String },

    #[error("host already booted")]
    AlreadyBooted,

    #[error("host failed: {0}")]
    Failed(String),
}

pub type HostResult<T> = Result<T, HostError>;
