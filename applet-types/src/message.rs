//! Inbound messages fed to `update`

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Message type of synthetic effect results.
pub const EFFECT_RESULT: &str = "effect/result";

/// Result of executing one effect
#[derive(Debug, Clone, PartialEq)]
pub enum EffectOutcome {
    Ok(Value),
    Err(String),
}

impl EffectOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        EffectOutcome::Err(message.into())
    }

    /// `{ok:true, data}` or `{ok:false, error}`
    pub fn to_value(&self) -> Value {
        match self {
            EffectOutcome::Ok(data) => json!({"ok": true, "data": data}),
            EffectOutcome::Err(error) => json!({"ok": false, "error": error}),
        }
    }
}

/// A `{type, ...payload}` message delivered to the script's `update`.
///
/// Produced either by UI interaction or by the effect dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundMessage(Map<String, Value>);

impl InboundMessage {
    pub fn new(msg_type: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(msg_type.into()));
        Self(map)
    }

    /// Build a message from a handler payload, keeping every key verbatim.
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        Self(payload.clone())
    }

    /// The correlated `effect/result` message for an effect id.
    pub fn effect_result(id: impl Into<String>, outcome: &EffectOutcome) -> Self {
        let mut msg = Self::new(EFFECT_RESULT);
        msg.0.insert("id".to_string(), Value::String(id.into()));
        if let Value::Object(fields) = outcome.to_value() {
            msg.0.extend(fields);
        }
        msg
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// The `type` entry, if the payload declared one.
    pub fn msg_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
