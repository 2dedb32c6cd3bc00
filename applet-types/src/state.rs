//! Script state document

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StateError {
    #[error("script state must be a table, got {0}")]
    NotATable(&'static str),
}

/// Opaque key/value document owned by the host between runtime calls.
///
/// The host never edits a state in place; every `init`/`update` response
/// replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptState(Map<String, Value>);

impl ScriptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a runtime value into a state document.
    ///
    /// `null` and an empty sequence both decode to the empty state, since
    /// script runtimes commonly encode an empty table as `[]`.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            Value::Array(items) if items.is_empty() => Ok(Self::new()),
            other => Err(StateError::NotATable(kind_name(&other))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for ScriptState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "table",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_becomes_state() {
        let state = ScriptState::from_value(json!({"count": 1, "nested": {"a": [1, 2]}})).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("count"), Some(&json!(1)));
    }

    #[test]
    fn test_empty_encodings() {
        assert!(ScriptState::from_value(Value::Null).unwrap().is_empty());
        assert!(ScriptState::from_value(json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_scalar_is_rejected() {
        assert_eq!(
            ScriptState::from_value(json!(42)),
            Err(StateError::NotATable("number"))
        );
        assert_eq!(
            ScriptState::from_value(json!([1])),
            Err(StateError::NotATable("sequence"))
        );
    }
}
