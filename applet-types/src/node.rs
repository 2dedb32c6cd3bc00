//! Declarative UI nodes returned by `view`

use crate::state::kind_name;
use serde_json::{Map, Value};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum NodeError {
    #[error("ui node must be a table, got {0}")]
    NotATable(&'static str),

    #[error("ui node is missing a string `type`")]
    MissingType,

    #[error("`{kind}` node has non-table props")]
    BadProps { kind: String },

    #[error("`{kind}` node has non-sequence children")]
    BadChildren { kind: String },

    #[error("`{kind}` node has a non-table `{name}` handler")]
    BadHandler { kind: String, name: String },
}

static EMPTY_PROPS: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();

/// Borrowed view of a `{type, props, children}` node.
#[derive(Debug, Clone, Copy)]
pub struct UiNode<'a> {
    pub kind: &'a str,
    pub props: &'a Map<String, Value>,
    pub children: &'a [Value],
}

impl<'a> UiNode<'a> {
    pub fn parse(value: &'a Value) -> Result<Self, NodeError> {
        let map = value
            .as_object()
            .ok_or_else(|| NodeError::NotATable(kind_name(value)))?;

        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or(NodeError::MissingType)?;

        let props = match map.get("props") {
            None | Some(Value::Null) => EMPTY_PROPS.get_or_init(Map::new),
            Some(Value::Object(props)) => props,
            // Lua encodes an empty table as a sequence.
            Some(Value::Array(items)) if items.is_empty() => EMPTY_PROPS.get_or_init(Map::new),
            Some(_) => {
                return Err(NodeError::BadProps {
                    kind: kind.to_string(),
                })
            }
        };

        let children: &[Value] = match map.get("children") {
            None | Some(Value::Null) => &[],
            Some(Value::Array(items)) => items,
            Some(Value::Object(m)) if m.is_empty() => &[],
            Some(_) => {
                return Err(NodeError::BadChildren {
                    kind: kind.to_string(),
                })
            }
        };

        Ok(Self {
            kind,
            props,
            children,
        })
    }

    pub fn prop(&self, name: &str) -> Option<&'a Value> {
        self.props.get(name).filter(|v| !v.is_null())
    }

    pub fn str_prop(&self, name: &str) -> Option<&'a str> {
        self.prop(name).and_then(Value::as_str)
    }

    /// Scalar prop coerced to display text.
    pub fn text_prop(&self, name: &str) -> Option<String> {
        self.prop(name).and_then(scalar_text)
    }

    pub fn bool_prop(&self, name: &str) -> bool {
        self.prop(name).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Handler payload declared under `name` (`on_press`, `on_change`, `on_submit`).
    ///
    /// Absent or null is `Ok(None)`; any non-table value is an error.
    pub fn handler(&self, name: &str) -> Result<Option<&'a Map<String, Value>>, NodeError> {
        match self.prop(name) {
            None => Ok(None),
            Some(Value::Object(payload)) => Ok(Some(payload)),
            Some(_) => Err(NodeError::BadHandler {
                kind: self.kind.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

/// Display text for a scalar value; `None` for null, sequences and tables.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 && !n.is_i64() && !n.is_u64() => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        }),
        _ => None,
    }
}
