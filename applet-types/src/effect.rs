//! Effects declared by lifecycle calls
//!
//! A lifecycle response carries a list of effect records. Each record is
//! parsed here into a typed [`Effect`]; shapes the host does not understand
//! become an [`EffectError`] so the dispatcher can report them back to the
//! script instead of skipping them.

use crate::permission::PermissionKey;
use crate::state::kind_name;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Correlation id used when an effect record cannot be read at all.
pub const UNKNOWN_EFFECT_ID: &str = "unknown";

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum EffectError {
    #[error("effect must be a table, got {0}")]
    NotATable(&'static str),

    #[error("effect is missing `kind`")]
    MissingKind,

    #[error("unsupported effect kind: {0}")]
    UnsupportedKind(String),

    #[error("invalid call mode: {0}")]
    InvalidMode(String),

    #[error("malformed {kind} effect: {message}")]
    Malformed { kind: String, message: String },
}

/// Remote call mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "u8")]
pub enum CallMode {
    #[default]
    Query,
    Update,
    Composite,
}

impl CallMode {
    pub fn as_u8(self) -> u8 {
        match self {
            CallMode::Query => 0,
            CallMode::Update => 1,
            CallMode::Composite => 2,
        }
    }
}

impl TryFrom<f64> for CallMode {
    type Error = EffectError;

    fn try_from(raw: f64) -> Result<Self, Self::Error> {
        if raw == 0.0 {
            Ok(CallMode::Query)
        } else if raw == 1.0 {
            Ok(CallMode::Update)
        } else if raw == 2.0 {
            Ok(CallMode::Composite)
        } else {
            Err(EffectError::InvalidMode(raw.to_string()))
        }
    }
}

impl From<CallMode> for u8 {
    fn from(mode: CallMode) -> Self {
        mode.as_u8()
    }
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallMode::Query => write!(f, "Query"),
            CallMode::Update => write!(f, "Update"),
            CallMode::Composite => write!(f, "Composite"),
        }
    }
}

fn default_args() -> String {
    "()".to_string()
}

/// A single remote call against a canister
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    #[serde(default)]
    pub mode: CallMode,
    pub canister_id: String,
    pub method: String,
    #[serde(default = "default_args")]
    pub args: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_b64: Option<String>,
}

impl CallSpec {
    pub fn new(mode: CallMode, canister_id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            mode,
            canister_id: canister_id.into(),
            method: method.into(),
            args: default_args(),
            host: None,
            private_key_b64: None,
        }
    }

    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_private_key(mut self, key_b64: impl Into<String>) -> Self {
        self.private_key_b64 = Some(key_b64.into());
        self
    }

    /// Presence of key material makes the call authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.private_key_b64.is_some()
    }

    pub fn permission_key(&self) -> PermissionKey {
        PermissionKey {
            authenticated: self.is_authenticated(),
            mode: self.mode,
            canister_id: self.canister_id.clone(),
            method: self.method.clone(),
        }
    }

    fn from_map(kind: &str, map: &Map<String, Value>) -> Result<Self, EffectError> {
        // Null entries are how script tables spell "absent".
        let cleaned: Map<String, Value> = map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(mode) = cleaned.get("mode") {
            let valid = mode.as_f64().map(CallMode::try_from);
            if !matches!(valid, Some(Ok(_))) {
                return Err(EffectError::InvalidMode(mode.to_string()));
            }
        }

        serde_json::from_value(Value::Object(cleaned)).map_err(|e| EffectError::Malformed {
            kind: kind.to_string(),
            message: e.to_string(),
        })
    }
}

impl fmt::Debug for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSpec")
            .field("mode", &self.mode)
            .field("canister_id", &self.canister_id)
            .field("method", &self.method)
            .field("args", &self.args)
            .field("host", &self.host)
            .field(
                "private_key_b64",
                &self.private_key_b64.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// One entry of an `icp_batch` effect
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub label: String,
    pub call: Result<CallSpec, EffectError>,
}

impl BatchItem {
    fn parse(index: usize, value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self {
                label: format!("#{}", index),
                call: Err(EffectError::NotATable(kind_name(value))),
            };
        };

        let label = map
            .get("label")
            .and_then(Value::as_str)
            .or_else(|| map.get("method").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", index));

        let mut call_fields = map.clone();
        call_fields.remove("label");

        Self {
            label,
            call: CallSpec::from_map("icp_batch item", &call_fields),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffectKind {
    IcpCall(CallSpec),
    IcpBatch(Vec<BatchItem>),
}

/// A parsed effect with its correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub id: String,
    pub kind: EffectKind,
}

impl Effect {
    pub const ICP_CALL: &'static str = "icp_call";
    pub const ICP_BATCH: &'static str = "icp_batch";

    /// Parse an effect record.
    ///
    /// On failure the correlation id is still returned so the failure can
    /// be reported against the effect that produced it.
    pub fn parse(value: &Value) -> Result<Self, (String, EffectError)> {
        let map = value.as_object().ok_or_else(|| {
            (
                UNKNOWN_EFFECT_ID.to_string(),
                EffectError::NotATable(kind_name(value)),
            )
        })?;

        let kind = map.get("kind").and_then(Value::as_str);
        let id = map
            .get("id")
            .and_then(crate::node::scalar_text)
            .or_else(|| kind.map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_EFFECT_ID.to_string());

        let Some(kind) = kind else {
            return Err((id, EffectError::MissingKind));
        };

        let parsed = match kind {
            Self::ICP_CALL => CallSpec::from_map(kind, map).map(EffectKind::IcpCall),
            Self::ICP_BATCH => match map.get("items") {
                Some(Value::Array(items)) => Ok(EffectKind::IcpBatch(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| BatchItem::parse(i, item))
                        .collect(),
                )),
                // An empty script table may arrive as `{}`.
                Some(Value::Object(m)) if m.is_empty() => Ok(EffectKind::IcpBatch(Vec::new())),
                _ => Err(EffectError::Malformed {
                    kind: kind.to_string(),
                    message: "`items` must be a sequence".to_string(),
                }),
            },
            other => Err(EffectError::UnsupportedKind(other.to_string())),
        };

        match parsed {
            Ok(kind) => Ok(Self { id, kind }),
            Err(err) => Err((id, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_icp_call_defaults() {
        let effect = Effect::parse(&json!({
            "kind": "icp_call",
            "canister_id": "aaaaa-aa",
            "method": "status"
        }))
        .unwrap();

        assert_eq!(effect.id, "icp_call");
        match effect.kind {
            EffectKind::IcpCall(call) => {
                assert_eq!(call.mode, CallMode::Query);
                assert_eq!(call.args, "()");
                assert!(!call.is_authenticated());
            }
            _ => panic!("Expected icp_call"),
        }
    }

    #[test]
    fn test_mode_accepts_float_encoding() {
        let effect = Effect::parse(&json!({
            "kind": "icp_call",
            "id": "save",
            "mode": 1.0,
            "canister_id": "x",
            "method": "put",
            "private_key_b64": "AAAA"
        }))
        .unwrap();

        assert_eq!(effect.id, "save");
        let EffectKind::IcpCall(call) = effect.kind else {
            panic!("Expected icp_call");
        };
        assert_eq!(call.mode, CallMode::Update);
        assert!(call.is_authenticated());
    }

    #[test]
    fn test_invalid_mode() {
        let err = Effect::parse(&json!({
            "kind": "icp_call",
            "mode": 7,
            "canister_id": "x",
            "method": "m"
        }))
        .unwrap_err();
        assert_eq!(err.0, "icp_call");
        assert!(matches!(err.1, EffectError::InvalidMode(_)));
    }

    #[test]
    fn test_unknown_kind_and_shape() {
        let (id, err) = Effect::parse(&json!({"kind": "teleport"})).unwrap_err();
        assert_eq!(id, "teleport");
        assert_eq!(err, EffectError::UnsupportedKind("teleport".into()));

        let (id, err) = Effect::parse(&json!("icp_call")).unwrap_err();
        assert_eq!(id, UNKNOWN_EFFECT_ID);
        assert_eq!(err, EffectError::NotATable("string"));
    }

    #[test]
    fn test_batch_labels() {
        let effect = Effect::parse(&json!({
            "kind": "icp_batch",
            "id": "load",
            "items": [
                {"canister_id": "a", "method": "balance", "label": "mine"},
                {"canister_id": "b", "method": "supply"},
                {"label": "broken"}
            ]
        }))
        .unwrap();

        let EffectKind::IcpBatch(items) = effect.kind else {
            panic!("Expected icp_batch");
        };
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["mine", "supply", "broken"]);
        assert!(items[0].call.is_ok());
        assert!(items[2].call.is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let call = CallSpec::new(CallMode::Update, "x", "m").with_private_key("c2VjcmV0");
        let rendered = format!("{:?}", call);
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("<redacted>"));
    }
}
