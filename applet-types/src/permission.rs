//! Permission keys and prompt decisions

use crate::effect::CallMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical signature of a remote call.
///
/// Equality ignores call arguments, host overrides and key material, so
/// one "always allow" covers every call with the same target and method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub authenticated: bool,
    pub mode: CallMode,
    pub canister_id: String,
    pub method: String,
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}::{}",
            if self.authenticated { "auth" } else { "anon" },
            self.mode,
            self.canister_id,
            self.method
        )
    }
}

/// Outcome of a permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Deny,
    AllowOnce,
    AllowAlways,
}

impl Decision {
    pub fn allows(self) -> bool {
        !matches!(self, Decision::Deny)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "d" | "deny" | "no" | "n" => Some(Decision::Deny),
            "o" | "once" | "allow-once" | "allow_once" => Some(Decision::AllowOnce),
            "a" | "always" | "allow-always" | "allow_always" => Some(Decision::AllowAlways),
            _ => None,
        }
    }
}
