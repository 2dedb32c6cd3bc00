//! Shared types for hosted script apps
//!
//! This crate provides the data model exchanged between the app host, the
//! script runtime bridge and the UI interpreter: script state, UI nodes,
//! declared effects, inbound messages and permission keys.

pub mod effect;
pub mod message;
pub mod node;
pub mod permission;
pub mod state;

pub use effect::{
    BatchItem, CallMode, CallSpec, Effect, EffectError, EffectKind, UNKNOWN_EFFECT_ID,
};
pub use message::{EffectOutcome, InboundMessage, EFFECT_RESULT};
pub use node::{scalar_text, NodeError, UiNode};
pub use permission::{Decision, PermissionKey};
pub use state::{ScriptState, StateError};

/// JSON-like value used for state, props and payloads
pub use serde_json::Value;
