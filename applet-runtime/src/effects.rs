//! Effect dispatcher
//!
//! Executes the effects a lifecycle call declared and turns each one into
//! exactly one `effect/result` message. Effects run strictly in list order;
//! failures of any kind (bad shape, unknown kind, denied permission, empty
//! or failed response) become failure results instead of errors, so the
//! script can react to them.

use crate::bridge::{CallBridge, RemoteCall};
use crate::permission::{PermissionGate, PermissionPrompt};
use applet_types::{BatchItem, CallSpec, Effect, EffectKind, EffectOutcome, InboundMessage};
use base64::Engine as _;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const PERMISSION_DENIED: &str = "permission denied";
pub const EMPTY_RESPONSE: &str = "empty response";
pub const INVALID_PRIVATE_KEY: &str = "invalid private_key_b64";

/// Parse a raw call response, keeping the raw text when it is not JSON.
pub fn parse_response(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub struct EffectDispatcher {
    calls: Arc<dyn CallBridge>,
    prompt: Arc<dyn PermissionPrompt>,
    default_host: Option<String>,
}

impl EffectDispatcher {
    pub fn new(
        calls: Arc<dyn CallBridge>,
        prompt: Arc<dyn PermissionPrompt>,
        default_host: Option<String>,
    ) -> Self {
        Self {
            calls,
            prompt,
            default_host,
        }
    }

    /// Execute one effect record and build its correlated result message.
    pub async fn execute(&self, effect: &Value, gate: &PermissionGate) -> InboundMessage {
        let (id, outcome) = match Effect::parse(effect) {
            Ok(effect) => {
                let outcome = match &effect.kind {
                    EffectKind::IcpCall(call) => self.run_call(call, gate).await,
                    EffectKind::IcpBatch(items) => self.run_batch(items, gate).await,
                };
                (effect.id, outcome)
            }
            Err((id, err)) => {
                tracing::warn!(effect_id = %id, "Rejected effect: {}", err);
                (id, EffectOutcome::Err(err.to_string()))
            }
        };

        if let EffectOutcome::Err(error) = &outcome {
            tracing::debug!(effect_id = %id, %error, "Effect failed");
        }
        InboundMessage::effect_result(id, &outcome)
    }

    async fn run_call(&self, call: &CallSpec, gate: &PermissionGate) -> EffectOutcome {
        if let Err(outcome) = check_private_key(call) {
            return outcome;
        }

        let decision = gate.authorize(call, self.prompt.as_ref()).await;
        if !decision.allows() {
            return EffectOutcome::error(PERMISSION_DENIED);
        }

        self.invoke(call).await
    }

    async fn run_batch(&self, items: &[BatchItem], gate: &PermissionGate) -> EffectOutcome {
        // Only well-formed calls are put in front of the user.
        let callable: Vec<(usize, &CallSpec)> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match &item.call {
                Ok(call) if check_private_key(call).is_ok() => Some((i, call)),
                _ => None,
            })
            .collect();

        let specs: Vec<&CallSpec> = callable.iter().map(|(_, call)| *call).collect();
        let approvals = gate.authorize_batch(&specs, self.prompt.as_ref()).await;

        let mut approved = vec![false; items.len()];
        for ((i, _), ok) in callable.iter().zip(approvals) {
            approved[*i] = ok;
        }

        let mut results = Map::new();
        for (i, item) in items.iter().enumerate() {
            let outcome = match &item.call {
                Err(err) => EffectOutcome::Err(err.to_string()),
                Ok(call) => match check_private_key(call) {
                    Err(outcome) => outcome,
                    Ok(()) if !approved[i] => EffectOutcome::error(PERMISSION_DENIED),
                    Ok(()) => self.invoke(call).await,
                },
            };

            let entry = match outcome {
                EffectOutcome::Ok(data) => data,
                failure => failure.to_value(),
            };
            if results.insert(item.label.clone(), entry).is_some() {
                tracing::warn!(label = %item.label, "Duplicate batch label, keeping the last result");
            }
        }

        EffectOutcome::Ok(Value::Object(results))
    }

    async fn invoke(&self, call: &CallSpec) -> EffectOutcome {
        let remote = RemoteCall::resolve(call, self.default_host.as_deref());
        tracing::debug!(
            canister_id = %remote.canister_id,
            method = %remote.method,
            mode = %remote.mode,
            authenticated = call.is_authenticated(),
            "Invoking remote call"
        );

        let response = match &call.private_key_b64 {
            Some(key) => self.calls.call_authenticated(&remote, key).await,
            None => self.calls.call_anonymous(&remote).await,
        };

        match response {
            Ok(Some(raw)) if !raw.trim().is_empty() => EffectOutcome::Ok(parse_response(&raw)),
            Ok(_) => EffectOutcome::error(EMPTY_RESPONSE),
            Err(err) => EffectOutcome::Err(err.to_string()),
        }
    }
}

fn check_private_key(call: &CallSpec) -> Result<(), EffectOutcome> {
    match &call.private_key_b64 {
        Some(key) if base64::engine::general_purpose::STANDARD.decode(key).is_err() => {
            Err(EffectOutcome::error(INVALID_PRIVATE_KEY))
        }
        _ => Ok(()),
    }
}
