//! CLI command implementations.

pub mod effect;
pub mod render;
pub mod run;

pub use effect::run_effect;
pub use render::render_tree;
pub use run::run_script;

use applet_runtime::{BridgeError, CallBridge, CommandCallBridge, Config, RemoteCall};
use async_trait::async_trait;
use std::sync::Arc;

/// Call backend used when `calls.command` is not configured
struct UnconfiguredCalls;

#[async_trait]
impl CallBridge for UnconfiguredCalls {
    async fn call_anonymous(&self, _call: &RemoteCall) -> Result<Option<String>, BridgeError> {
        Err(BridgeError::Call("no call backend configured".to_string()))
    }

    async fn call_authenticated(
        &self,
        call: &RemoteCall,
        _private_key_b64: &str,
    ) -> Result<Option<String>, BridgeError> {
        self.call_anonymous(call).await
    }
}

pub(crate) fn call_bridge(config: &Config) -> Arc<dyn CallBridge> {
    match CommandCallBridge::from_config(config) {
        Ok(bridge) => Arc::new(bridge),
        Err(err) => {
            tracing::warn!("{}; remote calls will fail", err);
            Arc::new(UnconfiguredCalls)
        }
    }
}

/// Parse a dotted widget path (`0.2.1`); `root` or `.` is the root.
pub(crate) fn parse_path(raw: &str) -> Option<Vec<usize>> {
    match raw {
        "root" | "." => Some(Vec::new()),
        raw => raw.split('.').map(|part| part.parse().ok()).collect(),
    }
}
