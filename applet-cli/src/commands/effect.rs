//! Execute a single effect record.

use super::call_bridge;
use anyhow::{Context, Result};
use applet_runtime::{
    Config, EffectDispatcher, FixedPrompt, PermissionGate, PermissionPrompt, PermissionRequest,
};
use applet_types::Decision;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

/// Asks on stdout and reads the answer from stdin. EOF denies.
struct StdinPrompt {
    lines: Mutex<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
}

impl StdinPrompt {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl PermissionPrompt for StdinPrompt {
    async fn confirm(&self, request: PermissionRequest) -> Decision {
        super::run::print_request(&request);
        let mut lines = self.lines.lock().await;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match Decision::parse(&line) {
                    Some(decision) => return decision,
                    None => println!("answer d, o or a"),
                },
                Ok(None) | Err(_) => return Decision::Deny,
            }
        }
    }
}

pub async fn run_effect(config_path: &Path, effect_path: &Path, auto: Option<Decision>) -> Result<()> {
    let config = Config::load_or_default(config_path).context("Failed to load configuration")?;

    let raw = std::fs::read_to_string(effect_path)
        .with_context(|| format!("Failed to read effect {:?}", effect_path))?;
    let effect: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Effect {:?} is not valid JSON", effect_path))?;

    let prompt: Arc<dyn PermissionPrompt> = match auto {
        Some(decision) => Arc::new(FixedPrompt(decision)),
        None => Arc::new(StdinPrompt::new()),
    };
    let host_config = config.host_config();
    let dispatcher = EffectDispatcher::new(
        call_bridge(&config),
        prompt,
        host_config.default_call_host.clone(),
    );
    let gate = PermissionGate::new(host_config.args_preview_chars);

    let msg = dispatcher.execute(&effect, &gate).await;
    println!("{}", serde_json::to_string_pretty(&msg.to_value())?);
    Ok(())
}
