//! Process-backed bridges
//!
//! Each lifecycle call or remote call spawns the configured command, writes
//! one JSON request to its stdin and reads the reply from stdout. Key
//! material travels on stdin only, never on argv.

use crate::bridge::{BridgeError, CallBridge, LifecycleCall, LifecycleResponse, RemoteCall, RuntimeBridge};
use crate::config::{Config, ConfigError};
use applet_types::{InboundMessage, ScriptState};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
struct CommandSpec {
    argv: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    async fn run(&self, input: Vec<u8>) -> Result<Output, BridgeError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command").into());
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&input).await {
                    // The child may legitimately exit without reading.
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                    other => other?,
                }
            }
            Ok::<(), io::Error>(())
        };
        let work = async move {
            let (written, output) = tokio::join!(write, child.wait_with_output());
            written?;
            output
        };

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| BridgeError::Timeout(limit.as_millis() as u64))??,
            None => work.await?,
        };
        Ok(output)
    }
}

fn stderr_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("command exited with {}", output.status)
    } else {
        stderr
    }
}

#[derive(Serialize)]
struct RuntimeRequest<'a> {
    call: LifecycleCall,
    script: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    arg: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<&'a InboundMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a ScriptState>,
}

/// Script runtime backed by an external interpreter command
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    command: CommandSpec,
}

impl CommandRuntime {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            command: CommandSpec {
                argv,
                timeout: None,
            },
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let runtime = Self::new(config.runtime_command()?.to_vec());
        Ok(match config.runtime.timeout_secs {
            Some(secs) => runtime.with_timeout(Duration::from_secs(secs)),
            None => runtime,
        })
    }

    async fn request(&self, request: RuntimeRequest<'_>) -> Result<LifecycleResponse, BridgeError> {
        tracing::debug!(call = %request.call, "Invoking script runtime");
        let input = serde_json::to_vec(&request)?;
        let output = self.command.run(input).await?;

        if !output.status.success() {
            return Err(BridgeError::Script(stderr_text(&output)));
        }
        let reply: Value = serde_json::from_slice(&output.stdout)?;
        LifecycleResponse::from_value(reply)
    }
}

#[async_trait]
impl RuntimeBridge for CommandRuntime {
    async fn init(
        &self,
        script: &str,
        initial_arg: Option<&Value>,
    ) -> Result<LifecycleResponse, BridgeError> {
        self.request(RuntimeRequest {
            call: LifecycleCall::Init,
            script,
            arg: initial_arg,
            msg: None,
            state: None,
        })
        .await
    }

    async fn view(&self, script: &str, state: &ScriptState) -> Result<LifecycleResponse, BridgeError> {
        self.request(RuntimeRequest {
            call: LifecycleCall::View,
            script,
            arg: None,
            msg: None,
            state: Some(state),
        })
        .await
    }

    async fn update(
        &self,
        script: &str,
        msg: &InboundMessage,
        state: &ScriptState,
    ) -> Result<LifecycleResponse, BridgeError> {
        self.request(RuntimeRequest {
            call: LifecycleCall::Update,
            script,
            arg: None,
            msg: Some(msg),
            state: Some(state),
        })
        .await
    }
}

#[derive(Serialize)]
struct CallRequest<'a> {
    #[serde(flatten)]
    call: &'a RemoteCall,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_key_b64: Option<&'a str>,
}

/// Remote call backend backed by an external command
#[derive(Debug, Clone)]
pub struct CommandCallBridge {
    command: CommandSpec,
}

impl CommandCallBridge {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            command: CommandSpec {
                argv,
                timeout: None,
            },
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let bridge = Self::new(config.calls_command()?.to_vec());
        Ok(match config.calls.timeout_secs {
            Some(secs) => bridge.with_timeout(Duration::from_secs(secs)),
            None => bridge,
        })
    }

    async fn invoke(
        &self,
        call: &RemoteCall,
        private_key_b64: Option<&str>,
    ) -> Result<Option<String>, BridgeError> {
        let input = serde_json::to_vec(&CallRequest {
            call,
            private_key_b64,
        })?;
        let output = self.command.run(input).await?;

        if !output.status.success() {
            return Err(BridgeError::Call(stderr_text(&output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!stdout.is_empty()).then_some(stdout))
    }
}

#[async_trait]
impl CallBridge for CommandCallBridge {
    async fn call_anonymous(&self, call: &RemoteCall) -> Result<Option<String>, BridgeError> {
        self.invoke(call, None).await
    }

    async fn call_authenticated(
        &self,
        call: &RemoteCall,
        private_key_b64: &str,
    ) -> Result<Option<String>, BridgeError> {
        self.invoke(call, Some(private_key_b64)).await
    }
}
