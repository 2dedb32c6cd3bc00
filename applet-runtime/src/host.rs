//! App host state machine
//!
//! The host owns the `(state, ui)` pair of one script. It drives the boot
//! sequence and the dispatch loop, runs declared effects through the
//! [`EffectDispatcher`] and publishes a [`Frame`] after every render pass.
//!
//! Effect results are delivered depth-first: the result of an effect is fed
//! to `update`, re-rendered, and any effects that produced run, before the
//! next sibling effect starts. Messages dispatched while a chain is in
//! flight wait for the chain to finish (see [`AppHost::spawn`]).

use crate::bridge::{
    CallBridge, HostError, HostResult, LifecycleCall, LifecycleResponse, RuntimeBridge,
};
use crate::config::HostConfig;
use crate::effects::EffectDispatcher;
use crate::permission::{PermissionGate, PermissionPrompt};
use crate::ui::EventSink;
use applet_types::{InboundMessage, ScriptState};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostStatus {
    #[default]
    Idle,
    Booting,
    Busy,
    Ready,
    /// Terminal. Carries the error shown to the user.
    Failed(String),
}

impl HostStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, HostStatus::Failed(_))
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Idle => write!(f, "idle"),
            HostStatus::Booting => write!(f, "booting"),
            HostStatus::Busy => write!(f, "busy"),
            HostStatus::Ready => write!(f, "ready"),
            HostStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Snapshot published to embedders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Completed render passes so far
    pub pass: u64,
    pub status: HostStatus,
    pub ui: Option<Value>,
    pub state: Option<Value>,
}

enum Task {
    Effect(Value),
    Deliver(InboundMessage),
}

pub struct AppHost {
    runtime: Arc<dyn RuntimeBridge>,
    dispatcher: EffectDispatcher,
    permissions: PermissionGate,
    script: Option<Arc<str>>,
    state: Option<ScriptState>,
    ui: Option<Value>,
    status: HostStatus,
    render_passes: u64,
    frames: watch::Sender<Frame>,
}

impl AppHost {
    pub fn new(
        runtime: Arc<dyn RuntimeBridge>,
        calls: Arc<dyn CallBridge>,
        prompt: Arc<dyn PermissionPrompt>,
        config: &HostConfig,
    ) -> Self {
        let (frames, _) = watch::channel(Frame::default());
        Self {
            runtime,
            dispatcher: EffectDispatcher::new(calls, prompt, config.default_call_host.clone()),
            permissions: PermissionGate::new(config.args_preview_chars),
            script: None,
            state: None,
            ui: None,
            status: HostStatus::Idle,
            render_passes: 0,
            frames,
        }
    }

    /// Run `init`, render, then execute the declared effects.
    pub async fn boot(
        &mut self,
        script: impl Into<Arc<str>>,
        initial_arg: Option<Value>,
    ) -> HostResult<()> {
        if self.status != HostStatus::Idle {
            return Err(HostError::AlreadyBooted);
        }

        let script = script.into();
        tracing::info!("Booting script ({} bytes)", script.len());
        self.script = Some(script.clone());
        self.set_status(HostStatus::Booting);

        let result = self.run_boot(&script, initial_arg.as_ref()).await;
        self.finish(result)
    }

    async fn run_boot(&mut self, script: &str, initial_arg: Option<&Value>) -> HostResult<()> {
        let response = self
            .runtime
            .init(script, initial_arg)
            .await
            .map_err(|source| HostError::Runtime {
                call: LifecycleCall::Init,
                source,
            })?;

        let LifecycleResponse { state, ui, effects } = response;

        // Immediate UI is a preview, not a render pass.
        if let Some(ui) = ui {
            self.ui = Some(ui);
            self.publish();
        }

        let state = decode_state(LifecycleCall::Init, state)?;
        self.apply_state_and_render(state).await?;
        self.drain(effects.into_iter().map(Task::Effect).collect())
            .await
    }

    /// Feed a message to `update`, re-render and run the resulting effects.
    ///
    /// A no-op before boot. Fails immediately once the host has failed.
    pub async fn dispatch(&mut self, msg: InboundMessage) -> HostResult<()> {
        if let HostStatus::Failed(reason) = &self.status {
            return Err(HostError::Failed(reason.clone()));
        }
        if self.state.is_none() {
            tracing::debug!(msg_type = ?msg.msg_type(), "Ignoring message before boot");
            return Ok(());
        }

        self.set_status(HostStatus::Busy);
        let result = self.drain(VecDeque::from([Task::Deliver(msg)])).await;
        self.finish(result)
    }

    async fn drain(&mut self, mut queue: VecDeque<Task>) -> HostResult<()> {
        while let Some(task) = queue.pop_front() {
            match task {
                Task::Effect(effect) => {
                    let msg = self.dispatcher.execute(&effect, &self.permissions).await;
                    queue.push_front(Task::Deliver(msg));
                }
                Task::Deliver(msg) => {
                    let effects = self.update_and_render(&msg).await?;
                    for effect in effects.into_iter().rev() {
                        queue.push_front(Task::Effect(effect));
                    }
                }
            }
        }
        Ok(())
    }

    async fn update_and_render(&mut self, msg: &InboundMessage) -> HostResult<Vec<Value>> {
        let (Some(script), Some(state)) = (self.script.clone(), self.state.as_ref()) else {
            return Ok(Vec::new());
        };

        tracing::debug!(msg_type = ?msg.msg_type(), "update");
        let response = self
            .runtime
            .update(&script, msg, state)
            .await
            .map_err(|source| HostError::Runtime {
                call: LifecycleCall::Update,
                source,
            })?;

        let state = decode_state(LifecycleCall::Update, response.state)?;
        self.apply_state_and_render(state).await?;
        Ok(response.effects)
    }

    /// Replace the state wholesale and render it through `view`.
    async fn apply_state_and_render(&mut self, state: ScriptState) -> HostResult<()> {
        let script = self
            .script
            .clone()
            .ok_or_else(|| HostError::Failed("no script loaded".to_string()))?;
        let state = &*self.state.insert(state);

        let response = self
            .runtime
            .view(&script, state)
            .await
            .map_err(|source| HostError::Runtime {
                call: LifecycleCall::View,
                source,
            })?;

        let ui = response.ui.ok_or_else(|| HostError::Malformed {
            call: LifecycleCall::View,
            message: "missing `ui`".to_string(),
        })?;

        self.ui = Some(ui);
        self.render_passes += 1;
        tracing::debug!(pass = self.render_passes, "Rendered");
        self.publish();
        Ok(())
    }

    fn finish(&mut self, result: HostResult<()>) -> HostResult<()> {
        match result {
            Ok(()) => {
                self.set_status(HostStatus::Ready);
                Ok(())
            }
            Err(err) => {
                tracing::error!("Script host failed: {}", err);
                self.set_status(HostStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    fn set_status(&mut self, status: HostStatus) {
        self.status = status;
        self.publish();
    }

    fn publish(&self) {
        self.frames.send_replace(Frame {
            pass: self.render_passes,
            status: self.status.clone(),
            ui: self.ui.clone(),
            state: self.state.as_ref().map(ScriptState::to_value),
        });
    }

    pub fn status(&self) -> &HostStatus {
        &self.status
    }

    pub fn state(&self) -> Option<&ScriptState> {
        self.state.as_ref()
    }

    pub fn ui(&self) -> Option<&Value> {
        self.ui.as_ref()
    }

    pub fn render_passes(&self) -> u64 {
        self.render_passes
    }

    /// Session permission cache. Clones share the same grants.
    pub fn permissions(&self) -> &PermissionGate {
        &self.permissions
    }

    pub fn subscribe(&self) -> watch::Receiver<Frame> {
        self.frames.subscribe()
    }

    /// Move the host onto a task that boots it and then serves UI events
    /// one at a time, in arrival order.
    pub fn spawn(mut self, script: impl Into<Arc<str>>, initial_arg: Option<Value>) -> HostHandle {
        let (events, mut rx) = EventSink::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let frames = self.subscribe();
        let permissions = self.permissions.clone();
        let script = script.into();

        enum Next {
            Message(Option<InboundMessage>),
            Stop,
        }

        let task = tokio::spawn(async move {
            // Failures are already logged and published as a frame.
            let _ = self.boot(script, initial_arg).await;

            let mut stopping = false;
            loop {
                let next = if stopping {
                    Next::Message(rx.recv().await)
                } else {
                    tokio::select! {
                        msg = rx.recv() => Next::Message(msg),
                        _ = &mut stop_rx => Next::Stop,
                    }
                };

                match next {
                    Next::Stop => {
                        // Deliver what is already queued, then exit.
                        rx.close();
                        stopping = true;
                    }
                    Next::Message(None) => break,
                    Next::Message(Some(msg)) => {
                        if let Err(HostError::Failed(_)) = self.dispatch(msg).await {
                            tracing::debug!("Dropping event for failed host");
                        }
                    }
                }
            }

            tracing::debug!("Host task finished");
            self
        });

        HostHandle {
            events,
            frames,
            permissions,
            stop: stop_tx,
            task,
        }
    }
}

fn decode_state(call: LifecycleCall, state: Option<Value>) -> HostResult<ScriptState> {
    let value = state.ok_or_else(|| HostError::Malformed {
        call,
        message: "missing `state`".to_string(),
    })?;
    ScriptState::from_value(value).map_err(|e| HostError::Malformed {
        call,
        message: e.to_string(),
    })
}

/// Handle to a host running on its own task
pub struct HostHandle {
    pub events: EventSink,
    pub frames: watch::Receiver<Frame>,
    pub permissions: PermissionGate,
    stop: oneshot::Sender<()>,
    task: JoinHandle<AppHost>,
}

impl HostHandle {
    /// Deliver the events already queued, then stop and return the host.
    pub async fn shutdown(self) -> Result<AppHost, JoinError> {
        let _ = self.stop.send(());
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeError, RemoteCall};
    use crate::permission::FixedPrompt;
    use applet_types::Decision;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    type UpdateFn =
        Box<dyn Fn(&InboundMessage, &ScriptState) -> Result<LifecycleResponse, BridgeError> + Send + Sync>;

    /// Counter script: `inc` adds one, effect results are stored by id
    struct FakeRuntime {
        init: Mutex<Option<Result<LifecycleResponse, BridgeError>>>,
        update: UpdateFn,
        fail_view: bool,
        log: Mutex<Vec<String>>,
    }

    impl FakeRuntime {
        fn new(init: LifecycleResponse) -> Self {
            Self {
                init: Mutex::new(Some(Ok(init))),
                update: Box::new(counter_update),
                fail_view: false,
                log: Mutex::new(Vec::new()),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    fn counter_update(
        msg: &InboundMessage,
        state: &ScriptState,
    ) -> Result<LifecycleResponse, BridgeError> {
        let mut next = state.as_map().clone();
        match msg.msg_type() {
            Some("inc") => {
                let n = state.get("n").and_then(Value::as_i64).unwrap_or(0);
                next.insert("n".into(), json!(n + 1));
            }
            Some("effect/result") => {
                let id = msg.get("id").and_then(Value::as_str).unwrap_or("?");
                next.insert(id.to_string(), msg.get("data").cloned().unwrap_or(Value::Null));
            }
            Some("boom") => return Err(BridgeError::Script("attempt to index nil".into())),
            _ => {}
        }
        Ok(LifecycleResponse::new().with_state(Value::Object(next)))
    }

    #[async_trait]
    impl RuntimeBridge for FakeRuntime {
        async fn init(
            &self,
            _script: &str,
            initial_arg: Option<&Value>,
        ) -> Result<LifecycleResponse, BridgeError> {
            self.log.lock().push(format!(
                "init {}",
                initial_arg.map(Value::to_string).unwrap_or_default()
            ));
            self.init
                .lock()
                .take()
                .unwrap_or_else(|| Err(BridgeError::Script("init called twice".into())))
        }

        async fn view(
            &self,
            _script: &str,
            state: &ScriptState,
        ) -> Result<LifecycleResponse, BridgeError> {
            self.log.lock().push(format!("view {}", state.to_value()));
            if self.fail_view {
                return Err(BridgeError::Script("view exploded".into()));
            }
            Ok(LifecycleResponse::new().with_ui(json!({
                "type": "text",
                "props": {"text": state.to_value().to_string()}
            })))
        }

        async fn update(
            &self,
            _script: &str,
            msg: &InboundMessage,
            state: &ScriptState,
        ) -> Result<LifecycleResponse, BridgeError> {
            self.log.lock().push(format!(
                "update {}",
                msg.get("id")
                    .or_else(|| msg.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or("?")
            ));
            (self.update)(msg, state)
        }
    }

    /// Answers every call with its method name as a JSON string
    struct EchoCalls;

    #[async_trait]
    impl CallBridge for EchoCalls {
        async fn call_anonymous(&self, call: &RemoteCall) -> Result<Option<String>, BridgeError> {
            Ok(Some(format!("\"{}\"", call.method)))
        }

        async fn call_authenticated(
            &self,
            call: &RemoteCall,
            _private_key_b64: &str,
        ) -> Result<Option<String>, BridgeError> {
            self.call_anonymous(call).await
        }
    }

    fn host_with(runtime: Arc<FakeRuntime>, decision: Decision) -> AppHost {
        AppHost::new(
            runtime,
            Arc::new(EchoCalls),
            Arc::new(FixedPrompt(decision)),
            &HostConfig::default(),
        )
    }

    fn call(id: &str) -> Value {
        json!({"kind": "icp_call", "id": id, "canister_id": "aaaaa-aa", "method": id})
    }

    #[tokio::test]
    async fn test_boot_renders_once() {
        let runtime = Arc::new(FakeRuntime::new(
            LifecycleResponse::new().with_state(json!({"n": 0})),
        ));
        let mut host = host_with(runtime.clone(), Decision::AllowOnce);
        let frames = host.subscribe();

        host.boot("return {}", Some(json!({"user": "x"}))).await.unwrap();

        assert_eq!(host.status(), &HostStatus::Ready);
        assert_eq!(host.render_passes(), 1);
        assert_eq!(host.state().unwrap().get("n"), Some(&json!(0)));
        let frame = frames.borrow().clone();
        assert_eq!(frame.pass, 1);
        assert_eq!(frame.status, HostStatus::Ready);
        assert!(frame.ui.is_some());
        assert_eq!(
            runtime.log(),
            vec!["init {\"user\":\"x\"}", "view {\"n\":0}"]
        );
    }

    #[tokio::test]
    async fn test_preview_ui_is_not_a_render_pass() {
        let runtime = Arc::new(FakeRuntime::new(
            LifecycleResponse::new()
                .with_state(json!({}))
                .with_ui(json!({"type": "text", "props": {"text": "loading"}})),
        ));
        let mut host = host_with(runtime, Decision::AllowOnce);
        host.boot("s", None).await.unwrap();

        assert_eq!(host.render_passes(), 1);
        assert_eq!(host.ui().unwrap()["props"]["text"], json!("{}"));
    }

    #[tokio::test]
    async fn test_one_render_per_completed_effect() {
        let runtime = Arc::new(FakeRuntime::new(
            LifecycleResponse::new()
                .with_state(json!({}))
                .with_effects(vec![call("a"), call("b")]),
        ));
        let mut host = host_with(runtime.clone(), Decision::AllowAlways);
        host.boot("s", None).await.unwrap();

        assert_eq!(host.render_passes(), 3);
        assert_eq!(
            host.state().unwrap().to_value(),
            json!({"a": "a", "b": "b"})
        );
        let log = runtime.log();
        assert_eq!(
            log[1..],
            [
                "view {}",
                "update a",
                "view {\"a\":\"a\"}",
                "update b",
                "view {\"a\":\"a\",\"b\":\"b\"}"
            ]
        );
    }

    #[tokio::test]
    async fn test_effect_results_are_depth_first() {
        let mut runtime = FakeRuntime::new(
            LifecycleResponse::new()
                .with_state(json!({}))
                .with_effects(vec![call("a"), call("b")]),
        );
        runtime.update = Box::new(|msg, state| {
            let mut response = counter_update(msg, state)?;
            if msg.get("id") == Some(&json!("a")) {
                response = response.with_effects(vec![call("c")]);
            }
            Ok(response)
        });
        let runtime = Arc::new(runtime);
        let mut host = host_with(runtime.clone(), Decision::AllowOnce);
        host.boot("s", None).await.unwrap();

        let updates: Vec<_> = runtime
            .log()
            .into_iter()
            .filter(|line| line.starts_with("update"))
            .collect();
        assert_eq!(updates, vec!["update a", "update c", "update b"]);
        assert_eq!(host.render_passes(), 4);
    }

    #[tokio::test]
    async fn test_denied_effect_keeps_host_ready() {
        let runtime = Arc::new(FakeRuntime::new(
            LifecycleResponse::new()
                .with_state(json!({}))
                .with_effects(vec![call("a")]),
        ));
        let mut host = host_with(runtime, Decision::Deny);
        host.boot("s", None).await.unwrap();

        assert_eq!(host.status(), &HostStatus::Ready);
        assert_eq!(host.state().unwrap().get("a"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_init_failure_is_terminal() {
        let runtime = Arc::new(FakeRuntime {
            init: Mutex::new(Some(Err(BridgeError::Script("syntax error near 'end'".into())))),
            update: Box::new(counter_update),
            fail_view: false,
            log: Mutex::new(Vec::new()),
        });
        let mut host = host_with(runtime.clone(), Decision::AllowOnce);
        let frames = host.subscribe();

        let err = host.boot("s", None).await.unwrap_err();
        assert!(matches!(err, HostError::Runtime { call: LifecycleCall::Init, .. }));
        assert!(host.status().is_failed());
        assert!(frames.borrow().status.is_failed());

        let err = host.dispatch(InboundMessage::new("inc")).await.unwrap_err();
        assert!(matches!(err, HostError::Failed(ref reason) if reason.contains("syntax error")));
        assert_eq!(runtime.log().len(), 1);

        assert!(matches!(
            host.boot("s", None).await,
            Err(HostError::AlreadyBooted)
        ));
    }

    #[tokio::test]
    async fn test_view_failure_after_update() {
        let mut runtime = FakeRuntime::new(LifecycleResponse::new().with_state(json!({})));
        runtime.fail_view = true;
        let mut host = host_with(Arc::new(runtime), Decision::AllowOnce);

        let err = host.boot("s", None).await.unwrap_err();
        assert!(matches!(err, HostError::Runtime { call: LifecycleCall::View, .. }));
        assert_eq!(host.render_passes(), 0);
    }

    #[tokio::test]
    async fn test_update_failure_and_missing_state() {
        let runtime = Arc::new(FakeRuntime::new(LifecycleResponse::new().with_state(json!({}))));
        let mut host = host_with(runtime, Decision::AllowOnce);
        host.boot("s", None).await.unwrap();
        assert!(host.dispatch(InboundMessage::new("boom")).await.is_err());
        assert!(host.status().is_failed());

        let runtime = Arc::new(FakeRuntime::new(LifecycleResponse::new()));
        let mut host = host_with(runtime, Decision::AllowOnce);
        let err = host.boot("s", None).await.unwrap_err();
        assert_eq!(err.to_string(), "malformed init response: missing `state`");
    }

    #[tokio::test]
    async fn test_dispatch_before_boot_is_noop() {
        let runtime = Arc::new(FakeRuntime::new(LifecycleResponse::new().with_state(json!({}))));
        let mut host = host_with(runtime.clone(), Decision::AllowOnce);

        host.dispatch(InboundMessage::new("inc")).await.unwrap();
        assert!(runtime.log().is_empty());
        assert_eq!(host.status(), &HostStatus::Idle);
    }

    #[tokio::test]
    async fn test_spawned_host_serializes_events() {
        let runtime = Arc::new(FakeRuntime::new(
            LifecycleResponse::new()
                .with_state(json!({"n": 0}))
                .with_effects(vec![call("a")]),
        ));
        let handle = host_with(runtime.clone(), Decision::AllowOnce).spawn("s", None);

        handle.events.emit(InboundMessage::new("inc"));
        handle.events.emit(InboundMessage::new("inc"));
        let host = handle.shutdown().await.unwrap();

        assert_eq!(host.state().unwrap().get("n"), Some(&json!(2)));
        // boot, effect a, two increments
        assert_eq!(host.render_passes(), 4);
        let updates: Vec<_> = runtime
            .log()
            .into_iter()
            .filter(|line| line.starts_with("update"))
            .collect();
        assert_eq!(updates, vec!["update a", "update inc", "update inc"]);
    }
}
