//! Integration tests for applet-runtime

#[cfg(test)]
mod integration_tests {
    use crate::{
        bridge::{BridgeError, CallBridge, LifecycleResponse, RemoteCall, RuntimeBridge},
        config::HostConfig,
        host::{AppHost, HostStatus},
        permission::{ChannelPrompt, FixedPrompt},
        ui::{EventSink, UiInterpreter, Widget},
    };
    use applet_types::{Decision, InboundMessage, ScriptState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    /// Name editor: a text field bound to `name`, and a button that loads
    /// a profile through one remote call.
    #[derive(Default)]
    struct NameEditor {
        viewed: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl RuntimeBridge for NameEditor {
        async fn init(
            &self,
            _script: &str,
            _initial_arg: Option<&Value>,
        ) -> Result<LifecycleResponse, BridgeError> {
            Ok(LifecycleResponse::new().with_state(json!({"name": "abc"})))
        }

        async fn view(
            &self,
            _script: &str,
            state: &ScriptState,
        ) -> Result<LifecycleResponse, BridgeError> {
            self.viewed.lock().push(state.to_value());
            Ok(LifecycleResponse::new().with_ui(json!({
                "type": "column",
                "children": [
                    {"type": "text_field", "props": {
                        "value": state.get("name").cloned().unwrap_or(Value::Null),
                        "on_change": {"type": "rename"}
                    }},
                    {"type": "button", "props": {"label": "Load", "on_press": {"type": "load"}}}
                ]
            })))
        }

        async fn update(
            &self,
            _script: &str,
            msg: &InboundMessage,
            state: &ScriptState,
        ) -> Result<LifecycleResponse, BridgeError> {
            let mut next = state.as_map().clone();
            let mut effects = Vec::new();
            match msg.msg_type() {
                Some("rename") => {
                    next.insert("name".into(), msg.get("value").cloned().unwrap_or(Value::Null));
                }
                Some("load") => effects.push(json!({
                    "kind": "icp_call",
                    "id": "profile",
                    "mode": 0,
                    "canister_id": "aaaaa-aa",
                    "method": "get_profile"
                })),
                Some("effect/result") => {
                    next.insert("profile".into(), msg.to_value());
                }
                _ => {}
            }
            Ok(LifecycleResponse::new()
                .with_state(Value::Object(next))
                .with_effects(effects))
        }
    }

    struct ProfileCalls;

    #[async_trait]
    impl CallBridge for ProfileCalls {
        async fn call_anonymous(&self, _call: &RemoteCall) -> Result<Option<String>, BridgeError> {
            Ok(Some("{\"name\":\"ada\"}".to_string()))
        }

        async fn call_authenticated(
            &self,
            call: &RemoteCall,
            _private_key_b64: &str,
        ) -> Result<Option<String>, BridgeError> {
            self.call_anonymous(call).await
        }
    }

    #[tokio::test]
    async fn test_text_field_round_trip() {
        let runtime = Arc::new(NameEditor::default());
        let mut host = AppHost::new(
            runtime.clone(),
            Arc::new(ProfileCalls),
            Arc::new(FixedPrompt(Decision::AllowOnce)),
            &HostConfig::default(),
        );
        host.boot("editor", None).await.unwrap();

        let (sink, mut rx) = EventSink::channel();
        let mut rendered = UiInterpreter::new(sink).render(host.ui().unwrap());
        rendered.edit(&[0], "abcd").unwrap();

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.to_value(), json!({"type": "rename", "value": "abcd"}));
        assert!(rx.try_recv().is_err());

        host.dispatch(msg).await.unwrap();
        assert_eq!(runtime.viewed.lock().last(), Some(&json!({"name": "abcd"})));

        let rendered = UiInterpreter::new(EventSink::channel().0).render(host.ui().unwrap());
        assert!(matches!(
            rendered.get(&[0]),
            Some(Widget::TextField { value, .. }) if value == "abcd"
        ));
    }

    #[tokio::test]
    async fn test_spawned_host_with_channel_prompt() {
        let (prompt, mut prompts) = ChannelPrompt::new(None);
        let host = AppHost::new(
            Arc::new(NameEditor::default()),
            Arc::new(ProfileCalls),
            Arc::new(prompt),
            &HostConfig::default(),
        );
        let mut handle = host.spawn("editor", None);

        // Answer every prompt with "always" and count them.
        let answered = tokio::spawn(async move {
            let mut count = 0;
            while let Some(pending) = prompts.recv().await {
                count += 1;
                pending.respond(Decision::AllowAlways);
            }
            count
        });

        handle
            .frames
            .wait_for(|frame| frame.status == HostStatus::Ready)
            .await
            .unwrap();

        let mut rendered = UiInterpreter::new(handle.events.clone())
            .render(handle.frames.borrow().ui.as_ref().unwrap());
        rendered.press(&[1]).unwrap();
        rendered.press(&[1]).unwrap();
        drop(rendered);

        let grants = handle.permissions.clone();
        let host = handle.shutdown().await.unwrap();

        assert_eq!(host.status(), &HostStatus::Ready);
        assert_eq!(
            host.state().unwrap().get("profile"),
            Some(&json!({"type": "effect/result", "id": "profile", "ok": true, "data": {"name": "ada"}}))
        );
        assert_eq!(grants.granted().len(), 1);

        // Dropping the host drops the prompt sender, ending the listener.
        drop(host);
        assert_eq!(answered.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_prompt_denies() {
        let (prompt, mut prompts) = ChannelPrompt::new(Some(Duration::from_secs(30)));
        let mut host = AppHost::new(
            Arc::new(NameEditor::default()),
            Arc::new(ProfileCalls),
            Arc::new(prompt),
            &HostConfig::default(),
        );
        host.boot("editor", None).await.unwrap();

        // The user navigates away: the pending prompt is dropped unanswered.
        tokio::spawn(async move {
            while let Some(pending) = prompts.recv().await {
                drop(pending);
            }
        });

        host.dispatch(InboundMessage::new("load")).await.unwrap();
        let profile = host.state().unwrap().get("profile").unwrap();
        assert_eq!(profile["ok"], json!(false));
        assert_eq!(profile["error"], json!("permission denied"));
        assert!(host.permissions().granted().is_empty());
    }
}
