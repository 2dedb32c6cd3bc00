//! End-to-end tests driving the app host through command-backed bridges

#![cfg(unix)]

use applet_runtime::{
    AppHost, CommandCallBridge, CommandRuntime, FixedPrompt, HostConfig, HostError, HostStatus,
};
use applet_types::Decision;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn sh(path: &Path) -> Vec<String> {
    vec!["sh".to_string(), path.to_string_lossy().to_string()]
}

/// Runtime that asks for one call during init and records the update request.
fn write_runtime(dir: &Path) -> std::path::PathBuf {
    let log = dir.join("update.json");
    let path = dir.join("runtime.sh");
    let body = format!(
        r#"req=$(cat)
case "$req" in
  *'"call":"update"'*)
    printf '%s' "$req" > '{log}'
    echo '{{"state":{{"done":true}}}}' ;;
  *'"call":"view"'*)
    echo '{{"ui":{{"type":"text","props":{{"text":"ok"}}}}}}' ;;
  *)
    echo '{{"state":{{"done":false}},"effects":[{{"kind":"icp_call","id":"ping","canister_id":"c","method":"m"}}]}}' ;;
esac
"#,
        log = log.display()
    );
    fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn test_boot_runs_effects_through_commands() {
    let dir = tempdir().unwrap();
    let runtime = write_runtime(dir.path());
    let calls = dir.path().join("calls.sh");
    fs::write(&calls, "cat > /dev/null\necho '\"pong\"'\n").unwrap();

    let mut host = AppHost::new(
        Arc::new(CommandRuntime::new(sh(&runtime))),
        Arc::new(CommandCallBridge::new(sh(&calls))),
        Arc::new(FixedPrompt(Decision::AllowOnce)),
        &HostConfig::default(),
    );
    host.boot("return app", None).await.unwrap();

    assert_eq!(host.status(), &HostStatus::Ready);
    assert_eq!(host.render_passes(), 2);
    assert_eq!(host.state().unwrap().to_value(), json!({"done": true}));
    assert_eq!(host.ui(), Some(&json!({"type": "text", "props": {"text": "ok"}})));

    let request: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("update.json")).unwrap()).unwrap();
    assert_eq!(request["script"], json!("return app"));
    assert_eq!(request["state"], json!({"done": false}));
    assert_eq!(
        request["msg"],
        json!({"type": "effect/result", "id": "ping", "ok": true, "data": "pong"})
    );
}

#[tokio::test]
async fn test_denied_call_never_reaches_backend() {
    let dir = tempdir().unwrap();
    let runtime = write_runtime(dir.path());
    let calls = dir.path().join("calls.sh");
    let marker = dir.path().join("called");
    fs::write(&calls, format!("touch '{}'\necho 1\n", marker.display())).unwrap();

    let mut host = AppHost::new(
        Arc::new(CommandRuntime::new(sh(&runtime))),
        Arc::new(CommandCallBridge::new(sh(&calls))),
        Arc::new(FixedPrompt(Decision::Deny)),
        &HostConfig::default(),
    );
    host.boot("return app", None).await.unwrap();

    assert!(!marker.exists());
    let request: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("update.json")).unwrap()).unwrap();
    assert_eq!(
        request["msg"],
        json!({"type": "effect/result", "id": "ping", "ok": false, "error": "permission denied"})
    );
}

#[tokio::test]
async fn test_failed_runtime_is_terminal() {
    let dir = tempdir().unwrap();
    let runtime = dir.path().join("runtime.sh");
    fs::write(&runtime, "cat > /dev/null\necho 'boom' >&2\nexit 3\n").unwrap();
    let calls = dir.path().join("calls.sh");
    fs::write(&calls, "echo 1\n").unwrap();

    let mut host = AppHost::new(
        Arc::new(CommandRuntime::new(sh(&runtime))),
        Arc::new(CommandCallBridge::new(sh(&calls))),
        Arc::new(FixedPrompt(Decision::AllowOnce)),
        &HostConfig::default(),
    );

    let err = host.boot("return app", None).await.unwrap_err();
    assert_eq!(err.to_string(), "init failed: script error: boom");
    assert!(host.status().is_failed());
    assert_eq!(host.render_passes(), 0);

    let err = host
        .dispatch(applet_types::InboundMessage::new("refresh"))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::Failed(_)));
}
