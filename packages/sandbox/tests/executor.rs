// ABOUTME: Tests for timeout-bounded command execution in the active sandbox
// ABOUTME: Covers output capture, environment prefixing, timeouts and the no-sandbox case

mod common;

use agentbox_sandbox::{ExecuteRequest, RuntimeKind};
use common::{toolkit, FakeRuntime};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use tempfile::TempDir;

#[tokio::test]
async fn test_echo_in_fresh_node_sandbox() {
    let runtime = FakeRuntime::new();
    let toolkit = toolkit(&runtime);
    let temp = TempDir::new().unwrap();

    let launch = toolkit.launch(RuntimeKind::Node, temp.path(), None).await;
    assert!(launch.success);
    assert_eq!(
        launch.sandbox.unwrap().container_volume_path,
        "/root/workspace"
    );

    let result = toolkit.execute(ExecuteRequest::new("echo", &["hi"])).await;
    assert!(result.success);
    assert_eq!(result.output, "hi\n");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.command, "echo hi");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_nonzero_exit_is_still_success() {
    let runtime = FakeRuntime::new();
    let toolkit = toolkit(&runtime);
    toolkit
        .launch(RuntimeKind::Node, std::path::Path::new("/tmp/x"), Some("c1"))
        .await;

    let result = toolkit
        .execute(ExecuteRequest::new("definitely-not-a-tool", &[]))
        .await;

    assert!(result.success);
    assert_eq!(result.exit_code, Some(127));
    assert!(result.output.contains("not found"));
}

#[tokio::test]
async fn test_env_is_prefixed_in_sorted_order() {
    let runtime = FakeRuntime::new();
    let toolkit = toolkit(&runtime);
    toolkit
        .launch(RuntimeKind::Node, std::path::Path::new("/tmp/x"), Some("c1"))
        .await;

    let mut request = ExecuteRequest::new("echo", &["ok"]);
    request.env = BTreeMap::from([
        ("ZED".to_string(), "1".to_string()),
        ("ALPHA".to_string(), "two words".to_string()),
    ]);
    let result = toolkit.execute(request).await;

    assert!(result.success);
    assert_eq!(result.output, "ok\n");
    let last = runtime.exec_commands().pop().unwrap();
    assert_eq!(last, vec!["env", "ALPHA=two words", "ZED=1", "echo", "ok"]);
}

#[tokio::test]
async fn test_malformed_env_key_is_refused_before_exec() {
    let runtime = FakeRuntime::new();
    let toolkit = toolkit(&runtime);
    toolkit
        .launch(RuntimeKind::Node, std::path::Path::new("/tmp/x"), Some("c1"))
        .await;

    for key in ["A=B", "-u", "1ST", ""] {
        let mut request = ExecuteRequest::new("echo", &["ok"]);
        request.env = BTreeMap::from([(key.to_string(), "value".to_string())]);
        let result = toolkit.execute(request).await;

        assert!(!result.success, "key {:?} should be refused", key);
        assert!(result
            .error
            .unwrap()
            .contains("Invalid environment variable name"));
        assert_eq!(result.command, "echo ok");
    }
    assert!(runtime.exec_commands().is_empty());
}

#[tokio::test]
async fn test_timeout_reports_failure_with_empty_output() {
    let runtime = FakeRuntime::new();
    let toolkit = toolkit(&runtime);
    toolkit
        .launch(RuntimeKind::Python, std::path::Path::new("/tmp/x"), Some("c1"))
        .await;

    let mut request = ExecuteRequest::new("sleep", &["5"]);
    request.timeout_ms = Some(50);
    let result = toolkit.execute(request).await;

    assert!(!result.success);
    assert_eq!(result.output, "");
    assert_eq!(result.error.as_deref(), Some("Command timed out after 50ms"));
    assert!(result.duration_ms >= 50);
    assert!(result.duration_ms < 5_000);
}

#[tokio::test]
async fn test_execute_without_sandbox() {
    let runtime = FakeRuntime::new();
    let toolkit = toolkit(&runtime);

    let result = toolkit.execute(ExecuteRequest::new("echo", &["hi"])).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("No active sandbox"));
    assert!(runtime.exec_commands().is_empty());
}

#[tokio::test]
async fn test_engine_error_is_reported() {
    let runtime = FakeRuntime::new();
    let toolkit = toolkit(&runtime);
    toolkit
        .launch(RuntimeKind::Node, std::path::Path::new("/tmp/x"), Some("gone"))
        .await;
    runtime.with(|s| s.engine_down = true);

    let result = toolkit.execute(ExecuteRequest::new("echo", &["hi"])).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Exec error: engine unreachable"));
}
