mod test_support;

use serde_json::json;
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn health_unknown_methods_and_workspace_gating() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    // health works before a workspace is selected.
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health["workspacePath"].is_null());

    // Everything stateful is gated on workspace selection.
    let code = request_err(&mut stdin, &mut reader, "2", "levels.list", json!({}));
    assert_eq!(code, "no_workspace");

    let code = request_err(&mut stdin, &mut reader, "3", "nope.nothing", json!({}));
    assert_eq!(code, "not_implemented");

    let workspace = temp_dir("edutest-smoke");
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let levels = request_ok(&mut stdin, &mut reader, "5", "levels.list", json!({}));
    assert_eq!(levels["levels"].as_array().expect("levels").len(), 0);

    // Responses echo the request id verbatim.
    let resp = request(&mut stdin, &mut reader, "echo-42", "health", json!({}));
    assert_eq!(resp["id"], "echo-42");
    assert_eq!(resp["ok"], true);
}
