mod test_support;

use serde_json::json;
use std::io::Write;
use test_support::{error_code, read_response, request, spawn_sidecar_with, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("attendanced-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar_with(None);
    let teacher = json!({ "role": "teacher", "id": "T1", "name": "Ms. Rao" });

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.teacherQuery",
        json!({ "caller": teacher }),
    );
    assert_eq!(error_code(&early), "no_workspace");

    let selected = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true, "{}", selected);
    assert!(workspace.join("attendance.sqlite3").is_file());

    let missing_path = request(&mut stdin, &mut reader, "4", "workspace.select", json!({}));
    assert_eq!(error_code(&missing_path), "bad_params");

    let template = request(&mut stdin, &mut reader, "5", "attendance.template", json!({}));
    assert_eq!(template["result"]["mimeType"], "text/csv");
    assert!(template["result"]["content"]
        .as_str()
        .unwrap_or("")
        .starts_with("studentId,studentName,rollNumber,status"));

    let setup = request(&mut stdin, &mut reader, "6", "setup.get", json!({}));
    assert_eq!(setup["result"]["upload"]["maxUploadBytes"], 5 * 1024 * 1024);
    assert_eq!(setup["result"]["upload"]["maxRows"], 5000);
    assert_eq!(setup["result"]["queries"]["academicYearFallback"], true);
    assert_eq!(setup["result"]["ingest"]["duplicatePolicy"], "warn");

    let updated = request(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "upload", "patch": { "maxRows": 250 } }),
    );
    assert_eq!(updated["ok"], true);
    let bad_patch = request(
        &mut stdin,
        &mut reader,
        "8",
        "setup.update",
        json!({ "section": "upload", "patch": { "maxUploadBytes": 10 } }),
    );
    assert_eq!(error_code(&bad_patch), "bad_params");
    let unknown_section = request(
        &mut stdin,
        &mut reader,
        "9",
        "setup.update",
        json!({ "section": "printer", "patch": {} }),
    );
    assert_eq!(error_code(&unknown_section), "bad_params");
    let setup = request(&mut stdin, &mut reader, "10", "setup.get", json!({}));
    assert_eq!(setup["result"]["upload"]["maxRows"], 250);

    let listed = request(
        &mut stdin,
        &mut reader,
        "11",
        "sessions.teacherQuery",
        json!({ "caller": teacher, "filters": {} }),
    );
    assert_eq!(listed["ok"], true, "{}", listed);
    assert_eq!(listed["result"]["sessions"], json!([]));
    assert_eq!(listed["result"]["summary"]["totalSessions"], 0);

    let student_listed = request(
        &mut stdin,
        &mut reader,
        "12",
        "sessions.studentQuery",
        json!({ "caller": { "role": "student", "id": "S1" } }),
    );
    assert_eq!(student_listed["result"]["statistics"]["overallPercentage"], 0);

    let bad_caller = request(
        &mut stdin,
        &mut reader,
        "13",
        "sessions.get",
        json!({ "caller": { "role": "admin", "id": "X" }, "sessionId": "s" }),
    );
    assert_eq!(error_code(&bad_caller), "bad_params");

    let unknown = request(&mut stdin, &mut reader, "14", "grades.open", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let garbage = read_response(&mut reader);
    assert_eq!(garbage["ok"], false);
    assert_eq!(error_code(&garbage), "bad_json");

    let after = request(&mut stdin, &mut reader, "15", "health", json!({}));
    assert_eq!(after["ok"], true);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn workspace_can_be_preselected_from_env() {
    let workspace = temp_dir("attendanced-env-workspace");
    let (mut child, mut stdin, mut reader) = spawn_sidecar_with(Some(&workspace));

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health["result"]["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );
    let setup = request(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["ok"], true);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
