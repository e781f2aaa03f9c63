#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with(None)
}

/// `workspace_env` becomes `ATTENDANCED_WORKSPACE`; otherwise the variable
/// is cleared so the parent's environment never leaks in.
pub fn spawn_sidecar_with(
    workspace_env: Option<&PathBuf>,
) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut cmd = Command::new(exe);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("ATTENDANCED_WORKSPACE");
    if let Some(ws) = workspace_env {
        cmd.env("ATTENDANCED_WORKSPACE", ws);
    }
    let mut child = cmd.spawn().expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id), "{}", method);
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Returns the `error` object of a failed reply.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], false, "{} unexpectedly succeeded: {}", method, value);
    value["error"].clone()
}

pub fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

pub fn write_fixture(dir: &Path, name: &str, content: &[u8]) -> String {
    let p = dir.join(name);
    std::fs::write(&p, content).expect("write fixture");
    p.to_string_lossy().to_string()
}

pub fn teacher() -> serde_json::Value {
    json!({ "role": "teacher", "id": "T1", "name": "Ms. Rao" })
}

pub fn student(id: &str) -> serde_json::Value {
    json!({ "role": "student", "id": id, "name": format!("Student {}", id) })
}

/// Uploads `rows` under the template header as teacher T1, section A,
/// 09:00 to 09:50, academic year 2024-25.
pub fn upload_sheet(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    workspace: &Path,
    subject: &str,
    date: &str,
    rows: &str,
) -> serde_json::Value {
    let content = format!("studentId,studentName,rollNumber,status\n{}", rows);
    let path = write_fixture(workspace, &format!("{}.csv", id), content.as_bytes());
    request_ok(
        stdin,
        reader,
        id,
        "attendance.upload",
        json!({
            "caller": teacher(),
            "classInfo": {
                "subject": subject,
                "className": "Grade 10",
                "section": "A",
                "semester": 1,
                "academicYear": "2024-25"
            },
            "date": date,
            "timeSlot": { "startTime": "09:00", "endTime": "09:50" },
            "file": { "filePath": path }
        }),
    )
}
