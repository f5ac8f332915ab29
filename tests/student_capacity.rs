use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_workspace(prefix: &str) -> PathBuf {
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

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn admin() -> serde_json::Value {
    json!({ "userId": "admin-1", "role": "admin" })
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    caller: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params, "caller": caller });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn assert_success(outcome: &serde_json::Value) {
    assert_eq!(outcome["success"], json!(true), "outcome: {}", outcome);
    assert_eq!(outcome["error"], json!(false), "outcome: {}", outcome);
}

fn assert_rejected(outcome: &serde_json::Value) {
    assert_eq!(outcome["success"], json!(false), "outcome: {}", outcome);
    assert_eq!(outcome["error"], json!(true), "outcome: {}", outcome);
}

fn student_params(username: &str, grade: &str, class: &str) -> serde_json::Value {
    json!({
        "username": username,
        "password": "secret123",
        "name": "Sam",
        "surname": "Student",
        "address": "2 School St",
        "bloodType": "A-",
        "sex": "FEMALE",
        "birthday": "2012-05-05",
        "gradeId": grade,
        "classId": class
    })
}

#[test]
fn student_create_stops_at_class_capacity_without_account_leak() {
    let workspace = temp_workspace("schoold-capacity");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        json!(null),
    );

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "cc",
        "classes.create",
        json!({ "name": "Tiny", "capacity": 2 }),
        admin(),
    );
    assert_success(&outcome);
    let classes = request_ok(&mut stdin, &mut reader, "cl", "classes.list", json!({}), admin());
    let class = classes["classes"].as_array().expect("classes")[0]["id"]
        .as_str()
        .expect("class id")
        .to_string();

    let grades = request_ok(&mut stdin, &mut reader, "gl", "grades.list", json!({}), admin());
    let grade = grades["grades"].as_array().expect("grades")[0]["id"]
        .as_str()
        .expect("grade id")
        .to_string();

    for (i, username) in ["amy", "ben"].iter().enumerate() {
        let outcome = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{i}"),
            "students.create",
            student_params(username, &grade, &class),
            admin(),
        );
        assert_success(&outcome);
    }

    // Third enrollment into a class of two.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "s3",
        "students.create",
        student_params("cleo", &grade, &class),
        admin(),
    );
    assert_rejected(&outcome);

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "stl",
        "students.list",
        json!({}),
        admin(),
    );
    assert_eq!(students["students"].as_array().expect("students").len(), 2);

    // The rejected enrollment must not have provisioned an account either.
    let db = rusqlite::Connection::open(workspace.join("school.sqlite3")).expect("open db");
    let accounts: i64 = db
        .query_row(
            "SELECT COUNT(*) FROM accounts WHERE role = 'student'",
            [],
            |r| r.get(0),
        )
        .expect("count accounts");
    assert_eq!(accounts, 2);

    // A missing class is treated like a failed precondition.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "s4",
        "students.create",
        student_params("dana", &grade, "no-such-class"),
        admin(),
    );
    assert_rejected(&outcome);
}
