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

fn teacher_params(username: &str, password: &str) -> serde_json::Value {
    json!({
        "username": username,
        "password": password,
        "name": "Kay",
        "surname": "Teacher",
        "address": "1 School St",
        "bloodType": "B-",
        "sex": "FEMALE",
        "birthday": "1975-12-01"
    })
}

fn open_db(workspace: &PathBuf) -> rusqlite::Connection {
    rusqlite::Connection::open(workspace.join("school.sqlite3")).expect("open db")
}

#[test]
fn teacher_delete_survives_a_vanished_directory_account() {
    let workspace = temp_workspace("schoold-directory-gone");
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
        "tc",
        "teachers.create",
        teacher_params("hopper", "secret123"),
        admin(),
    );
    assert_success(&outcome);
    let listed = request_ok(&mut stdin, &mut reader, "tl", "teachers.list", json!({}), admin());
    let teacher = listed["teachers"].as_array().expect("teachers")[0]["id"]
        .as_str()
        .expect("teacher id")
        .to_string();

    // Simulate the account disappearing out from under us.
    let db = open_db(&workspace);
    db.execute("DELETE FROM accounts WHERE id = ?", [&teacher])
        .expect("drop account");
    drop(db);

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "td",
        "teachers.delete",
        json!({ "id": teacher }),
        admin(),
    );
    assert_success(&outcome);

    let listed = request_ok(&mut stdin, &mut reader, "tl2", "teachers.list", json!({}), admin());
    assert!(listed["teachers"].as_array().expect("teachers").is_empty());
}

#[test]
fn teacher_update_only_replaces_a_submitted_credential() {
    let workspace = temp_workspace("schoold-credential");
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
        "tc",
        "teachers.create",
        teacher_params("ritchie", "original-pass"),
        admin(),
    );
    assert_success(&outcome);
    let listed = request_ok(&mut stdin, &mut reader, "tl", "teachers.list", json!({}), admin());
    let teacher = listed["teachers"].as_array().expect("teachers")[0]["id"]
        .as_str()
        .expect("teacher id")
        .to_string();

    // Empty password on update keeps the stored credential.
    let mut update = teacher_params("ritchie", "");
    update["id"] = json!(teacher);
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "tu",
        "teachers.update",
        update,
        admin(),
    );
    assert_success(&outcome);

    let db = open_db(&workspace);
    let password: String = db
        .query_row(
            "SELECT password FROM accounts WHERE id = ?",
            [&teacher],
            |r| r.get(0),
        )
        .expect("account password");
    assert_eq!(password, "original-pass");
    drop(db);

    // A non-empty password replaces it.
    let mut update = teacher_params("ritchie", "rotated-pass");
    update["id"] = json!(teacher);
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "tu2",
        "teachers.update",
        update,
        admin(),
    );
    assert_success(&outcome);

    let db = open_db(&workspace);
    let password: String = db
        .query_row(
            "SELECT password FROM accounts WHERE id = ?",
            [&teacher],
            |r| r.get(0),
        )
        .expect("account password");
    assert_eq!(password, "rotated-pass");
}

#[test]
fn student_create_provisions_an_account_with_the_row_id() {
    let workspace = temp_workspace("schoold-account-id");
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
        json!({ "name": "2A", "capacity": 20 }),
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

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "sc",
        "students.create",
        json!({
            "username": "turing",
            "password": "secret123",
            "name": "Alan",
            "surname": "Student",
            "address": "2 School St",
            "bloodType": "O+",
            "sex": "MALE",
            "birthday": "2011-06-23",
            "gradeId": grade,
            "classId": class
        }),
        admin(),
    );
    assert_success(&outcome);

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "stl",
        "students.list",
        json!({}),
        admin(),
    );
    let student = students["students"].as_array().expect("students")[0]["id"]
        .as_str()
        .expect("student id")
        .to_string();

    let db = open_db(&workspace);
    let (username, role): (String, String) = db
        .query_row(
            "SELECT username, role FROM accounts WHERE id = ?",
            [&student],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("account row");
    assert_eq!(username, "turing");
    assert_eq!(role, "student");
}
