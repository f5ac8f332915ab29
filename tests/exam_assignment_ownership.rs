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

fn teacher_claims(id: &str) -> serde_json::Value {
    json!({ "userId": id, "role": "teacher" })
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

struct Fixture {
    alice: String,
    bob: String,
    alice_lesson: String,
    bob_lesson: String,
}

fn build_fixture(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Fixture {
    let mut teacher_ids = Vec::new();
    for username in ["alice", "bob"] {
        let outcome = request_ok(
            stdin,
            reader,
            &format!("ct-{username}"),
            "teachers.create",
            json!({
                "username": username,
                "password": "secret123",
                "name": "Test",
                "surname": "Teacher",
                "address": "1 School St",
                "bloodType": "AB+",
                "sex": "MALE",
                "birthday": "1982-02-14"
            }),
            admin(),
        );
        assert_success(&outcome);
    }
    let listed = request_ok(stdin, reader, "lt", "teachers.list", json!({}), admin());
    for username in ["alice", "bob"] {
        let id = listed["teachers"]
            .as_array()
            .expect("teachers array")
            .iter()
            .find(|t| t["username"] == json!(username))
            .and_then(|t| t["id"].as_str())
            .expect("teacher id")
            .to_string();
        teacher_ids.push(id);
    }
    let (alice, bob) = (teacher_ids[0].clone(), teacher_ids[1].clone());

    let outcome = request_ok(
        stdin,
        reader,
        "cc",
        "classes.create",
        json!({ "name": "3A", "capacity": 30, "supervisorId": alice }),
        admin(),
    );
    assert_success(&outcome);
    let outcome = request_ok(
        stdin,
        reader,
        "cc2",
        "classes.create",
        json!({ "name": "3B", "capacity": 30, "supervisorId": bob }),
        admin(),
    );
    assert_success(&outcome);
    let classes = request_ok(stdin, reader, "lc", "classes.list", json!({}), admin());
    let class_a = classes["classes"].as_array().expect("classes")[0]["id"]
        .as_str()
        .expect("class id")
        .to_string();
    let class_b = classes["classes"].as_array().expect("classes")[1]["id"]
        .as_str()
        .expect("class id")
        .to_string();

    let outcome = request_ok(
        stdin,
        reader,
        "sc",
        "subjects.create",
        json!({ "name": "Physics", "teachers": [alice, bob] }),
        admin(),
    );
    assert_success(&outcome);
    let subjects = request_ok(stdin, reader, "sl", "subjects.list", json!({}), admin());
    let physics = subjects["subjects"].as_array().expect("subjects")[0]["id"]
        .as_str()
        .expect("subject id")
        .to_string();

    for (name, class, teacher) in [
        ("Physics 3A", &class_a, &alice),
        ("Physics 3B", &class_b, &bob),
    ] {
        let outcome = request_ok(
            stdin,
            reader,
            &format!("le-{name}"),
            "lessons.create",
            json!({
                "name": name,
                "day": "WEDNESDAY",
                "startTime": "2026-09-09T11:00:00Z",
                "endTime": "2026-09-09T12:00:00Z",
                "subjectId": physics,
                "classId": class,
                "teacherId": teacher
            }),
            admin(),
        );
        assert_success(&outcome);
    }
    let lessons = request_ok(stdin, reader, "ll", "lessons.list", json!({}), admin());
    let find_lesson = |name: &str| {
        lessons["lessons"]
            .as_array()
            .expect("lessons")
            .iter()
            .find(|l| l["name"] == json!(name))
            .and_then(|l| l["id"].as_str())
            .expect("lesson id")
            .to_string()
    };

    Fixture {
        alice_lesson: find_lesson("Physics 3A"),
        bob_lesson: find_lesson("Physics 3B"),
        alice,
        bob,
    }
}

#[test]
fn exam_writes_are_scoped_to_the_lesson_owner() {
    let workspace = temp_workspace("schoold-exam-own");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        json!(null),
    );
    let fx = build_fixture(&mut stdin, &mut reader);

    // Alice schedules against her own lesson.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "exams.create",
        json!({
            "title": "Mechanics quiz",
            "startTime": "2026-10-01T09:00:00Z",
            "endTime": "2026-10-01T10:00:00Z",
            "lessonId": fx.alice_lesson
        }),
        teacher_claims(&fx.alice),
    );
    assert_success(&outcome);

    // Not against Bob's.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "e2",
        "exams.create",
        json!({
            "title": "Poached quiz",
            "startTime": "2026-10-01T09:00:00Z",
            "endTime": "2026-10-01T10:00:00Z",
            "lessonId": fx.bob_lesson
        }),
        teacher_claims(&fx.alice),
    );
    assert_rejected(&outcome);

    let exams = request_ok(&mut stdin, &mut reader, "el", "exams.list", json!({}), admin());
    let exam_rows = exams["exams"].as_array().expect("exams");
    assert_eq!(exam_rows.len(), 1);
    let exam = exam_rows[0]["id"].as_str().expect("exam id").to_string();

    // Bob owns neither the exam nor its lesson.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "e3",
        "exams.update",
        json!({
            "id": exam,
            "title": "Hijacked quiz",
            "startTime": "2026-10-02T09:00:00Z",
            "endTime": "2026-10-02T10:00:00Z",
            "lessonId": fx.bob_lesson
        }),
        teacher_claims(&fx.bob),
    );
    assert_rejected(&outcome);

    // Alice cannot move her exam onto a lesson she does not own.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "e4",
        "exams.update",
        json!({
            "id": exam,
            "title": "Mechanics quiz",
            "startTime": "2026-10-02T09:00:00Z",
            "endTime": "2026-10-02T10:00:00Z",
            "lessonId": fx.bob_lesson
        }),
        teacher_claims(&fx.alice),
    );
    assert_rejected(&outcome);

    // In-place reschedule on her own lesson is fine.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "e5",
        "exams.update",
        json!({
            "id": exam,
            "title": "Mechanics quiz",
            "startTime": "2026-10-02T09:00:00Z",
            "endTime": "2026-10-02T10:00:00Z",
            "lessonId": fx.alice_lesson
        }),
        teacher_claims(&fx.alice),
    );
    assert_success(&outcome);

    // Delete follows the same ownership rule.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "e6",
        "exams.delete",
        json!({ "id": exam }),
        teacher_claims(&fx.bob),
    );
    assert_rejected(&outcome);
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "e7",
        "exams.delete",
        json!({ "id": exam }),
        teacher_claims(&fx.alice),
    );
    assert_success(&outcome);
}

#[test]
fn assignment_writes_are_scoped_to_the_lesson_owner() {
    let workspace = temp_workspace("schoold-assignment-own");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        json!(null),
    );
    let fx = build_fixture(&mut stdin, &mut reader);

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "assignments.create",
        json!({
            "title": "Problem set 1",
            "startDate": "2026-09-14",
            "dueDate": "2026-09-21",
            "lessonId": fx.alice_lesson
        }),
        teacher_claims(&fx.alice),
    );
    assert_success(&outcome);

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "assignments.create",
        json!({
            "title": "Poached set",
            "startDate": "2026-09-14",
            "dueDate": "2026-09-21",
            "lessonId": fx.bob_lesson
        }),
        teacher_claims(&fx.alice),
    );
    assert_rejected(&outcome);

    let assignments = request_ok(
        &mut stdin,
        &mut reader,
        "al",
        "assignments.list",
        json!({}),
        admin(),
    );
    let rows = assignments["assignments"].as_array().expect("assignments");
    assert_eq!(rows.len(), 1);
    let assignment = rows[0]["id"].as_str().expect("assignment id").to_string();

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "a3",
        "assignments.update",
        json!({
            "id": assignment,
            "title": "Problem set 1 (extended)",
            "startDate": "2026-09-14",
            "dueDate": "2026-09-28",
            "lessonId": fx.alice_lesson
        }),
        teacher_claims(&fx.bob),
    );
    assert_rejected(&outcome);

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "a4",
        "assignments.update",
        json!({
            "id": assignment,
            "title": "Problem set 1 (extended)",
            "startDate": "2026-09-14",
            "dueDate": "2026-09-28",
            "lessonId": fx.alice_lesson
        }),
        teacher_claims(&fx.alice),
    );
    assert_success(&outcome);

    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "a5",
        "assignments.delete",
        json!({ "id": assignment }),
        teacher_claims(&fx.bob),
    );
    assert_rejected(&outcome);
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "a6",
        "assignments.delete",
        json!({ "id": assignment }),
        teacher_claims(&fx.alice),
    );
    assert_success(&outcome);
}
