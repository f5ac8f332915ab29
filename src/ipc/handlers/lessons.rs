use crate::auth::{self, Caller, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{canonical_datetime, delete_id, parse_payload, resolve_caller, valid_day};
use crate::ipc::outcome::Outcome;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

const LIST_VIEW: &str = "/list/lessons";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LessonPayload {
    #[serde(default)]
    id: Option<String>,
    name: String,
    day: String,
    start_time: String,
    end_time: String,
    subject_id: String,
    class_id: String,
    teacher_id: String,
}

/// Admins may place any lesson. A teacher may only write a lesson they own,
/// for a subject they teach, into a class they supervise or already teach
/// in. Everyone else is denied, as is any caller referencing missing rows.
fn allow_lesson_write(
    conn: &Connection,
    caller: Option<&Caller>,
    payload: &LessonPayload,
) -> anyhow::Result<bool> {
    let Some(caller) = caller else {
        warn!("lesson mutation without caller identity");
        return Ok(false);
    };
    match caller.role {
        Role::Admin => Ok(true),
        Role::Teacher => {
            if payload.teacher_id != caller.id {
                warn!(caller = %caller.id, "teacher cannot write a lesson for another teacher");
                return Ok(false);
            }
            if !auth::teaches_subject(conn, &payload.subject_id, &caller.id)? {
                warn!(caller = %caller.id, subject_id = %payload.subject_id, "teacher does not teach this subject");
                return Ok(false);
            }
            if !auth::may_use_class(conn, &payload.class_id, &caller.id)? {
                warn!(caller = %caller.id, class_id = %payload.class_id, "teacher not allowed to use this class");
                return Ok(false);
            }
            Ok(true)
        }
        Role::Student => {
            warn!(caller = %caller.id, "students cannot write lessons");
            Ok(false)
        }
    }
}

fn handle_lessons_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, day, start_time, end_time, subject_id, class_id, teacher_id
         FROM lessons
         ORDER BY day, start_time",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let day: String = row.get(2)?;
            let start_time: String = row.get(3)?;
            let end_time: String = row.get(4)?;
            let subject_id: String = row.get(5)?;
            let class_id: String = row.get(6)?;
            let teacher_id: String = row.get(7)?;
            Ok(json!({
                "id": id,
                "name": name,
                "day": day,
                "startTime": start_time,
                "endTime": end_time,
                "subjectId": subject_id,
                "classId": class_id,
                "teacherId": teacher_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(lessons) => ok(&req.id, json!({ "lessons": lessons })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: LessonPayload = match parse_payload(req) {
        Ok(p) => p,
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let name = payload.name.trim().to_string();
    if name.is_empty() || !valid_day(&payload.day) {
        warn!(method = %req.method, "lesson name/day invalid");
        return Outcome::Rejected.into_response(&req.id);
    }
    let (Some(start_time), Some(end_time)) = (
        canonical_datetime(&payload.start_time),
        canonical_datetime(&payload.end_time),
    ) else {
        warn!(method = %req.method, "lesson time window unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    match allow_lesson_write(conn, resolve_caller(req).as_ref(), &payload) {
        Ok(true) => {}
        Ok(false) => return Outcome::Rejected.into_response(&req.id),
        Err(e) => {
            warn!(error = %e, "lesson authorization check failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    let lesson_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(id, name, day, start_time, end_time, subject_id, class_id, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &lesson_id,
            &name,
            &payload.day,
            &start_time,
            &end_time,
            &payload.subject_id,
            &payload.class_id,
            &payload.teacher_id,
        ),
    ) {
        warn!(error = %e, "lesson insert failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

fn handle_lessons_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: LessonPayload = match parse_payload(req) {
        Ok(p) => p,
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let Some(lesson_id) = payload.id.clone().filter(|s| !s.is_empty()) else {
        warn!(method = %req.method, "update without id");
        return Outcome::Rejected.into_response(&req.id);
    };
    let name = payload.name.trim().to_string();
    if name.is_empty() || !valid_day(&payload.day) {
        warn!(method = %req.method, "lesson name/day invalid");
        return Outcome::Rejected.into_response(&req.id);
    }
    let (Some(start_time), Some(end_time)) = (
        canonical_datetime(&payload.start_time),
        canonical_datetime(&payload.end_time),
    ) else {
        warn!(method = %req.method, "lesson time window unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    match allow_lesson_write(conn, resolve_caller(req).as_ref(), &payload) {
        Ok(true) => {}
        Ok(false) => return Outcome::Rejected.into_response(&req.id),
        Err(e) => {
            warn!(error = %e, "lesson authorization check failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    let changed = match conn.execute(
        "UPDATE lessons
         SET name = ?, day = ?, start_time = ?, end_time = ?,
             subject_id = ?, class_id = ?, teacher_id = ?
         WHERE id = ?",
        (
            &name,
            &payload.day,
            &start_time,
            &end_time,
            &payload.subject_id,
            &payload.class_id,
            &payload.teacher_id,
            &lesson_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "lesson update failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if changed == 0 {
        warn!(lesson_id = %lesson_id, "lesson not found");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    views.invalidate(&format!("{}/{}", LIST_VIEW, lesson_id));
    Outcome::Success.into_response(&req.id)
}

fn handle_lessons_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let lesson_id = match delete_id(req) {
        Ok(v) => v,
        Err(outcome) => return outcome.into_response(&req.id),
    };

    let allowed = match resolve_caller(req) {
        Some(caller) => match caller.role {
            Role::Admin => true,
            Role::Teacher => match auth::lesson_owned_by(conn, &lesson_id, &caller.id) {
                Ok(owned) => {
                    if !owned {
                        warn!(caller = %caller.id, lesson_id = %lesson_id, "teacher cannot delete a lesson they do not own");
                    }
                    owned
                }
                Err(e) => {
                    warn!(error = %e, "lesson ownership check failed");
                    false
                }
            },
            Role::Student => false,
        },
        None => false,
    };
    if !allowed {
        return Outcome::Rejected.into_response(&req.id);
    }

    match conn.execute("DELETE FROM lessons WHERE id = ?", [&lesson_id]) {
        Ok(0) => {
            warn!(lesson_id = %lesson_id, "lesson not found");
            return Outcome::Rejected.into_response(&req.id);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "lesson delete failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.list" => Some(handle_lessons_list(state, req)),
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.update" => Some(handle_lessons_update(state, req)),
        "lessons.delete" => Some(handle_lessons_delete(state, req)),
        _ => None,
    }
}
