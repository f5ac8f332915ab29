use crate::auth::{self, Caller, Role};
use crate::integrity;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{canonical_datetime, delete_id, parse_payload, resolve_caller};
use crate::ipc::outcome::Outcome;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

const LIST_VIEW: &str = "/list/exams";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamPayload {
    #[serde(default)]
    id: Option<String>,
    title: String,
    start_time: String,
    end_time: String,
    lesson_id: String,
}

/// Teachers may only schedule exams against lessons they own; on update the
/// exam being rewritten must also belong to one of their lessons.
fn allow_exam_write(
    conn: &Connection,
    caller: Option<&Caller>,
    payload: &ExamPayload,
    existing_exam: Option<&str>,
) -> anyhow::Result<bool> {
    let Some(caller) = caller else {
        warn!("exam mutation without caller identity");
        return Ok(false);
    };
    match caller.role {
        Role::Admin => Ok(true),
        Role::Teacher => {
            if !auth::lesson_owned_by(conn, &payload.lesson_id, &caller.id)? {
                warn!(caller = %caller.id, lesson_id = %payload.lesson_id, "teacher does not own the target lesson");
                return Ok(false);
            }
            if let Some(exam_id) = existing_exam {
                if !auth::exam_owned_by(conn, exam_id, &caller.id)? {
                    warn!(caller = %caller.id, exam_id, "teacher cannot rewrite an exam they do not own");
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Role::Student => {
            warn!(caller = %caller.id, "students cannot write exams");
            Ok(false)
        }
    }
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, e.title, e.start_time, e.end_time, e.lesson_id,
           (SELECT COUNT(*) FROM results r WHERE r.exam_id = e.id) AS result_count
         FROM exams e
         ORDER BY e.start_time",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let start_time: String = row.get(2)?;
            let end_time: String = row.get(3)?;
            let lesson_id: String = row.get(4)?;
            let result_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "title": title,
                "startTime": start_time,
                "endTime": end_time,
                "lessonId": lesson_id,
                "resultCount": result_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(exams) => ok(&req.id, json!({ "exams": exams })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_exams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: ExamPayload = match parse_payload(req) {
        Ok(p) => p,
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        warn!(method = %req.method, "empty exam title");
        return Outcome::Rejected.into_response(&req.id);
    }
    let (Some(start_time), Some(end_time)) = (
        canonical_datetime(&payload.start_time),
        canonical_datetime(&payload.end_time),
    ) else {
        warn!(method = %req.method, "exam time window unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    match allow_exam_write(conn, resolve_caller(req).as_ref(), &payload, None) {
        Ok(true) => {}
        Ok(false) => return Outcome::Rejected.into_response(&req.id),
        Err(e) => {
            warn!(error = %e, "exam authorization check failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    let exam_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO exams(id, title, start_time, end_time, lesson_id)
         VALUES(?, ?, ?, ?, ?)",
        (
            &exam_id,
            &title,
            &start_time,
            &end_time,
            &payload.lesson_id,
        ),
    ) {
        warn!(error = %e, "exam insert failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

fn handle_exams_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: ExamPayload = match parse_payload(req) {
        Ok(p) => p,
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let Some(exam_id) = payload.id.clone().filter(|s| !s.is_empty()) else {
        warn!(method = %req.method, "update without id");
        return Outcome::Rejected.into_response(&req.id);
    };
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        warn!(method = %req.method, "empty exam title");
        return Outcome::Rejected.into_response(&req.id);
    }
    let (Some(start_time), Some(end_time)) = (
        canonical_datetime(&payload.start_time),
        canonical_datetime(&payload.end_time),
    ) else {
        warn!(method = %req.method, "exam time window unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    match allow_exam_write(conn, resolve_caller(req).as_ref(), &payload, Some(&exam_id)) {
        Ok(true) => {}
        Ok(false) => return Outcome::Rejected.into_response(&req.id),
        Err(e) => {
            warn!(error = %e, "exam authorization check failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    let changed = match conn.execute(
        "UPDATE exams
         SET title = ?, start_time = ?, end_time = ?, lesson_id = ?
         WHERE id = ?",
        (
            &title,
            &start_time,
            &end_time,
            &payload.lesson_id,
            &exam_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "exam update failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if changed == 0 {
        warn!(exam_id = %exam_id, "exam not found");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    views.invalidate(&format!("{}/{}", LIST_VIEW, exam_id));
    Outcome::Success.into_response(&req.id)
}

fn handle_exams_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let exam_id = match delete_id(req) {
        Ok(v) => v,
        Err(outcome) => return outcome.into_response(&req.id),
    };

    let dependents = match integrity::exam_dependents(conn, &exam_id) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "exam dependent count failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if let Some(message) = integrity::blocking_message("exam", &dependents) {
        return Outcome::Blocked(message).into_response(&req.id);
    }

    let allowed = match resolve_caller(req) {
        Some(caller) => match caller.role {
            Role::Admin => true,
            Role::Teacher => match auth::exam_owned_by(conn, &exam_id, &caller.id) {
                Ok(owned) => {
                    if !owned {
                        warn!(caller = %caller.id, exam_id = %exam_id, "teacher cannot delete an exam they do not own");
                    }
                    owned
                }
                Err(e) => {
                    warn!(error = %e, "exam ownership check failed");
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

    match conn.execute("DELETE FROM exams WHERE id = ?", [&exam_id]) {
        Ok(0) => {
            warn!(exam_id = %exam_id, "exam not found");
            return Outcome::Rejected.into_response(&req.id);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "exam delete failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.list" => Some(handle_exams_list(state, req)),
        "exams.create" => Some(handle_exams_create(state, req)),
        "exams.update" => Some(handle_exams_update(state, req)),
        "exams.delete" => Some(handle_exams_delete(state, req)),
        _ => None,
    }
}
