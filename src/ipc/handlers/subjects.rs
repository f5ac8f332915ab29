use crate::auth;
use crate::integrity;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{delete_id, parse_payload, resolve_caller};
use crate::ipc::outcome::Outcome;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

const LIST_VIEW: &str = "/list/subjects";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectPayload {
    #[serde(default)]
    id: Option<String>,
    name: String,
    /// Full teacher set; update replaces the links, never merges.
    #[serde(default)]
    teachers: Vec<String>,
}

fn teacher_ids(conn: &Connection, subject_id: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT teacher_id FROM subject_teachers WHERE subject_id = ? ORDER BY teacher_id")?;
    let ids = stmt
        .query_map([subject_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name,
           (SELECT COUNT(*) FROM lessons l WHERE l.subject_id = s.id) AS lesson_count
         FROM subjects s
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut subjects = Vec::new();
    for (id, name, lesson_count) in rows {
        let teachers = match teacher_ids(conn, &id) {
            Ok(t) => t,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        subjects.push(json!({
            "id": id,
            "name": name,
            "teachers": teachers,
            "lessonCount": lesson_count
        }));
    }

    ok(&req.id, json!({ "subjects": subjects }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: SubjectPayload = match parse_payload(req) {
        Ok(p) => p,
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        warn!(method = %req.method, "empty subject name");
        return Outcome::Rejected.into_response(&req.id);
    }

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "subject create requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "subject create tx begin failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO subjects(id, name) VALUES(?, ?)",
        (&subject_id, &name),
    ) {
        warn!(error = %e, "subject insert failed");
        return Outcome::Rejected.into_response(&req.id);
    }
    for teacher_id in &payload.teachers {
        if let Err(e) = tx.execute(
            "INSERT INTO subject_teachers(subject_id, teacher_id) VALUES(?, ?)",
            (&subject_id, teacher_id),
        ) {
            warn!(error = %e, teacher_id = %teacher_id, "subject teacher link failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }
    if let Err(e) = tx.commit() {
        warn!(error = %e, "subject create commit failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: SubjectPayload = match parse_payload(req) {
        Ok(p) => p,
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let Some(subject_id) = payload.id.as_deref().filter(|s| !s.is_empty()) else {
        warn!(method = %req.method, "update without id");
        return Outcome::Rejected.into_response(&req.id);
    };
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        warn!(method = %req.method, "empty subject name");
        return Outcome::Rejected.into_response(&req.id);
    }

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "subject update requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "subject update tx begin failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };

    let changed = match tx.execute(
        "UPDATE subjects SET name = ? WHERE id = ?",
        (&name, subject_id),
    ) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "subject update failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if changed == 0 {
        warn!(subject_id = %subject_id, "subject not found");
        return Outcome::Rejected.into_response(&req.id);
    }

    // Replace-not-merge: the submitted teacher set is the whole set.
    if let Err(e) = tx.execute(
        "DELETE FROM subject_teachers WHERE subject_id = ?",
        [subject_id],
    ) {
        warn!(error = %e, "subject teacher unlink failed");
        return Outcome::Rejected.into_response(&req.id);
    }
    for teacher_id in &payload.teachers {
        if let Err(e) = tx.execute(
            "INSERT INTO subject_teachers(subject_id, teacher_id) VALUES(?, ?)",
            (subject_id, teacher_id),
        ) {
            warn!(error = %e, teacher_id = %teacher_id, "subject teacher link failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }
    if let Err(e) = tx.commit() {
        warn!(error = %e, "subject update commit failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    views.invalidate(&format!("{}/{}", LIST_VIEW, subject_id));
    Outcome::Success.into_response(&req.id)
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match delete_id(req) {
        Ok(v) => v,
        Err(outcome) => return outcome.into_response(&req.id),
    };

    let dependents = match integrity::subject_dependents(conn, &subject_id) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "subject dependent count failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if let Some(message) = integrity::blocking_message("subject", &dependents) {
        return Outcome::Blocked(message).into_response(&req.id);
    }

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "subject delete requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    match conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        Ok(0) => {
            warn!(subject_id = %subject_id, "subject not found");
            return Outcome::Rejected.into_response(&req.id);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "subject delete failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
