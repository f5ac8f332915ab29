use crate::auth::{self, Caller, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{canonical_date, delete_id, parse_payload, resolve_caller};
use crate::ipc::outcome::Outcome;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

const LIST_VIEW: &str = "/list/assignments";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentPayload {
    #[serde(default)]
    id: Option<String>,
    title: String,
    start_date: String,
    due_date: String,
    lesson_id: String,
}

/// Same ownership rule as exams: the target lesson must belong to the
/// teacher, and on update so must the assignment being rewritten.
fn allow_assignment_write(
    conn: &Connection,
    caller: Option<&Caller>,
    payload: &AssignmentPayload,
    existing_assignment: Option<&str>,
) -> anyhow::Result<bool> {
    let Some(caller) = caller else {
        warn!("assignment mutation without caller identity");
        return Ok(false);
    };
    match caller.role {
        Role::Admin => Ok(true),
        Role::Teacher => {
            if !auth::lesson_owned_by(conn, &payload.lesson_id, &caller.id)? {
                warn!(caller = %caller.id, lesson_id = %payload.lesson_id, "teacher does not own the target lesson");
                return Ok(false);
            }
            if let Some(assignment_id) = existing_assignment {
                if !auth::assignment_owned_by(conn, assignment_id, &caller.id)? {
                    warn!(caller = %caller.id, assignment_id, "teacher cannot rewrite an assignment they do not own");
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Role::Student => {
            warn!(caller = %caller.id, "students cannot write assignments");
            Ok(false)
        }
    }
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, start_date, due_date, lesson_id
         FROM assignments
         ORDER BY due_date",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let start_date: String = row.get(2)?;
            let due_date: String = row.get(3)?;
            let lesson_id: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "title": title,
                "startDate": start_date,
                "dueDate": due_date,
                "lessonId": lesson_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: AssignmentPayload = match parse_payload(req) {
        Ok(p) => p,
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        warn!(method = %req.method, "empty assignment title");
        return Outcome::Rejected.into_response(&req.id);
    }
    let (Some(start_date), Some(due_date)) = (
        canonical_date(&payload.start_date),
        canonical_date(&payload.due_date),
    ) else {
        warn!(method = %req.method, "assignment date window unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    match allow_assignment_write(conn, resolve_caller(req).as_ref(), &payload, None) {
        Ok(true) => {}
        Ok(false) => return Outcome::Rejected.into_response(&req.id),
        Err(e) => {
            warn!(error = %e, "assignment authorization check failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(id, title, start_date, due_date, lesson_id)
         VALUES(?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &title,
            &start_date,
            &due_date,
            &payload.lesson_id,
        ),
    ) {
        warn!(error = %e, "assignment insert failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

fn handle_assignments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: AssignmentPayload = match parse_payload(req) {
        Ok(p) => p,
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let Some(assignment_id) = payload.id.clone().filter(|s| !s.is_empty()) else {
        warn!(method = %req.method, "update without id");
        return Outcome::Rejected.into_response(&req.id);
    };
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        warn!(method = %req.method, "empty assignment title");
        return Outcome::Rejected.into_response(&req.id);
    }
    let (Some(start_date), Some(due_date)) = (
        canonical_date(&payload.start_date),
        canonical_date(&payload.due_date),
    ) else {
        warn!(method = %req.method, "assignment date window unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    match allow_assignment_write(
        conn,
        resolve_caller(req).as_ref(),
        &payload,
        Some(&assignment_id),
    ) {
        Ok(true) => {}
        Ok(false) => return Outcome::Rejected.into_response(&req.id),
        Err(e) => {
            warn!(error = %e, "assignment authorization check failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    let changed = match conn.execute(
        "UPDATE assignments
         SET title = ?, start_date = ?, due_date = ?, lesson_id = ?
         WHERE id = ?",
        (
            &title,
            &start_date,
            &due_date,
            &payload.lesson_id,
            &assignment_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "assignment update failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if changed == 0 {
        warn!(assignment_id = %assignment_id, "assignment not found");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    views.invalidate(&format!("{}/{}", LIST_VIEW, assignment_id));
    Outcome::Success.into_response(&req.id)
}

fn handle_assignments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assignment_id = match delete_id(req) {
        Ok(v) => v,
        Err(outcome) => return outcome.into_response(&req.id),
    };

    let allowed = match resolve_caller(req) {
        Some(caller) => match caller.role {
            Role::Admin => true,
            Role::Teacher => match auth::assignment_owned_by(conn, &assignment_id, &caller.id) {
                Ok(owned) => {
                    if !owned {
                        warn!(caller = %caller.id, assignment_id = %assignment_id, "teacher cannot delete an assignment they do not own");
                    }
                    owned
                }
                Err(e) => {
                    warn!(error = %e, "assignment ownership check failed");
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

    match conn.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id]) {
        Ok(0) => {
            warn!(assignment_id = %assignment_id, "assignment not found");
            return Outcome::Rejected.into_response(&req.id);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "assignment delete failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.list" => Some(handle_assignments_list(state, req)),
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.update" => Some(handle_assignments_update(state, req)),
        "assignments.delete" => Some(handle_assignments_delete(state, req)),
        _ => None,
    }
}
