use crate::auth;
use crate::integrity;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{delete_id, parse_payload, resolve_caller};
use crate::ipc::outcome::Outcome;
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

const LIST_VIEW: &str = "/list/classes";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassPayload {
    #[serde(default)]
    id: Option<String>,
    name: String,
    capacity: i64,
    #[serde(default)]
    grade_id: Option<String>,
    #[serde(default)]
    supervisor_id: Option<String>,
}

impl ClassPayload {
    fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.grade_id = self.grade_id.filter(|s| !s.is_empty());
        self.supervisor_id = self.supervisor_id.filter(|s| !s.is_empty());
        self
    }
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name, c.capacity, c.grade_id, c.supervisor_id,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let capacity: i64 = row.get(2)?;
            let grade_id: Option<String> = row.get(3)?;
            let supervisor_id: Option<String> = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "capacity": capacity,
                "gradeId": grade_id,
                "supervisorId": supervisor_id,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: ClassPayload = match parse_payload::<ClassPayload>(req) {
        Ok(p) => p.normalized(),
        Err(outcome) => return outcome.into_response(&req.id),
    };
    if payload.name.is_empty() || payload.capacity <= 0 {
        warn!(method = %req.method, "class name/capacity invalid");
        return Outcome::Rejected.into_response(&req.id);
    }

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "class create requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, capacity, grade_id, supervisor_id)
         VALUES(?, ?, ?, ?, ?)",
        (
            &class_id,
            &payload.name,
            payload.capacity,
            payload.grade_id.as_deref(),
            payload.supervisor_id.as_deref(),
        ),
    ) {
        warn!(error = %e, "class insert failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: ClassPayload = match parse_payload::<ClassPayload>(req) {
        Ok(p) => p.normalized(),
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let Some(class_id) = payload.id.as_deref().filter(|s| !s.is_empty()) else {
        warn!(method = %req.method, "update without id");
        return Outcome::Rejected.into_response(&req.id);
    };
    if payload.name.is_empty() || payload.capacity <= 0 {
        warn!(method = %req.method, "class name/capacity invalid");
        return Outcome::Rejected.into_response(&req.id);
    }

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "class update requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    let changed = match conn.execute(
        "UPDATE classes
         SET name = ?, capacity = ?, grade_id = ?, supervisor_id = ?
         WHERE id = ?",
        (
            &payload.name,
            payload.capacity,
            payload.grade_id.as_deref(),
            payload.supervisor_id.as_deref(),
            class_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "class update failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if changed == 0 {
        warn!(class_id = %class_id, "class not found");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    views.invalidate(&format!("{}/{}", LIST_VIEW, class_id));
    Outcome::Success.into_response(&req.id)
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match delete_id(req) {
        Ok(v) => v,
        Err(outcome) => return outcome.into_response(&req.id),
    };

    let dependents = match integrity::class_dependents(conn, &class_id) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "class dependent count failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if let Some(message) = integrity::blocking_message("class", &dependents) {
        return Outcome::Blocked(message).into_response(&req.id);
    }

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "class delete requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    match conn.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        Ok(0) => {
            warn!(class_id = %class_id, "class not found");
            return Outcome::Rejected.into_response(&req.id);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "class delete failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
