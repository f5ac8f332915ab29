use crate::auth::{self, Role};
use crate::identity::{self, AccountUpdate, DeleteOutcome, NewAccount};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{canonical_date, delete_id, now_ts, parse_payload, resolve_caller};
use crate::ipc::outcome::Outcome;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

const LIST_VIEW: &str = "/list/students";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentPayload {
    #[serde(default)]
    id: Option<String>,
    username: String,
    #[serde(default)]
    password: Option<String>,
    name: String,
    surname: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    address: String,
    #[serde(default)]
    img: Option<String>,
    blood_type: String,
    sex: String,
    birthday: String,
    grade_id: String,
    class_id: String,
}

impl StudentPayload {
    fn normalized(mut self) -> Self {
        self.username = self.username.trim().to_string();
        self.name = self.name.trim().to_string();
        self.surname = self.surname.trim().to_string();
        self.email = self.email.filter(|s| !s.is_empty());
        self.phone = self.phone.filter(|s| !s.is_empty());
        self.img = self.img.filter(|s| !s.is_empty());
        self
    }

    fn valid_profile(&self) -> bool {
        !self.username.is_empty()
            && !self.name.is_empty()
            && !self.surname.is_empty()
            && !self.grade_id.is_empty()
            && !self.class_id.is_empty()
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.username, s.name, s.surname, s.grade_id, s.class_id
         FROM students s
         ORDER BY s.surname, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            let name: String = row.get(2)?;
            let surname: String = row.get(3)?;
            let grade_id: String = row.get(4)?;
            let class_id: String = row.get(5)?;
            Ok(json!({
                "id": id,
                "username": username,
                "name": name,
                "surname": surname,
                "gradeId": grade_id,
                "classId": class_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: StudentPayload = match parse_payload::<StudentPayload>(req) {
        Ok(p) => p.normalized(),
        Err(outcome) => return outcome.into_response(&req.id),
    };
    if !payload.valid_profile() {
        warn!(method = %req.method, "student profile fields invalid");
        return Outcome::Rejected.into_response(&req.id);
    }
    let Some(password) = payload.password.as_deref().filter(|p| !p.is_empty()) else {
        warn!(method = %req.method, "student create requires a credential");
        return Outcome::Rejected.into_response(&req.id);
    };
    let Some(birthday) = canonical_date(&payload.birthday) else {
        warn!(method = %req.method, "student birthday unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    // The capacity check and the insert share one transaction so two
    // concurrent enrollments cannot both pass the count.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "student create tx begin failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };

    let class_row: Option<(i64, i64)> = match tx
        .query_row(
            "SELECT c.capacity,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id)
             FROM classes c
             WHERE c.id = ?",
            [&payload.class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "class capacity lookup failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    let Some((capacity, enrolled)) = class_row else {
        warn!(class_id = %payload.class_id, "class not found");
        return Outcome::Rejected.into_response(&req.id);
    };
    if enrolled >= capacity {
        info!(class_id = %payload.class_id, capacity, "class at capacity");
        return Outcome::Rejected.into_response(&req.id);
    }

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "student create requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    let student_id = match identity::create_user(
        &tx,
        &NewAccount {
            username: &payload.username,
            password,
            first_name: &payload.name,
            last_name: &payload.surname,
            role: Role::Student,
        },
    ) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "student account provisioning failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };

    if let Err(e) = tx.execute(
        "INSERT INTO students(
           id, username, name, surname, email, phone, address, img,
           blood_type, sex, birthday, grade_id, class_id, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &payload.username,
            &payload.name,
            &payload.surname,
            payload.email.as_deref(),
            payload.phone.as_deref(),
            &payload.address,
            payload.img.as_deref(),
            &payload.blood_type,
            &payload.sex,
            &birthday,
            &payload.grade_id,
            &payload.class_id,
            now_ts(),
        ),
    ) {
        warn!(error = %e, "student insert failed");
        return Outcome::Rejected.into_response(&req.id);
    }
    if let Err(e) = tx.commit() {
        warn!(error = %e, "student create commit failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: StudentPayload = match parse_payload::<StudentPayload>(req) {
        Ok(p) => p.normalized(),
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let Some(student_id) = payload.id.clone().filter(|s| !s.is_empty()) else {
        warn!(method = %req.method, "update without id");
        return Outcome::Rejected.into_response(&req.id);
    };
    if !payload.valid_profile() {
        warn!(method = %req.method, "student profile fields invalid");
        return Outcome::Rejected.into_response(&req.id);
    }
    let Some(birthday) = canonical_date(&payload.birthday) else {
        warn!(method = %req.method, "student birthday unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "student update requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "student update tx begin failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };

    if let Err(e) = identity::update_user(
        &tx,
        &student_id,
        &AccountUpdate {
            username: &payload.username,
            password: payload.password.as_deref(),
            first_name: &payload.name,
            last_name: &payload.surname,
        },
    ) {
        warn!(error = %e, student_id = %student_id, "student account update failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    let changed = match tx.execute(
        "UPDATE students
         SET username = ?, name = ?, surname = ?, email = ?, phone = ?,
             address = ?, img = ?, blood_type = ?, sex = ?, birthday = ?,
             grade_id = ?, class_id = ?
         WHERE id = ?",
        (
            &payload.username,
            &payload.name,
            &payload.surname,
            payload.email.as_deref(),
            payload.phone.as_deref(),
            &payload.address,
            payload.img.as_deref(),
            &payload.blood_type,
            &payload.sex,
            &birthday,
            &payload.grade_id,
            &payload.class_id,
            &student_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "student update failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if changed == 0 {
        warn!(student_id = %student_id, "student not found");
        return Outcome::Rejected.into_response(&req.id);
    }

    if let Err(e) = tx.commit() {
        warn!(error = %e, "student update commit failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    views.invalidate(&format!("{}/{}", LIST_VIEW, student_id));
    Outcome::Success.into_response(&req.id)
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match delete_id(req) {
        Ok(v) => v,
        Err(outcome) => return outcome.into_response(&req.id),
    };

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "student delete requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    match identity::delete_user(conn, &student_id) {
        DeleteOutcome::Deleted => {}
        DeleteOutcome::NotFound => {
            info!(student_id = %student_id, "directory account already absent");
        }
        DeleteOutcome::TransportError(e) => {
            warn!(error = %e, student_id = %student_id, "directory delete failed, continuing");
        }
    }

    match conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(0) => {
            warn!(student_id = %student_id, "student not found");
            return Outcome::Rejected.into_response(&req.id);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "student delete failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
