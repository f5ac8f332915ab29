use crate::auth::{self, Role};
use crate::identity::{self, AccountUpdate, DeleteOutcome, NewAccount};
use crate::integrity;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{canonical_date, delete_id, now_ts, parse_payload, resolve_caller};
use crate::ipc::outcome::Outcome;
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

const LIST_VIEW: &str = "/list/teachers";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherPayload {
    #[serde(default)]
    id: Option<String>,
    username: String,
    /// Required on create; on update an empty or absent value keeps the
    /// stored credential.
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
    /// Full subject set; update replaces the links, never merges.
    #[serde(default)]
    subjects: Vec<String>,
}

impl TeacherPayload {
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
        !self.username.is_empty() && !self.name.is_empty() && !self.surname.is_empty()
    }
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT t.id, t.username, t.name, t.surname, t.email, t.phone,
           (SELECT COUNT(*) FROM lessons l WHERE l.teacher_id = t.id) AS lesson_count,
           (SELECT COUNT(*) FROM classes c WHERE c.supervisor_id = t.id) AS supervised_count
         FROM teachers t
         ORDER BY t.surname, t.name",
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
            let email: Option<String> = row.get(4)?;
            let phone: Option<String> = row.get(5)?;
            let lesson_count: i64 = row.get(6)?;
            let supervised_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "username": username,
                "name": name,
                "surname": surname,
                "email": email,
                "phone": phone,
                "lessonCount": lesson_count,
                "supervisedClassCount": supervised_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: TeacherPayload = match parse_payload::<TeacherPayload>(req) {
        Ok(p) => p.normalized(),
        Err(outcome) => return outcome.into_response(&req.id),
    };
    if !payload.valid_profile() {
        warn!(method = %req.method, "teacher profile fields invalid");
        return Outcome::Rejected.into_response(&req.id);
    }
    let Some(password) = payload.password.as_deref().filter(|p| !p.is_empty()) else {
        warn!(method = %req.method, "teacher create requires a credential");
        return Outcome::Rejected.into_response(&req.id);
    };
    let Some(birthday) = canonical_date(&payload.birthday) else {
        warn!(method = %req.method, "teacher birthday unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "teacher create requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "teacher create tx begin failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };

    // The directory account comes first; its generated id keys the row.
    let teacher_id = match identity::create_user(
        &tx,
        &NewAccount {
            username: &payload.username,
            password,
            first_name: &payload.name,
            last_name: &payload.surname,
            role: Role::Teacher,
        },
    ) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "teacher account provisioning failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };

    if let Err(e) = tx.execute(
        "INSERT INTO teachers(
           id, username, name, surname, email, phone, address, img,
           blood_type, sex, birthday, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
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
            now_ts(),
        ),
    ) {
        warn!(error = %e, "teacher insert failed");
        return Outcome::Rejected.into_response(&req.id);
    }
    for subject_id in &payload.subjects {
        if let Err(e) = tx.execute(
            "INSERT INTO subject_teachers(subject_id, teacher_id) VALUES(?, ?)",
            (subject_id, &teacher_id),
        ) {
            warn!(error = %e, subject_id = %subject_id, "teacher subject link failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }
    if let Err(e) = tx.commit() {
        warn!(error = %e, "teacher create commit failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let payload: TeacherPayload = match parse_payload::<TeacherPayload>(req) {
        Ok(p) => p.normalized(),
        Err(outcome) => return outcome.into_response(&req.id),
    };
    let Some(teacher_id) = payload.id.clone().filter(|s| !s.is_empty()) else {
        warn!(method = %req.method, "update without id");
        return Outcome::Rejected.into_response(&req.id);
    };
    if !payload.valid_profile() {
        warn!(method = %req.method, "teacher profile fields invalid");
        return Outcome::Rejected.into_response(&req.id);
    }
    let Some(birthday) = canonical_date(&payload.birthday) else {
        warn!(method = %req.method, "teacher birthday unparseable");
        return Outcome::Rejected.into_response(&req.id);
    };

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "teacher update requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "teacher update tx begin failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };

    if let Err(e) = identity::update_user(
        &tx,
        &teacher_id,
        &AccountUpdate {
            username: &payload.username,
            password: payload.password.as_deref(),
            first_name: &payload.name,
            last_name: &payload.surname,
        },
    ) {
        warn!(error = %e, teacher_id = %teacher_id, "teacher account update failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    let changed = match tx.execute(
        "UPDATE teachers
         SET username = ?, name = ?, surname = ?, email = ?, phone = ?,
             address = ?, img = ?, blood_type = ?, sex = ?, birthday = ?
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
            &teacher_id,
        ),
    ) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "teacher update failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if changed == 0 {
        warn!(teacher_id = %teacher_id, "teacher not found");
        return Outcome::Rejected.into_response(&req.id);
    }

    if let Err(e) = tx.execute(
        "DELETE FROM subject_teachers WHERE teacher_id = ?",
        [&teacher_id],
    ) {
        warn!(error = %e, "teacher subject unlink failed");
        return Outcome::Rejected.into_response(&req.id);
    }
    for subject_id in &payload.subjects {
        if let Err(e) = tx.execute(
            "INSERT INTO subject_teachers(subject_id, teacher_id) VALUES(?, ?)",
            (subject_id, &teacher_id),
        ) {
            warn!(error = %e, subject_id = %subject_id, "teacher subject link failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }
    if let Err(e) = tx.commit() {
        warn!(error = %e, "teacher update commit failed");
        return Outcome::Rejected.into_response(&req.id);
    }

    views.invalidate(LIST_VIEW);
    views.invalidate(&format!("{}/{}", LIST_VIEW, teacher_id));
    Outcome::Success.into_response(&req.id)
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, views, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match delete_id(req) {
        Ok(v) => v,
        Err(outcome) => return outcome.into_response(&req.id),
    };

    let dependents = match integrity::teacher_dependents(conn, &teacher_id) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "teacher dependent count failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    };
    if let Some(message) = integrity::blocking_message("teacher", &dependents) {
        return Outcome::Blocked(message).into_response(&req.id);
    }

    if !auth::is_admin(resolve_caller(req).as_ref()) {
        warn!(method = %req.method, "teacher delete requires the admin role");
        return Outcome::Rejected.into_response(&req.id);
    }

    // Best effort: a directory account that is already gone must not stop
    // the record deletion.
    match identity::delete_user(conn, &teacher_id) {
        DeleteOutcome::Deleted => {}
        DeleteOutcome::NotFound => {
            info!(teacher_id = %teacher_id, "directory account already absent");
        }
        DeleteOutcome::TransportError(e) => {
            warn!(error = %e, teacher_id = %teacher_id, "directory delete failed, continuing");
        }
    }

    match conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        Ok(0) => {
            warn!(teacher_id = %teacher_id, "teacher not found");
            return Outcome::Rejected.into_response(&req.id);
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "teacher delete failed");
            return Outcome::Rejected.into_response(&req.id);
        }
    }

    views.invalidate(LIST_VIEW);
    Outcome::Success.into_response(&req.id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
