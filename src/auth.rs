use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role claim issued by the identity provider. Closed set; anything else on
/// the wire fails to resolve and the caller is treated as unauthenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated actor behind one request, resolved once by the router.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

/// Subject/Class/Teacher/Student records are administrative data; only the
/// admin role may mutate them.
pub fn is_admin(caller: Option<&Caller>) -> bool {
    matches!(caller, Some(c) if c.role == Role::Admin)
}

/// True when the lesson exists and is taught by `teacher_id`. A missing
/// lesson resolves to false so the check fails closed.
pub fn lesson_owned_by(
    conn: &Connection,
    lesson_id: &str,
    teacher_id: &str,
) -> anyhow::Result<bool> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT teacher_id FROM lessons WHERE id = ?",
            [lesson_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(owner.as_deref() == Some(teacher_id))
}

/// True when the exam exists and hangs off a lesson taught by `teacher_id`.
pub fn exam_owned_by(conn: &Connection, exam_id: &str, teacher_id: &str) -> anyhow::Result<bool> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT l.teacher_id
             FROM exams e
             JOIN lessons l ON l.id = e.lesson_id
             WHERE e.id = ?",
            [exam_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(owner.as_deref() == Some(teacher_id))
}

/// True when the assignment exists and hangs off a lesson taught by
/// `teacher_id`.
pub fn assignment_owned_by(
    conn: &Connection,
    assignment_id: &str,
    teacher_id: &str,
) -> anyhow::Result<bool> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT l.teacher_id
             FROM assignments a
             JOIN lessons l ON l.id = a.lesson_id
             WHERE a.id = ?",
            [assignment_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(owner.as_deref() == Some(teacher_id))
}

/// True when the subject's teacher set contains `teacher_id`. A missing
/// subject resolves to false.
pub fn teaches_subject(
    conn: &Connection,
    subject_id: &str,
    teacher_id: &str,
) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subject_teachers WHERE subject_id = ? AND teacher_id = ?",
            [subject_id, teacher_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// A teacher may place lessons in a class they supervise, or one they
/// already teach at least one lesson in. A missing class resolves to false.
pub fn may_use_class(conn: &Connection, class_id: &str, teacher_id: &str) -> anyhow::Result<bool> {
    let supervisor: Option<Option<String>> = conn
        .query_row(
            "SELECT supervisor_id FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(supervisor) = supervisor else {
        return Ok(false);
    };
    if supervisor.as_deref() == Some(teacher_id) {
        return Ok(true);
    }
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM lessons WHERE class_id = ? AND teacher_id = ? LIMIT 1",
            [class_id, teacher_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}
