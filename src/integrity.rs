//! Dependent-record counts consulted before deletes. A delete is blocked
//! while any category still has rows; every violated category is named in
//! one message so the operator sees the full picture at once.

use rusqlite::Connection;

pub struct Dependent {
    pub label: &'static str,
    pub count: i64,
}

fn count(conn: &Connection, sql: &str, id: &str) -> anyhow::Result<i64> {
    Ok(conn.query_row(sql, [id], |r| r.get(0))?)
}

pub fn subject_dependents(conn: &Connection, subject_id: &str) -> anyhow::Result<Vec<Dependent>> {
    Ok(vec![
        Dependent {
            label: "teacher(s)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM subject_teachers WHERE subject_id = ?",
                subject_id,
            )?,
        },
        Dependent {
            label: "lesson(s)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM lessons WHERE subject_id = ?",
                subject_id,
            )?,
        },
    ])
}

pub fn class_dependents(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<Dependent>> {
    Ok(vec![
        Dependent {
            label: "student(s)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM students WHERE class_id = ?",
                class_id,
            )?,
        },
        Dependent {
            label: "lesson(s)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM lessons WHERE class_id = ?",
                class_id,
            )?,
        },
        Dependent {
            label: "event(s)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM events WHERE class_id = ?",
                class_id,
            )?,
        },
        Dependent {
            label: "announcement(s)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM announcements WHERE class_id = ?",
                class_id,
            )?,
        },
    ])
}

pub fn teacher_dependents(conn: &Connection, teacher_id: &str) -> anyhow::Result<Vec<Dependent>> {
    Ok(vec![
        Dependent {
            label: "subject(s)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM subject_teachers WHERE teacher_id = ?",
                teacher_id,
            )?,
        },
        Dependent {
            label: "lesson(s)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM lessons WHERE teacher_id = ?",
                teacher_id,
            )?,
        },
        Dependent {
            label: "supervised class(es)",
            count: count(
                conn,
                "SELECT COUNT(*) FROM classes WHERE supervisor_id = ?",
                teacher_id,
            )?,
        },
    ])
}

pub fn exam_dependents(conn: &Connection, exam_id: &str) -> anyhow::Result<Vec<Dependent>> {
    Ok(vec![Dependent {
        label: "result(s)",
        count: count(
            conn,
            "SELECT COUNT(*) FROM results WHERE exam_id = ?",
            exam_id,
        )?,
    }])
}

/// None when nothing blocks the delete, otherwise one message naming every
/// violated category, e.g. "cannot delete subject: 1 teacher(s), 2 lesson(s)
/// still reference it".
pub fn blocking_message(entity: &str, dependents: &[Dependent]) -> Option<String> {
    let violated: Vec<String> = dependents
        .iter()
        .filter(|d| d.count > 0)
        .map(|d| format!("{} {}", d.count, d.label))
        .collect();
    if violated.is_empty() {
        return None;
    }
    Some(format!(
        "cannot delete {}: {} still reference it",
        entity,
        violated.join(", ")
    ))
}
