//! Identity directory facade. Accounts live in the workspace's `accounts`
//! table, but the mutation core only reaches them through these functions so
//! the directory can be swapped for a remote provider without touching the
//! handlers.

use crate::auth::Role;
use rusqlite::Connection;
use uuid::Uuid;

pub struct NewAccount<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub role: Role,
}

pub struct AccountUpdate<'a> {
    pub username: &'a str,
    /// Credential is only replaced when a new non-empty value was submitted.
    pub password: Option<&'a str>,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

/// Outcome of a best-effort account deletion. A vanished account is not a
/// failure; transport problems are reported but do not abort the caller.
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    TransportError(anyhow::Error),
}

/// Provision an account and return its generated id. Identity-bound entity
/// rows take this id as their primary key.
pub fn create_user(conn: &Connection, new: &NewAccount) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO accounts(id, username, password, first_name, last_name, role)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            new.username,
            new.password,
            new.first_name,
            new.last_name,
            new.role.as_str(),
        ),
    )?;
    Ok(id)
}

pub fn update_user(conn: &Connection, id: &str, update: &AccountUpdate) -> anyhow::Result<()> {
    let changed = match update.password.filter(|p| !p.is_empty()) {
        Some(password) => conn.execute(
            "UPDATE accounts
             SET username = ?, password = ?, first_name = ?, last_name = ?
             WHERE id = ?",
            (
                update.username,
                password,
                update.first_name,
                update.last_name,
                id,
            ),
        )?,
        None => conn.execute(
            "UPDATE accounts
             SET username = ?, first_name = ?, last_name = ?
             WHERE id = ?",
            (update.username, update.first_name, update.last_name, id),
        )?,
    };
    if changed == 0 {
        anyhow::bail!("account {} not found", id);
    }
    Ok(())
}

pub fn delete_user(conn: &Connection, id: &str) -> DeleteOutcome {
    match conn.execute("DELETE FROM accounts WHERE id = ?", [id]) {
        Ok(0) => DeleteOutcome::NotFound,
        Ok(_) => DeleteOutcome::Deleted,
        Err(e) => DeleteOutcome::TransportError(e.into()),
    }
}
