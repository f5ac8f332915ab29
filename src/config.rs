//! Process configuration. Defaults live in code; a JSON file (path from
//! SCHOOLD_CONFIG, else ./schoold.json) may override them. Loaded once in
//! main and passed by reference to the router.

use crate::auth::Role;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_access")]
    pub access: Vec<AccessRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessRule {
    pub method: String,
    pub roles: Vec<Role>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            access: default_access(),
        }
    }
}

fn rule(method: &str, roles: &[Role]) -> AccessRule {
    AccessRule {
        method: method.to_string(),
        roles: roles.to_vec(),
    }
}

fn default_access() -> Vec<AccessRule> {
    use Role::{Admin, Student, Teacher};
    vec![
        rule("subjects.list", &[Admin]),
        rule("classes.list", &[Admin, Teacher]),
        rule("teachers.list", &[Admin, Teacher]),
        rule("students.list", &[Admin, Teacher, Student]),
        rule("lessons.list", &[Admin, Teacher]),
        rule("exams.list", &[Admin, Teacher, Student]),
        rule("assignments.list", &[Admin, Teacher, Student]),
        rule("grades.list", &[Admin, Teacher, Student]),
    ]
}

impl Config {
    pub fn load() -> Config {
        let path = env::var("SCHOOLD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("schoold.json"));
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    pub fn access_map(&self) -> AccessMap {
        AccessMap {
            rules: self.access.clone(),
        }
    }
}

/// Static method-to-role table consulted by the router for read methods.
/// Mutation methods are not listed here; their authorization is ownership-
/// aware and lives in the handlers.
pub struct AccessMap {
    rules: Vec<AccessRule>,
}

impl AccessMap {
    /// None when the method is ungated; otherwise whether the resolved role
    /// may call it. No caller on a gated method is a denial.
    pub fn allows(&self, method: &str, role: Option<Role>) -> Option<bool> {
        let rule = self.rules.iter().find(|r| r.method == method)?;
        Some(match role {
            Some(role) => rule.roles.contains(&role),
            None => false,
        })
    }
}
