use super::outcome::Outcome;
use super::types::Request;
use crate::auth::{Caller, Role};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::de::DeserializeOwned;

/// Typed caller from the request claims. An unknown role string means the
/// identity provider issued something we do not recognize; resolve to no
/// caller and let the authorization checks fail closed.
pub fn resolve_caller(req: &Request) -> Option<Caller> {
    let claims = req.caller.as_ref()?;
    let role = Role::parse(&claims.role)?;
    Some(Caller {
        id: claims.user_id.clone(),
        role,
    })
}

/// Deserialize the typed field set of a create/update call. A payload that
/// does not match the entity's contract is a validation failure: generic
/// error outcome, nothing touched.
pub fn parse_payload<T: DeserializeOwned>(req: &Request) -> Result<T, Outcome> {
    serde_json::from_value(req.params.clone()).map_err(|e| {
        tracing::warn!(method = %req.method, error = %e, "malformed mutation payload");
        Outcome::Rejected
    })
}

/// Delete calls submit a key-value set; the target row id rides under "id".
pub fn delete_id(req: &Request) -> Result<String, Outcome> {
    req.params
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            tracing::warn!(method = %req.method, "delete call without id");
            Outcome::Rejected
        })
}

pub const WEEK_DAYS: [&str; 5] = ["MONDAY", "TUESDAY", "WEDNESDAY", "THURSDAY", "FRIDAY"];

pub fn valid_day(day: &str) -> bool {
    WEEK_DAYS.contains(&day)
}

/// Parse an RFC 3339 timestamp and return the canonical UTC text stored in
/// the db.
pub fn canonical_datetime(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Parse a plain YYYY-MM-DD date (birthdays, assignment windows).
pub fn canonical_date(raw: &str) -> Option<String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.to_string())
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
