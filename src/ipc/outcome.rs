use super::error::ok;
use serde_json::json;

/// Result of one mutation attempt, handed back to the form that submitted
/// it. `success` and `error` are mutually exclusive; `message` is only
/// present when the integrity guard blocked a delete. Every other failure
/// is generic and the shell shows its own fallback text.
pub enum Outcome {
    Success,
    Rejected,
    Blocked(String),
}

impl Outcome {
    pub fn into_response(self, id: &str) -> serde_json::Value {
        match self {
            Outcome::Success => ok(id, json!({ "success": true, "error": false })),
            Outcome::Rejected => ok(id, json!({ "success": false, "error": true })),
            Outcome::Blocked(message) => ok(
                id,
                json!({ "success": false, "error": true, "message": message }),
            ),
        }
    }
}
