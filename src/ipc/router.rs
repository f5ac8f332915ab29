use super::handlers;
use super::helpers;
use super::types::{AppState, Request};
use crate::config::AccessMap;
use crate::ipc::error::err;

pub fn handle_request(access: &AccessMap, state: &mut AppState, req: Request) -> serde_json::Value {
    // Read methods are gated by the static access table; mutation methods
    // carry their own ownership-aware checks inside the handlers.
    let role = helpers::resolve_caller(&req).map(|c| c.role);
    if let Some(allowed) = access.allows(&req.method, role) {
        if !allowed {
            tracing::warn!(method = %req.method, role = ?role, "method not allowed for caller");
            return err(&req.id, "forbidden", "caller may not call this method", None);
        }
    }

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::classes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::teachers::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::lessons::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::exams::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::assignments::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::grades::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
