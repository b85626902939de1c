use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::levels::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::grades::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::units::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::sub_units::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::concepts::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::questions::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attempts::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::stats::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::generate::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::secrets::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
