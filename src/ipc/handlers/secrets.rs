use serde_json::json;

use crate::auth::{self, ROLE_ADMIN};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::secrets;

fn workspace<'a>(state: &'a AppState) -> ServiceResult<&'a std::path::Path> {
    state
        .workspace
        .as_deref()
        .ok_or(ServiceError::NoWorkspace)
}

fn secrets_set(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_ADMIN])?;
    let value = required_str(req, "value")?;
    secrets::store_api_key(workspace(state)?, &value)?;
    Ok(json!({ "ok": true }))
}

fn secrets_get(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_ADMIN])?;
    let value = secrets::load_api_key(workspace(state)?)
        .ok_or_else(|| ServiceError::NotFound("no API key stored".into()))?;
    Ok(json!({ "value": value }))
}

fn secrets_exists(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_ADMIN])?;
    Ok(json!({ "exists": secrets::api_key_exists(workspace(state)?) }))
}

fn secrets_delete(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_ADMIN])?;
    let existed = secrets::delete_api_key(workspace(state)?)?;
    Ok(json!({ "ok": true, "existed": existed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "secrets.set" => secrets_set(state, req),
        "secrets.get" => secrets_get(state, req),
        "secrets.exists" => secrets_exists(state, req),
        "secrets.delete" => secrets_delete(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
