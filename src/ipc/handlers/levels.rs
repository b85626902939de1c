use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, ROLE_ADMIN, ROLE_TEACHER};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{
    db_conn, ensure_name_free, ensure_no_children, next_order_index, optional_i64, optional_str,
    required_str, row_exists,
};
use crate::ipc::types::{AppState, Request};
use crate::reorder::{self, Direction, SiblingScope};

fn level_dto(conn: &Connection, id: &str) -> ServiceResult<serde_json::Value> {
    conn.query_row(
        "SELECT id, name, display_name, description, order_index
         FROM levels WHERE id = ?",
        [id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "displayName": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "orderIndex": r.get::<_, i64>(4)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| ServiceError::not_found("Level", id))
}

fn levels_list(state: &AppState, _req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(
        "SELECT id, name, display_name, description, order_index
         FROM levels ORDER BY order_index, id",
    )?;
    let levels = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "displayName": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "orderIndex": r.get::<_, i64>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "levels": levels }))
}

fn levels_get(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "levelId")?;
    Ok(json!({ "level": level_dto(conn, &id)? }))
}

fn levels_create(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_TEACHER, ROLE_ADMIN])?;

    let name = required_str(req, "name")?;
    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    ensure_name_free(conn, "levels", "Level", &name, None)?;

    let order_index = match optional_i64(req, "orderIndex")? {
        Some(v) => v,
        None => next_order_index(conn, "levels", None, None)?,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO levels(id, name, display_name, description, order_index, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &name, &display_name, description.as_deref(), order_index),
    )?;

    Ok(json!({ "level": level_dto(conn, &id)? }))
}

fn levels_update(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_TEACHER, ROLE_ADMIN])?;

    let id = required_str(req, "levelId")?;
    if !row_exists(conn, "levels", &id)? {
        return Err(ServiceError::not_found("Level", &id));
    }

    let name = required_str(req, "name")?;
    ensure_name_free(conn, "levels", "Level", &name, Some(&id))?;
    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE levels
         SET name = ?, display_name = ?, description = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (&name, &display_name, description.as_deref(), &id),
    )?;
    if let Some(order_index) = optional_i64(req, "orderIndex")? {
        tx.execute(
            "UPDATE levels SET order_index = ? WHERE id = ?",
            (order_index, &id),
        )?;
    }
    tx.commit()?;

    Ok(json!({ "level": level_dto(conn, &id)? }))
}

fn levels_delete(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_ADMIN])?;

    let id = required_str(req, "levelId")?;
    if !row_exists(conn, "levels", &id)? {
        return Err(ServiceError::not_found("Level", &id));
    }

    ensure_no_children(
        conn,
        "level",
        &id,
        &[
            ("grades", "level_id"),
            ("questions", "level_id"),
            ("student_profiles", "level_id"),
        ],
    )?;

    conn.execute("DELETE FROM levels WHERE id = ?", [&id])?;
    Ok(json!({ "ok": true }))
}

fn levels_reorder(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "levelId")?;
    let direction = Direction::parse(&required_str(req, "direction")?)?;
    let applied = reorder::reorder(conn, "levels", "Level", SiblingScope::All, &id, direction)?;
    Ok(json!({ "applied": applied }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "levels.list" => levels_list(state, req),
        "levels.get" => levels_get(state, req),
        "levels.create" => levels_create(state, req),
        "levels.update" => levels_update(state, req),
        "levels.delete" => levels_delete(state, req),
        "levels.reorder" => levels_reorder(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
