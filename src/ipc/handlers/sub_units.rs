use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{
    db_conn, ensure_no_children, next_order_index, optional_i64, optional_str, required_str,
    row_exists,
};
use crate::ipc::types::{AppState, Request};
use crate::reorder::{self, Direction, SiblingScope};

const SELECT_DTO: &str = "SELECT su.id, su.unit_id, u.name, su.name, su.display_name, su.description, su.order_index
     FROM sub_units su JOIN units u ON u.id = su.unit_id";

fn row_to_dto(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "unitId": r.get::<_, String>(1)?,
        "unitName": r.get::<_, String>(2)?,
        "name": r.get::<_, String>(3)?,
        "displayName": r.get::<_, String>(4)?,
        "description": r.get::<_, Option<String>>(5)?,
        "orderIndex": r.get::<_, i64>(6)?,
    }))
}

fn sub_unit_dto(conn: &Connection, id: &str) -> ServiceResult<serde_json::Value> {
    conn.query_row(&format!("{} WHERE su.id = ?", SELECT_DTO), [id], row_to_dto)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("SubUnit", id))
}

fn sub_units_list(state: &AppState, _req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(&format!("{} ORDER BY su.order_index, su.id", SELECT_DTO))?;
    let sub_units = stmt
        .query_map([], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subUnits": sub_units }))
}

fn sub_units_list_by_unit(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let unit_id = required_str(req, "unitId")?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE su.unit_id = ? ORDER BY su.order_index, su.id",
        SELECT_DTO
    ))?;
    let sub_units = stmt
        .query_map([&unit_id], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subUnits": sub_units }))
}

fn sub_units_get(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "subUnitId")?;
    Ok(json!({ "subUnit": sub_unit_dto(conn, &id)? }))
}

fn sub_units_create(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let name = required_str(req, "name")?;
    let unit_id = required_str(req, "unitId")?;
    if !row_exists(conn, "units", &unit_id)? {
        return Err(ServiceError::not_found("Unit", &unit_id));
    }

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let order_index = match optional_i64(req, "orderIndex")? {
        Some(v) => v,
        None => next_order_index(conn, "sub_units", Some("unit_id"), Some(&unit_id))?,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sub_units(id, unit_id, name, display_name, description, order_index, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &unit_id, &name, &display_name, description.as_deref(), order_index),
    )?;

    Ok(json!({ "subUnit": sub_unit_dto(conn, &id)? }))
}

fn sub_units_update(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "subUnitId")?;
    if !row_exists(conn, "sub_units", &id)? {
        return Err(ServiceError::not_found("SubUnit", &id));
    }

    let name = required_str(req, "name")?;
    let new_parent = match optional_str(req, "unitId")? {
        Some(unit_id) => {
            if !row_exists(conn, "units", &unit_id)? {
                return Err(ServiceError::not_found("Unit", &unit_id));
            }
            Some(unit_id)
        }
        None => None,
    };

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let tx = conn.unchecked_transaction()?;
    if let Some(unit_id) = &new_parent {
        tx.execute(
            "UPDATE sub_units SET unit_id = ? WHERE id = ?",
            (unit_id, &id),
        )?;
    }
    tx.execute(
        "UPDATE sub_units
         SET name = ?, display_name = ?, description = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (&name, &display_name, description.as_deref(), &id),
    )?;
    if let Some(order_index) = optional_i64(req, "orderIndex")? {
        tx.execute(
            "UPDATE sub_units SET order_index = ? WHERE id = ?",
            (order_index, &id),
        )?;
    }
    tx.commit()?;

    Ok(json!({ "subUnit": sub_unit_dto(conn, &id)? }))
}

fn sub_units_delete(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "subUnitId")?;
    if !row_exists(conn, "sub_units", &id)? {
        return Err(ServiceError::not_found("SubUnit", &id));
    }

    ensure_no_children(
        conn,
        "sub-unit",
        &id,
        &[
            ("concepts", "sub_unit_id"),
            ("questions", "sub_unit_id"),
            ("student_profiles", "sub_unit_id"),
        ],
    )?;

    conn.execute("DELETE FROM sub_units WHERE id = ?", [&id])?;
    Ok(json!({ "ok": true }))
}

fn sub_units_reorder(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "subUnitId")?;
    let direction = Direction::parse(&required_str(req, "direction")?)?;

    let unit_id: Option<String> = conn
        .query_row("SELECT unit_id FROM sub_units WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(unit_id) = unit_id else {
        return Err(ServiceError::not_found("SubUnit", &id));
    };

    let applied = reorder::reorder(
        conn,
        "sub_units",
        "SubUnit",
        SiblingScope::Parent {
            column: "unit_id",
            id: &unit_id,
        },
        &id,
        direction,
    )?;
    Ok(json!({ "applied": applied }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "subUnits.list" => sub_units_list(state, req),
        "subUnits.listByUnit" => sub_units_list_by_unit(state, req),
        "subUnits.get" => sub_units_get(state, req),
        "subUnits.create" => sub_units_create(state, req),
        "subUnits.update" => sub_units_update(state, req),
        "subUnits.delete" => sub_units_delete(state, req),
        "subUnits.reorder" => sub_units_reorder(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
