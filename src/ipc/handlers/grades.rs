use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{
    db_conn, ensure_name_free, ensure_no_children, next_order_index, optional_i64, optional_str,
    required_str, row_exists,
};
use crate::ipc::types::{AppState, Request};
use crate::reorder::{self, Direction, SiblingScope};

const SELECT_DTO: &str = "SELECT g.id, g.level_id, l.name, g.name, g.display_name, g.description, g.order_index
     FROM grades g JOIN levels l ON l.id = g.level_id";

fn row_to_dto(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "levelId": r.get::<_, String>(1)?,
        "levelName": r.get::<_, String>(2)?,
        "name": r.get::<_, String>(3)?,
        "displayName": r.get::<_, String>(4)?,
        "description": r.get::<_, Option<String>>(5)?,
        "orderIndex": r.get::<_, i64>(6)?,
    }))
}

fn grade_dto(conn: &Connection, id: &str) -> ServiceResult<serde_json::Value> {
    conn.query_row(&format!("{} WHERE g.id = ?", SELECT_DTO), [id], row_to_dto)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Grade", id))
}

fn grades_list(state: &AppState, _req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(&format!("{} ORDER BY g.order_index, g.id", SELECT_DTO))?;
    let grades = stmt
        .query_map([], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "grades": grades }))
}

fn grades_list_by_level(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let level_id = required_str(req, "levelId")?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE g.level_id = ? ORDER BY g.order_index, g.id",
        SELECT_DTO
    ))?;
    let grades = stmt
        .query_map([&level_id], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "grades": grades }))
}

fn grades_get(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "gradeId")?;
    Ok(json!({ "grade": grade_dto(conn, &id)? }))
}

fn grades_create(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let name = required_str(req, "name")?;
    let level_id = required_str(req, "levelId")?;
    if !row_exists(conn, "levels", &level_id)? {
        return Err(ServiceError::not_found("Level", &level_id));
    }
    ensure_name_free(conn, "grades", "Grade", &name, None)?;

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let order_index = match optional_i64(req, "orderIndex")? {
        Some(v) => v,
        None => next_order_index(conn, "grades", Some("level_id"), Some(&level_id))?,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(id, level_id, name, display_name, description, order_index, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &level_id, &name, &display_name, description.as_deref(), order_index),
    )?;

    Ok(json!({ "grade": grade_dto(conn, &id)? }))
}

fn grades_update(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "gradeId")?;
    if !row_exists(conn, "grades", &id)? {
        return Err(ServiceError::not_found("Grade", &id));
    }

    let name = required_str(req, "name")?;
    ensure_name_free(conn, "grades", "Grade", &name, Some(&id))?;

    let new_parent = match optional_str(req, "levelId")? {
        Some(level_id) => {
            if !row_exists(conn, "levels", &level_id)? {
                return Err(ServiceError::not_found("Level", &level_id));
            }
            Some(level_id)
        }
        None => None,
    };

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let tx = conn.unchecked_transaction()?;
    if let Some(level_id) = &new_parent {
        tx.execute(
            "UPDATE grades SET level_id = ? WHERE id = ?",
            (level_id, &id),
        )?;
    }
    tx.execute(
        "UPDATE grades
         SET name = ?, display_name = ?, description = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (&name, &display_name, description.as_deref(), &id),
    )?;
    if let Some(order_index) = optional_i64(req, "orderIndex")? {
        tx.execute(
            "UPDATE grades SET order_index = ? WHERE id = ?",
            (order_index, &id),
        )?;
    }
    tx.commit()?;

    Ok(json!({ "grade": grade_dto(conn, &id)? }))
}

fn grades_delete(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "gradeId")?;
    if !row_exists(conn, "grades", &id)? {
        return Err(ServiceError::not_found("Grade", &id));
    }

    ensure_no_children(
        conn,
        "grade",
        &id,
        &[
            ("subjects", "grade_id"),
            ("units", "grade_id"),
            ("student_profiles", "grade_id"),
        ],
    )?;

    conn.execute("DELETE FROM grades WHERE id = ?", [&id])?;
    Ok(json!({ "ok": true }))
}

fn grades_reorder(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "gradeId")?;
    let direction = Direction::parse(&required_str(req, "direction")?)?;

    // Siblings share the grade's level.
    let level_id: Option<String> = conn
        .query_row("SELECT level_id FROM grades WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(level_id) = level_id else {
        return Err(ServiceError::not_found("Grade", &id));
    };

    let applied = reorder::reorder(
        conn,
        "grades",
        "Grade",
        SiblingScope::Parent {
            column: "level_id",
            id: &level_id,
        },
        &id,
        direction,
    )?;
    Ok(json!({ "applied": applied }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "grades.list" => grades_list(state, req),
        "grades.listByLevel" => grades_list_by_level(state, req),
        "grades.get" => grades_get(state, req),
        "grades.create" => grades_create(state, req),
        "grades.update" => grades_update(state, req),
        "grades.delete" => grades_delete(state, req),
        "grades.reorder" => grades_reorder(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
