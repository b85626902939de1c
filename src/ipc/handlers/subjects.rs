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

const SELECT_DTO: &str = "SELECT s.id, s.grade_id, g.name, s.name, s.display_name, s.description, s.order_index
     FROM subjects s JOIN grades g ON g.id = s.grade_id";

fn row_to_dto(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "gradeId": r.get::<_, String>(1)?,
        "gradeName": r.get::<_, String>(2)?,
        "name": r.get::<_, String>(3)?,
        "displayName": r.get::<_, String>(4)?,
        "description": r.get::<_, Option<String>>(5)?,
        "orderIndex": r.get::<_, i64>(6)?,
    }))
}

fn subject_dto(conn: &Connection, id: &str) -> ServiceResult<serde_json::Value> {
    conn.query_row(&format!("{} WHERE s.id = ?", SELECT_DTO), [id], row_to_dto)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Subject", id))
}

fn subjects_list(state: &AppState, _req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(&format!("{} ORDER BY s.order_index, s.id", SELECT_DTO))?;
    let subjects = stmt
        .query_map([], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_list_by_grade(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let grade_id = required_str(req, "gradeId")?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE s.grade_id = ? ORDER BY s.order_index, s.id",
        SELECT_DTO
    ))?;
    let subjects = stmt
        .query_map([&grade_id], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_get(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "subjectId")?;
    Ok(json!({ "subject": subject_dto(conn, &id)? }))
}

fn subjects_create(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let name = required_str(req, "name")?;
    let grade_id = required_str(req, "gradeId")?;
    if !row_exists(conn, "grades", &grade_id)? {
        return Err(ServiceError::not_found("Grade", &grade_id));
    }
    ensure_name_free(conn, "subjects", "Subject", &name, None)?;

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let order_index = match optional_i64(req, "orderIndex")? {
        Some(v) => v,
        None => next_order_index(conn, "subjects", Some("grade_id"), Some(&grade_id))?,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, grade_id, name, display_name, description, order_index, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &grade_id, &name, &display_name, description.as_deref(), order_index),
    )?;

    Ok(json!({ "subject": subject_dto(conn, &id)? }))
}

fn subjects_update(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "subjectId")?;
    if !row_exists(conn, "subjects", &id)? {
        return Err(ServiceError::not_found("Subject", &id));
    }

    let name = required_str(req, "name")?;
    ensure_name_free(conn, "subjects", "Subject", &name, Some(&id))?;

    let new_parent = match optional_str(req, "gradeId")? {
        Some(grade_id) => {
            if !row_exists(conn, "grades", &grade_id)? {
                return Err(ServiceError::not_found("Grade", &grade_id));
            }
            Some(grade_id)
        }
        None => None,
    };

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let tx = conn.unchecked_transaction()?;
    if let Some(grade_id) = &new_parent {
        tx.execute(
            "UPDATE subjects SET grade_id = ? WHERE id = ?",
            (grade_id, &id),
        )?;
    }
    tx.execute(
        "UPDATE subjects
         SET name = ?, display_name = ?, description = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (&name, &display_name, description.as_deref(), &id),
    )?;
    if let Some(order_index) = optional_i64(req, "orderIndex")? {
        tx.execute(
            "UPDATE subjects SET order_index = ? WHERE id = ?",
            (order_index, &id),
        )?;
    }
    tx.commit()?;

    Ok(json!({ "subject": subject_dto(conn, &id)? }))
}

fn subjects_delete(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "subjectId")?;
    if !row_exists(conn, "subjects", &id)? {
        return Err(ServiceError::not_found("Subject", &id));
    }

    ensure_no_children(
        conn,
        "subject",
        &id,
        &[
            ("units", "subject_id"),
            ("questions", "subject_id"),
            ("student_profiles", "subject_id"),
        ],
    )?;

    conn.execute("DELETE FROM subjects WHERE id = ?", [&id])?;
    Ok(json!({ "ok": true }))
}

fn subjects_reorder(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "subjectId")?;
    let direction = Direction::parse(&required_str(req, "direction")?)?;

    let grade_id: Option<String> = conn
        .query_row("SELECT grade_id FROM subjects WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(grade_id) = grade_id else {
        return Err(ServiceError::not_found("Subject", &id));
    };

    let applied = reorder::reorder(
        conn,
        "subjects",
        "Subject",
        SiblingScope::Parent {
            column: "grade_id",
            id: &grade_id,
        },
        &id,
        direction,
    )?;
    Ok(json!({ "applied": applied }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "subjects.list" => subjects_list(state, req),
        "subjects.listByGrade" => subjects_list_by_grade(state, req),
        "subjects.get" => subjects_get(state, req),
        "subjects.create" => subjects_create(state, req),
        "subjects.update" => subjects_update(state, req),
        "subjects.delete" => subjects_delete(state, req),
        "subjects.reorder" => subjects_reorder(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
