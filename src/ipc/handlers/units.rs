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

const SELECT_DTO: &str = "SELECT u.id, u.grade_id, g.name, u.subject_id, s.name, u.name, u.display_name,
            u.description, u.order_index
     FROM units u
     JOIN grades g ON g.id = u.grade_id
     JOIN subjects s ON s.id = u.subject_id";

fn row_to_dto(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "gradeId": r.get::<_, String>(1)?,
        "gradeName": r.get::<_, String>(2)?,
        "subjectId": r.get::<_, String>(3)?,
        "subjectName": r.get::<_, String>(4)?,
        "name": r.get::<_, String>(5)?,
        "displayName": r.get::<_, String>(6)?,
        "description": r.get::<_, Option<String>>(7)?,
        "orderIndex": r.get::<_, i64>(8)?,
    }))
}

fn unit_dto(conn: &Connection, id: &str) -> ServiceResult<serde_json::Value> {
    conn.query_row(&format!("{} WHERE u.id = ?", SELECT_DTO), [id], row_to_dto)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Unit", id))
}

/// The subject tag must belong to the same grade as the unit.
fn check_subject_in_grade(
    conn: &Connection,
    subject_id: &str,
    grade_id: &str,
) -> ServiceResult<()> {
    let subject_grade: Option<String> = conn
        .query_row(
            "SELECT grade_id FROM subjects WHERE id = ?",
            [subject_id],
            |r| r.get(0),
        )
        .optional()?;
    match subject_grade {
        None => Err(ServiceError::not_found("Subject", subject_id)),
        Some(g) if g != grade_id => Err(ServiceError::InvalidArgument(format!(
            "subject {} belongs to a different grade",
            subject_id
        ))),
        Some(_) => Ok(()),
    }
}

fn units_list(state: &AppState, _req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(&format!("{} ORDER BY u.order_index, u.id", SELECT_DTO))?;
    let units = stmt
        .query_map([], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "units": units }))
}

fn units_list_by_grade(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let grade_id = required_str(req, "gradeId")?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE u.grade_id = ? ORDER BY u.order_index, u.id",
        SELECT_DTO
    ))?;
    let units = stmt
        .query_map([&grade_id], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "units": units }))
}

fn units_list_by_subject(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let subject_id = required_str(req, "subjectId")?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE u.subject_id = ? ORDER BY u.order_index, u.id",
        SELECT_DTO
    ))?;
    let units = stmt
        .query_map([&subject_id], row_to_dto)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "units": units }))
}

fn units_get(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "unitId")?;
    Ok(json!({ "unit": unit_dto(conn, &id)? }))
}

fn units_create(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let name = required_str(req, "name")?;
    let grade_id = required_str(req, "gradeId")?;
    let subject_id = required_str(req, "subjectId")?;
    if !row_exists(conn, "grades", &grade_id)? {
        return Err(ServiceError::not_found("Grade", &grade_id));
    }
    check_subject_in_grade(conn, &subject_id, &grade_id)?;

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let order_index = match optional_i64(req, "orderIndex")? {
        Some(v) => v,
        None => next_order_index(conn, "units", Some("grade_id"), Some(&grade_id))?,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO units(id, grade_id, subject_id, name, display_name, description, order_index, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &grade_id, &subject_id, &name, &display_name, description.as_deref(), order_index),
    )?;

    Ok(json!({ "unit": unit_dto(conn, &id)? }))
}

fn units_update(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "unitId")?;
    let current: Option<(String, String)> = conn
        .query_row(
            "SELECT grade_id, subject_id FROM units WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((mut grade_id, mut subject_id)) = current else {
        return Err(ServiceError::not_found("Unit", &id));
    };

    let name = required_str(req, "name")?;
    if let Some(new_grade) = optional_str(req, "gradeId")? {
        if !row_exists(conn, "grades", &new_grade)? {
            return Err(ServiceError::not_found("Grade", &new_grade));
        }
        grade_id = new_grade;
    }
    if let Some(new_subject) = optional_str(req, "subjectId")? {
        subject_id = new_subject;
    }
    check_subject_in_grade(conn, &subject_id, &grade_id)?;

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE units
         SET grade_id = ?, subject_id = ?, name = ?, display_name = ?, description = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (
            &grade_id,
            &subject_id,
            &name,
            &display_name,
            description.as_deref(),
            &id,
        ),
    )?;
    if let Some(order_index) = optional_i64(req, "orderIndex")? {
        tx.execute(
            "UPDATE units SET order_index = ? WHERE id = ?",
            (order_index, &id),
        )?;
    }
    tx.commit()?;

    Ok(json!({ "unit": unit_dto(conn, &id)? }))
}

fn units_delete(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "unitId")?;
    if !row_exists(conn, "units", &id)? {
        return Err(ServiceError::not_found("Unit", &id));
    }

    ensure_no_children(
        conn,
        "unit",
        &id,
        &[("sub_units", "unit_id"), ("student_profiles", "unit_id")],
    )?;

    conn.execute("DELETE FROM units WHERE id = ?", [&id])?;
    Ok(json!({ "ok": true }))
}

fn units_reorder(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "unitId")?;
    let direction = Direction::parse(&required_str(req, "direction")?)?;

    let grade_id: Option<String> = conn
        .query_row("SELECT grade_id FROM units WHERE id = ?", [&id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(grade_id) = grade_id else {
        return Err(ServiceError::not_found("Unit", &id));
    };

    let applied = reorder::reorder(
        conn,
        "units",
        "Unit",
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
        "units.list" => units_list(state, req),
        "units.listByGrade" => units_list_by_grade(state, req),
        "units.listBySubject" => units_list_by_subject(state, req),
        "units.get" => units_get(state, req),
        "units.create" => units_create(state, req),
        "units.update" => units_update(state, req),
        "units.delete" => units_delete(state, req),
        "units.reorder" => units_reorder(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
