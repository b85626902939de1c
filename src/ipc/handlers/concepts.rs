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

struct ConceptRow {
    id: String,
    sub_unit_id: Option<String>,
    sub_unit_name: Option<String>,
    name: String,
    display_name: String,
    description: Option<String>,
    order_index: i64,
}

const SELECT_ROW: &str = "SELECT c.id, c.sub_unit_id, su.name, c.name, c.display_name, c.description, c.order_index
     FROM concepts c LEFT JOIN sub_units su ON su.id = c.sub_unit_id";

fn row_to_concept(r: &rusqlite::Row<'_>) -> rusqlite::Result<ConceptRow> {
    Ok(ConceptRow {
        id: r.get(0)?,
        sub_unit_id: r.get(1)?,
        sub_unit_name: r.get(2)?,
        name: r.get(3)?,
        display_name: r.get(4)?,
        description: r.get(5)?,
        order_index: r.get(6)?,
    })
}

/// Concept DTOs carry authoring-dashboard counts: how many questions are
/// tagged to the concept, broken down by difficulty.
fn concept_json(conn: &Connection, c: &ConceptRow) -> ServiceResult<serde_json::Value> {
    let question_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM questions WHERE concept_id = ?",
        [&c.id],
        |r| r.get(0),
    )?;
    let mut by_difficulty = serde_json::Map::new();
    for (key, difficulty) in [
        ("veryEasyCount", "VERY_EASY"),
        ("easyCount", "EASY"),
        ("mediumCount", "MEDIUM"),
        ("hardCount", "HARD"),
        ("veryHardCount", "VERY_HARD"),
    ] {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM questions WHERE concept_id = ? AND difficulty = ?",
            (&c.id, difficulty),
            |r| r.get(0),
        )?;
        by_difficulty.insert(key.to_string(), json!(n));
    }

    let mut dto = json!({
        "id": c.id,
        "subUnitId": c.sub_unit_id,
        "subUnitName": c.sub_unit_name,
        "name": c.name,
        "displayName": c.display_name,
        "description": c.description,
        "orderIndex": c.order_index,
        "questionCount": question_count,
    });
    for (k, v) in by_difficulty {
        dto[k] = v;
    }
    Ok(dto)
}

fn concept_dto(conn: &Connection, id: &str) -> ServiceResult<serde_json::Value> {
    let row = conn
        .query_row(&format!("{} WHERE c.id = ?", SELECT_ROW), [id], row_to_concept)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Concept", id))?;
    concept_json(conn, &row)
}

fn concepts_list(state: &AppState, _req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let rows: Vec<ConceptRow> = {
        let mut stmt = conn.prepare(&format!("{} ORDER BY c.order_index, c.id", SELECT_ROW))?;
        let rows = stmt
            .query_map([], row_to_concept)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let concepts = rows
        .iter()
        .map(|c| concept_json(conn, c))
        .collect::<ServiceResult<Vec<_>>>()?;
    Ok(json!({ "concepts": concepts }))
}

fn concepts_list_by_sub_unit(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    // subUnitId omitted or null lists the unattached group.
    let sub_unit_id = optional_str(req, "subUnitId")?;
    let rows: Vec<ConceptRow> = match &sub_unit_id {
        Some(id) => {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE c.sub_unit_id = ? ORDER BY c.order_index, c.id",
                SELECT_ROW
            ))?;
            let rows = stmt
                .query_map([id], row_to_concept)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE c.sub_unit_id IS NULL ORDER BY c.order_index, c.id",
                SELECT_ROW
            ))?;
            let rows = stmt
                .query_map([], row_to_concept)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    let concepts = rows
        .iter()
        .map(|c| concept_json(conn, c))
        .collect::<ServiceResult<Vec<_>>>()?;
    Ok(json!({ "concepts": concepts }))
}

fn concepts_get(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "conceptId")?;
    Ok(json!({ "concept": concept_dto(conn, &id)? }))
}

fn concepts_create(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let name = required_str(req, "name")?;
    let sub_unit_id = optional_str(req, "subUnitId")?;
    if let Some(su) = &sub_unit_id {
        if !row_exists(conn, "sub_units", su)? {
            return Err(ServiceError::not_found("SubUnit", su));
        }
    }
    ensure_name_free(conn, "concepts", "Concept", &name, None)?;

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let order_index = match optional_i64(req, "orderIndex")? {
        Some(v) => v,
        None => next_order_index(conn, "concepts", Some("sub_unit_id"), sub_unit_id.as_deref())?,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO concepts(id, sub_unit_id, name, display_name, description, order_index, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, sub_unit_id.as_deref(), &name, &display_name, description.as_deref(), order_index),
    )?;

    Ok(json!({ "concept": concept_dto(conn, &id)? }))
}

fn concepts_update(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "conceptId")?;
    if !row_exists(conn, "concepts", &id)? {
        return Err(ServiceError::not_found("Concept", &id));
    }

    let name = required_str(req, "name")?;
    ensure_name_free(conn, "concepts", "Concept", &name, Some(&id))?;

    let new_parent = match optional_str(req, "subUnitId")? {
        Some(sub_unit_id) => {
            if !row_exists(conn, "sub_units", &sub_unit_id)? {
                return Err(ServiceError::not_found("SubUnit", &sub_unit_id));
            }
            Some(sub_unit_id)
        }
        None => None,
    };

    let display_name = optional_str(req, "displayName")?.unwrap_or_else(|| name.clone());
    let description = optional_str(req, "description")?;
    let tx = conn.unchecked_transaction()?;
    if let Some(sub_unit_id) = &new_parent {
        tx.execute(
            "UPDATE concepts SET sub_unit_id = ? WHERE id = ?",
            (sub_unit_id, &id),
        )?;
    }
    tx.execute(
        "UPDATE concepts
         SET name = ?, display_name = ?, description = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (&name, &display_name, description.as_deref(), &id),
    )?;
    if let Some(order_index) = optional_i64(req, "orderIndex")? {
        tx.execute(
            "UPDATE concepts SET order_index = ? WHERE id = ?",
            (order_index, &id),
        )?;
    }
    tx.commit()?;

    Ok(json!({ "concept": concept_dto(conn, &id)? }))
}

fn concepts_delete(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "conceptId")?;
    if !row_exists(conn, "concepts", &id)? {
        return Err(ServiceError::not_found("Concept", &id));
    }

    ensure_no_children(conn, "concept", &id, &[("questions", "concept_id")])?;

    conn.execute("DELETE FROM concepts WHERE id = ?", [&id])?;
    Ok(json!({ "ok": true }))
}

fn concepts_reorder(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;

    let id = required_str(req, "conceptId")?;
    let direction = Direction::parse(&required_str(req, "direction")?)?;

    // Attached concepts swap within their sub-unit; unattached ones within
    // the unattached group.
    let sub_unit_id: Option<Option<String>> = conn
        .query_row(
            "SELECT sub_unit_id FROM concepts WHERE id = ?",
            [&id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(sub_unit_id) = sub_unit_id else {
        return Err(ServiceError::not_found("Concept", &id));
    };

    let scope = match &sub_unit_id {
        Some(su) => SiblingScope::Parent {
            column: "sub_unit_id",
            id: su,
        },
        None => SiblingScope::Unattached {
            column: "sub_unit_id",
        },
    };
    let applied = reorder::reorder(conn, "concepts", "Concept", scope, &id, direction)?;
    Ok(json!({ "applied": applied }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "concepts.list" => concepts_list(state, req),
        "concepts.listBySubUnit" => concepts_list_by_sub_unit(state, req),
        "concepts.get" => concepts_get(state, req),
        "concepts.create" => concepts_create(state, req),
        "concepts.update" => concepts_update(state, req),
        "concepts.delete" => concepts_delete(state, req),
        "concepts.reorder" => concepts_reorder(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
