use rusqlite::{Connection, OptionalExtension};

use crate::error::{ServiceError, ServiceResult};
use crate::ipc::types::{AppState, Request};

pub fn db_conn<'a>(state: &'a AppState) -> ServiceResult<&'a Connection> {
    state.db.as_ref().ok_or(ServiceError::NoWorkspace)
}

pub fn required_str(req: &Request, key: &str) -> ServiceResult<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::BadParams(format!("missing {}", key)))
}

/// Absent or null yields None; present but not a string is an error.
pub fn optional_str(req: &Request, key: &str) -> ServiceResult<Option<String>> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Some)
            .ok_or_else(|| ServiceError::BadParams(format!("{} must be a string", key))),
    }
}

pub fn optional_i64(req: &Request, key: &str) -> ServiceResult<Option<i64>> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| ServiceError::BadParams(format!("{} must be an integer", key))),
    }
}

pub fn required_bool(req: &Request, key: &str) -> ServiceResult<bool> {
    req.params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| ServiceError::BadParams(format!("missing {}", key)))
}

pub fn optional_bool(req: &Request, key: &str) -> ServiceResult<Option<bool>> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| ServiceError::BadParams(format!("{} must be a boolean", key))),
    }
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> ServiceResult<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let hit: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(hit.is_some())
}

/// Global name uniqueness check (levels/grades/subjects/concepts).
pub fn ensure_name_free(
    conn: &Connection,
    table: &str,
    entity: &str,
    name: &str,
    exclude_id: Option<&str>,
) -> ServiceResult<()> {
    let taken_by: Option<String> = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE name = ?", table),
            [name],
            |r| r.get(0),
        )
        .optional()?;
    match taken_by {
        Some(id) if Some(id.as_str()) != exclude_id => Err(ServiceError::Conflict(format!(
            "{} with name '{}' already exists",
            entity, name
        ))),
        _ => Ok(()),
    }
}

/// Next order_index within a sibling group: MAX + 1, starting at 0.
pub fn next_order_index(
    conn: &Connection,
    table: &str,
    parent_col: Option<&str>,
    parent_id: Option<&str>,
) -> ServiceResult<i64> {
    let next = match (parent_col, parent_id) {
        (Some(col), Some(pid)) => conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(order_index), -1) + 1 FROM {} WHERE {} = ?",
                table, col
            ),
            [pid],
            |r| r.get(0),
        )?,
        (Some(col), None) => conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(order_index), -1) + 1 FROM {} WHERE {} IS NULL",
                table, col
            ),
            [],
            |r| r.get(0),
        )?,
        (None, _) => conn.query_row(
            &format!("SELECT COALESCE(MAX(order_index), -1) + 1 FROM {}", table),
            [],
            |r| r.get(0),
        )?,
    };
    Ok(next)
}

/// Refuse to delete a row that other rows still reference.
pub fn ensure_no_children(
    conn: &Connection,
    entity: &str,
    id: &str,
    children: &[(&str, &str)],
) -> ServiceResult<()> {
    for (child_table, fk_col) in children {
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {} = ?", child_table, fk_col),
            [id],
            |r| r.get(0),
        )?;
        if n > 0 {
            return Err(ServiceError::Conflict(format!(
                "cannot delete {} {}: {} row(s) in {} reference it",
                entity, id, n, child_table
            )));
        }
    }
    Ok(())
}
