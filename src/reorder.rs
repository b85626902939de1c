use rusqlite::Connection;

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn parse(s: &str) -> ServiceResult<Direction> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(ServiceError::BadParams(format!(
                "direction must be 'up' or 'down', got '{}'",
                other
            ))),
        }
    }
}

/// The sibling group an entity is reordered within.
pub enum SiblingScope<'a> {
    /// Every row in the table (top-level entities).
    All,
    /// Rows sharing a parent id.
    Parent { column: &'a str, id: &'a str },
    /// Rows whose parent column is NULL (unattached concepts).
    Unattached { column: &'a str },
}

/// Index of the sibling to swap with, or None when the move is a boundary
/// no-op (first item up, last item down).
fn swap_partner(len: usize, pos: usize, direction: Direction) -> Option<usize> {
    match direction {
        Direction::Up if pos > 0 => Some(pos - 1),
        Direction::Down if pos + 1 < len => Some(pos + 1),
        _ => None,
    }
}

/// Move an entity one position within its sibling group by swapping
/// order_index with the adjacent sibling. The multiset of order_index values
/// in the group is preserved; nothing is renumbered. Returns whether a swap
/// was applied.
pub fn reorder(
    conn: &Connection,
    table: &str,
    entity: &str,
    scope: SiblingScope,
    id: &str,
    direction: Direction,
) -> ServiceResult<bool> {
    let siblings: Vec<(String, i64)> = match scope {
        SiblingScope::All => {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, order_index FROM {} ORDER BY order_index, id",
                table
            ))?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        SiblingScope::Parent { column, id: pid } => {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, order_index FROM {} WHERE {} = ? ORDER BY order_index, id",
                table, column
            ))?;
            let rows = stmt
                .query_map([pid], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        SiblingScope::Unattached { column } => {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, order_index FROM {} WHERE {} IS NULL ORDER BY order_index, id",
                table, column
            ))?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    let pos = siblings
        .iter()
        .position(|(sid, _)| sid == id)
        .ok_or_else(|| ServiceError::NotFound(format!("{} not found in ordered list", entity)))?;

    let Some(partner) = swap_partner(siblings.len(), pos, direction) else {
        return Ok(false);
    };

    let (cur_id, cur_order) = &siblings[pos];
    let (other_id, other_order) = &siblings[partner];

    // Both rows move in one transaction so a crash can never leave the group
    // with a duplicated order_index.
    let tx = conn.unchecked_transaction()?;
    let update = format!(
        "UPDATE {} SET order_index = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
        table
    );
    tx.execute(&update, (other_order, cur_id))?;
    tx.execute(&update, (cur_order, other_id))?;
    tx.commit()?;

    Ok(true)
}
