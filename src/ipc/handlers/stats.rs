use rusqlite::OptionalExtension;
use serde_json::json;

use crate::auth::{self, ROLE_ADMIN};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{db_conn, optional_str, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, StatsType};

fn stats_row_json(
    stats_type: &str,
    entity_id: &str,
    attempts: i64,
    correct: i64,
    rate: f64,
    last_updated: Option<String>,
) -> serde_json::Value {
    json!({
        "statsType": stats_type,
        // OVERALL rows are stored with entity_id = ''; surface null instead.
        "entityId": if entity_id.is_empty() { serde_json::Value::Null } else { json!(entity_id) },
        "attemptCount": attempts,
        "correctCount": correct,
        "correctRate": rate,
        "lastUpdated": last_updated,
    })
}

/// One cache row for (student, statsType, entity). Absent rows read as zeros:
/// no attempts yet means a 0 rate, not an error.
fn stats_student(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    if !row_exists(conn, "users", &student_id)? {
        return Err(ServiceError::not_found("User", &student_id));
    }
    let stats_type = StatsType::parse(&required_str(req, "statsType")?)?;
    let entity_id = match stats_type {
        StatsType::Overall => String::new(),
        _ => required_str(req, "entityId")?,
    };

    let row: Option<(i64, i64, f64, Option<String>)> = conn
        .query_row(
            "SELECT attempt_count, correct_count, correct_rate, last_updated
             FROM student_stats
             WHERE student_id = ? AND stats_type = ? AND entity_id = ?",
            (&student_id, stats_type.as_str(), &entity_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;

    let stats = match row {
        Some((attempts, correct, rate, updated)) => {
            stats_row_json(stats_type.as_str(), &entity_id, attempts, correct, rate, updated)
        }
        None => stats_row_json(stats_type.as_str(), &entity_id, 0, 0, 0.0, None),
    };
    Ok(json!({ "stats": stats }))
}

/// Every cache row for a student, best rate first; optionally narrowed to one
/// stats type.
fn stats_student_all(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    if !row_exists(conn, "users", &student_id)? {
        return Err(ServiceError::not_found("User", &student_id));
    }
    let stats_type = match optional_str(req, "statsType")? {
        Some(s) => Some(StatsType::parse(&s)?),
        None => None,
    };

    let rows: Vec<serde_json::Value> = match stats_type {
        Some(t) => {
            let mut stmt = conn.prepare(
                "SELECT stats_type, entity_id, attempt_count, correct_count, correct_rate, last_updated
                 FROM student_stats
                 WHERE student_id = ? AND stats_type = ?
                 ORDER BY correct_rate DESC, entity_id",
            )?;
            let rows = stmt
                .query_map((&student_id, t.as_str()), |r| {
                    Ok(stats_row_json(
                        &r.get::<_, String>(0)?,
                        &r.get::<_, String>(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT stats_type, entity_id, attempt_count, correct_count, correct_rate, last_updated
                 FROM student_stats
                 WHERE student_id = ?
                 ORDER BY stats_type, correct_rate DESC, entity_id",
            )?;
            let rows = stmt
                .query_map([&student_id], |r| {
                    Ok(stats_row_json(
                        &r.get::<_, String>(0)?,
                        &r.get::<_, String>(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(json!({ "stats": rows }))
}

/// Materialized-view rebuild: recompute the cache from the ledger, for one
/// student or for everyone with recorded attempts.
fn stats_rebuild(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_ADMIN])?;

    let rebuilt = match optional_str(req, "studentId")? {
        Some(student_id) => {
            if !row_exists(conn, "users", &student_id)? {
                return Err(ServiceError::not_found("User", &student_id));
            }
            stats::rebuild_student(conn, &student_id)?;
            1
        }
        None => {
            let students: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT student_id FROM student_question_attempts",
                )?;
                let rows = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            let n = students.len();
            for student_id in students {
                stats::rebuild_student(conn, &student_id)?;
            }
            n
        }
    };
    Ok(json!({ "rebuiltStudents": rebuilt }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "stats.student" => stats_student(state, req),
        "stats.studentAll" => stats_student_all(state, req),
        "stats.rebuild" => stats_rebuild(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
