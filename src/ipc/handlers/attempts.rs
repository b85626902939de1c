use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::auth;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{db_conn, optional_i64, optional_str, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, StatsType};

/// Record one submission into the append-only ledger and fold it into the
/// stats cache. Ledger insert and cache upserts commit together; a crash can
/// never leave the cache diverged from the ledger.
fn attempts_record(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let student = auth::authenticate(conn, req)?;

    let question_id = required_str(req, "questionId")?;
    let question = conn
        .query_row(
            "SELECT level_id, sub_unit_id, concept_id, difficulty, question_type, correct_answer
             FROM questions WHERE id = ?",
            [&question_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;
    let Some((level_id, sub_unit_id, concept_id, difficulty, question_type, stored_answer)) =
        question
    else {
        return Err(ServiceError::not_found("Question", &question_id));
    };

    let user_answer = optional_str(req, "userAnswer")?.unwrap_or_default();
    let time_spent = optional_i64(req, "timeSpentSeconds")?;

    // Denormalize the full hierarchy path at attempt time.
    let (unit_id, grade_id): (Option<String>, Option<String>) = match &sub_unit_id {
        Some(su) => conn
            .query_row(
                "SELECT u.id, u.grade_id
                 FROM sub_units su JOIN units u ON u.id = su.unit_id
                 WHERE su.id = ?",
                [su],
                |r| Ok((r.get::<_, Option<String>>(0)?, r.get::<_, Option<String>>(1)?)),
            )
            .optional()?
            .unwrap_or((None, None)),
        None => (None, None),
    };

    let correct_answer = super::questions::resolve_correct_answer(
        conn,
        &question_id,
        &question_type,
        stored_answer.as_deref(),
    )?;
    // Choice answers must match the option text verbatim; free-text answers
    // are compared case-insensitively after trimming.
    let is_correct = if super::questions::is_choice_type(&question_type) {
        !correct_answer.is_empty() && user_answer == correct_answer
    } else {
        !correct_answer.trim().is_empty()
            && user_answer.trim().to_lowercase() == correct_answer.trim().to_lowercase()
    };

    let tx = conn.unchecked_transaction()?;
    let attempt_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO student_question_attempts(
           id, student_id, question_id, is_correct, user_answer, time_spent_seconds,
           attempted_at, concept_id, sub_unit_id, unit_id, grade_id, level_id, difficulty
         ) VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), ?, ?, ?, ?, ?, ?)",
        (
            &attempt_id,
            &student.id,
            &question_id,
            is_correct as i64,
            &user_answer,
            time_spent,
            concept_id.as_deref(),
            sub_unit_id.as_deref(),
            unit_id.as_deref(),
            grade_id.as_deref(),
            &level_id,
            &difficulty,
        ),
    )?;

    if let Some(cid) = &concept_id {
        stats::apply_attempt(&tx, &student.id, StatsType::Concept, Some(cid), is_correct)?;
    }
    if let Some(su) = &sub_unit_id {
        stats::apply_attempt(&tx, &student.id, StatsType::SubUnit, Some(su), is_correct)?;
    }
    if let Some(u) = &unit_id {
        stats::apply_attempt(&tx, &student.id, StatsType::Unit, Some(u), is_correct)?;
    }
    if let Some(g) = &grade_id {
        stats::apply_attempt(&tx, &student.id, StatsType::Grade, Some(g), is_correct)?;
    }
    stats::apply_attempt(&tx, &student.id, StatsType::Level, Some(&level_id), is_correct)?;
    stats::apply_attempt(&tx, &student.id, StatsType::Overall, None, is_correct)?;
    tx.commit()?;

    Ok(json!({
        "attemptId": attempt_id,
        "isCorrect": is_correct,
    }))
}

fn attempts_list_by_student(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    if !row_exists(conn, "users", &student_id)? {
        return Err(ServiceError::not_found("User", &student_id));
    }
    let limit = optional_i64(req, "limit")?.unwrap_or(10).clamp(1, 500);

    let mut stmt = conn.prepare(
        "SELECT id, question_id, is_correct, user_answer, time_spent_seconds, attempted_at,
                concept_id, sub_unit_id, unit_id, grade_id, level_id, difficulty
         FROM student_question_attempts
         WHERE student_id = ?
         ORDER BY attempted_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let attempts = stmt
        .query_map((&student_id, limit), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "questionId": r.get::<_, String>(1)?,
                "isCorrect": r.get::<_, i64>(2)? != 0,
                "userAnswer": r.get::<_, Option<String>>(3)?,
                "timeSpentSeconds": r.get::<_, Option<i64>>(4)?,
                "attemptedAt": r.get::<_, String>(5)?,
                "conceptId": r.get::<_, Option<String>>(6)?,
                "subUnitId": r.get::<_, Option<String>>(7)?,
                "unitId": r.get::<_, Option<String>>(8)?,
                "gradeId": r.get::<_, Option<String>>(9)?,
                "levelId": r.get::<_, Option<String>>(10)?,
                "difficulty": r.get::<_, Option<String>>(11)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attempts": attempts }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "attempts.record" => attempts_record(state, req),
        "attempts.listByStudent" => attempts_list_by_student(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
