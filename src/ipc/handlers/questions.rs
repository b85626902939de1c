use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, ROLE_ADMIN, ROLE_TEACHER};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{db_conn, optional_i64, optional_str, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use crate::stats;

pub const QUESTION_TYPES: [&str; 4] = ["MULTIPLE_CHOICE", "TRUE_FALSE", "SHORT_ANSWER", "ESSAY"];
pub const DIFFICULTIES: [&str; 5] = ["VERY_EASY", "EASY", "MEDIUM", "HARD", "VERY_HARD"];

pub fn is_choice_type(question_type: &str) -> bool {
    question_type == "MULTIPLE_CHOICE" || question_type == "TRUE_FALSE"
}

struct QuestionInput {
    level_id: String,
    subject_id: String,
    sub_unit_id: Option<String>,
    concept_id: Option<String>,
    difficulty: String,
    eval_domain: Option<String>,
    question_type: String,
    content: String,
    correct_answer: Option<String>,
    points: i64,
    reference_image: Option<String>,
    reference_document: Option<String>,
    options: Vec<(String, i64)>,
}

/// Walk sub-unit → unit → subject.
fn subject_of_sub_unit(conn: &Connection, sub_unit_id: &str) -> ServiceResult<Option<String>> {
    let subject: Option<String> = conn
        .query_row(
            "SELECT u.subject_id
             FROM sub_units su JOIN units u ON u.id = su.unit_id
             WHERE su.id = ?",
            [sub_unit_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(subject)
}

/// Validate the request and resolve the hierarchy references. All failures
/// happen here, before anything is written.
fn parse_question_input(conn: &Connection, req: &Request) -> ServiceResult<QuestionInput> {
    let level_id = required_str(req, "levelId")?;
    if !row_exists(conn, "levels", &level_id)? {
        return Err(ServiceError::not_found("Level", &level_id));
    }

    let sub_unit_id = optional_str(req, "subUnitId")?;
    let mut subject_id: Option<String> = None;
    if let Some(su) = &sub_unit_id {
        if !row_exists(conn, "sub_units", su)? {
            return Err(ServiceError::not_found("SubUnit", su));
        }
        subject_id = subject_of_sub_unit(conn, su)?;
    }

    // Single-concept association: only the first id is honored.
    let concept_id = match req.params.get("conceptIds") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let arr = v.as_array().ok_or_else(|| {
                ServiceError::BadParams("conceptIds must be an array".into())
            })?;
            match arr.first() {
                None => None,
                Some(first) => {
                    let id = first
                        .as_str()
                        .ok_or_else(|| {
                            ServiceError::BadParams("conceptIds must contain strings".into())
                        })?
                        .to_string();
                    if !row_exists(conn, "concepts", &id)? {
                        return Err(ServiceError::not_found("Concept", &id));
                    }
                    Some(id)
                }
            }
        }
    };

    // Fall back to the concept's chain when the sub-unit gave no subject.
    if subject_id.is_none() {
        if let Some(cid) = &concept_id {
            let concept_sub_unit: Option<String> = conn
                .query_row(
                    "SELECT sub_unit_id FROM concepts WHERE id = ?",
                    [cid],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            if let Some(su) = concept_sub_unit {
                subject_id = subject_of_sub_unit(conn, &su)?;
            }
        }
    }

    let Some(subject_id) = subject_id else {
        return Err(ServiceError::InvalidArgument(
            "cannot determine subject for question; provide a valid subUnitId or conceptId".into(),
        ));
    };

    let question_type = required_str(req, "questionType")?;
    if !QUESTION_TYPES.contains(&question_type.as_str()) {
        return Err(ServiceError::BadParams(format!(
            "unknown questionType: {}",
            question_type
        )));
    }
    let difficulty = required_str(req, "difficulty")?;
    if !DIFFICULTIES.contains(&difficulty.as_str()) {
        return Err(ServiceError::BadParams(format!(
            "unknown difficulty: {}",
            difficulty
        )));
    }

    let content = required_str(req, "questionText")?;
    let correct_answer = optional_str(req, "correctAnswer")?;
    let eval_domain = optional_str(req, "evalDomain")?;
    let points = optional_i64(req, "points")?.unwrap_or(10);
    let reference_image = optional_str(req, "referenceImage")?;
    let reference_document = optional_str(req, "referenceDocument")?;

    let mut options = Vec::new();
    if let Some(v) = req.params.get("options") {
        if !v.is_null() {
            let arr = v
                .as_array()
                .ok_or_else(|| ServiceError::BadParams("options must be an array".into()))?;
            for (i, opt) in arr.iter().enumerate() {
                let text = opt
                    .get("optionText")
                    .and_then(|t| t.as_str())
                    .map(|t| t.to_string())
                    .ok_or_else(|| {
                        ServiceError::BadParams("options[].optionText is required".into())
                    })?;
                let order = opt
                    .get("optionOrder")
                    .and_then(|o| o.as_i64())
                    .unwrap_or(i as i64);
                options.push((text, order));
            }
        }
    }

    Ok(QuestionInput {
        level_id,
        subject_id,
        sub_unit_id,
        concept_id,
        difficulty,
        eval_domain,
        question_type,
        content,
        correct_answer,
        points,
        reference_image,
        reference_document,
        options,
    })
}

fn insert_options(
    conn: &Connection,
    question_id: &str,
    input: &QuestionInput,
) -> rusqlite::Result<()> {
    for (text, order) in &input.options {
        let is_correct = input
            .correct_answer
            .as_deref()
            .map(|a| a == text.as_str())
            .unwrap_or(false);
        conn.execute(
            "INSERT INTO question_options(id, question_id, option_text, is_correct, option_order)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                question_id,
                text,
                is_correct as i64,
                order,
            ),
        )?;
    }
    Ok(())
}

/// Resolved correct answer for the response DTO: choice types use the option
/// flagged correct (falling back to the stored answer), free-text types use
/// the stored answer.
pub fn resolve_correct_answer(
    conn: &Connection,
    question_id: &str,
    question_type: &str,
    stored: Option<&str>,
) -> ServiceResult<String> {
    if is_choice_type(question_type) {
        let flagged: Option<String> = conn
            .query_row(
                "SELECT option_text FROM question_options
                 WHERE question_id = ? AND is_correct = 1
                 ORDER BY option_order LIMIT 1",
                [question_id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(text) = flagged {
            return Ok(text);
        }
    }
    Ok(stored.unwrap_or("").to_string())
}

pub fn question_dto(conn: &Connection, id: &str) -> ServiceResult<serde_json::Value> {
    let head = conn
        .query_row(
            "SELECT q.id, q.level_id, l.name, q.sub_unit_id, su.name,
                    q.difficulty, q.eval_domain, q.question_type, q.content,
                    q.correct_answer, q.points, q.reference_image, q.reference_document,
                    q.concept_id, c.name, c.display_name, c.description
             FROM questions q
             JOIN levels l ON l.id = q.level_id
             LEFT JOIN sub_units su ON su.id = q.sub_unit_id
             LEFT JOIN concepts c ON c.id = q.concept_id
             WHERE q.id = ?",
            [id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, String>(8)?,
                    r.get::<_, Option<String>>(9)?,
                    r.get::<_, i64>(10)?,
                    r.get::<_, Option<String>>(11)?,
                    r.get::<_, Option<String>>(12)?,
                    (
                        r.get::<_, Option<String>>(13)?,
                        r.get::<_, Option<String>>(14)?,
                        r.get::<_, Option<String>>(15)?,
                        r.get::<_, Option<String>>(16)?,
                    ),
                ))
            },
        )
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Question", id))?;

    let (
        qid,
        level_id,
        level_name,
        sub_unit_id,
        sub_unit_name,
        difficulty,
        eval_domain,
        question_type,
        content,
        stored_answer,
        points,
        reference_image,
        reference_document,
        (concept_id, concept_name, concept_display, concept_description),
    ) = head;

    let options: Vec<serde_json::Value> = {
        let mut stmt = conn.prepare(
            "SELECT id, option_text, is_correct, option_order
             FROM question_options
             WHERE question_id = ?
             ORDER BY option_order",
        )?;
        let rows = stmt
            .query_map([id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "optionText": r.get::<_, String>(1)?,
                    "isCorrect": r.get::<_, i64>(2)? != 0,
                    "optionOrder": r.get::<_, i64>(3)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let correct_answer =
        resolve_correct_answer(conn, id, &question_type, stored_answer.as_deref())?;

    let concepts: Vec<serde_json::Value> = match concept_id {
        Some(cid) => vec![json!({
            "id": cid,
            "name": concept_name,
            "displayName": concept_display,
            "description": concept_description,
        })],
        None => Vec::new(),
    };

    let (attempted, correct, rate) = stats::question_item_stats(conn, id)?;

    Ok(json!({
        "id": qid,
        "levelId": level_id,
        "levelName": level_name,
        "subUnitId": sub_unit_id,
        "subUnitName": sub_unit_name,
        "difficulty": difficulty,
        "evalDomain": eval_domain,
        "questionText": content,
        "questionType": question_type,
        "correctAnswer": correct_answer,
        "points": points,
        "referenceImage": reference_image,
        "referenceDocument": reference_document,
        "options": options,
        "concepts": concepts,
        "attemptCount": attempted,
        "correctCount": correct,
        "correctRate": rate,
    }))
}

fn questions_list(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let level_id = optional_str(req, "levelId")?;
    let ids: Vec<String> = match &level_id {
        Some(lid) => {
            let mut stmt = conn.prepare(
                "SELECT id FROM questions WHERE level_id = ? ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map([lid], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare("SELECT id FROM questions ORDER BY created_at, id")?;
            let rows = stmt
                .query_map([], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    let questions = ids
        .iter()
        .map(|id| question_dto(conn, id))
        .collect::<ServiceResult<Vec<_>>>()?;
    Ok(json!({ "questions": questions }))
}

fn questions_get(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "questionId")?;
    Ok(json!({ "question": question_dto(conn, &id)? }))
}

fn questions_create(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let user = auth::require_role(conn, req, &[ROLE_TEACHER, ROLE_ADMIN])?;

    let input = parse_question_input(conn, req)?;

    // Question and its options land together or not at all.
    let tx = conn.unchecked_transaction()?;
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO questions(
           id, level_id, subject_id, sub_unit_id, concept_id,
           difficulty, eval_domain, question_type, content, correct_answer,
           points, reference_image, reference_document, created_by,
           created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                  strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                  strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &input.level_id,
            &input.subject_id,
            input.sub_unit_id.as_deref(),
            input.concept_id.as_deref(),
            &input.difficulty,
            input.eval_domain.as_deref(),
            &input.question_type,
            &input.content,
            input.correct_answer.as_deref(),
            input.points,
            input.reference_image.as_deref(),
            input.reference_document.as_deref(),
            &user.id,
        ),
    )?;
    insert_options(&tx, &id, &input)?;
    tx.commit()?;

    Ok(json!({ "question": question_dto(conn, &id)? }))
}

fn questions_update(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_TEACHER, ROLE_ADMIN])?;

    let id = required_str(req, "questionId")?;
    if !row_exists(conn, "questions", &id)? {
        return Err(ServiceError::not_found("Question", &id));
    }

    let input = parse_question_input(conn, req)?;

    // Full option replace: simpler than diffing, at the cost of option ids
    // not being stable across updates.
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE questions
         SET level_id = ?, subject_id = ?, sub_unit_id = ?, concept_id = ?,
             difficulty = ?, eval_domain = ?, question_type = ?, content = ?,
             correct_answer = ?, points = ?, reference_image = ?, reference_document = ?,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (
            &input.level_id,
            &input.subject_id,
            input.sub_unit_id.as_deref(),
            input.concept_id.as_deref(),
            &input.difficulty,
            input.eval_domain.as_deref(),
            &input.question_type,
            &input.content,
            input.correct_answer.as_deref(),
            input.points,
            input.reference_image.as_deref(),
            input.reference_document.as_deref(),
            &id,
        ),
    )?;
    tx.execute(
        "DELETE FROM question_options WHERE question_id = ?",
        [&id],
    )?;
    insert_options(&tx, &id, &input)?;
    tx.commit()?;

    Ok(json!({ "question": question_dto(conn, &id)? }))
}

fn questions_delete(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[ROLE_TEACHER, ROLE_ADMIN])?;

    let id = required_str(req, "questionId")?;
    if !row_exists(conn, "questions", &id)? {
        return Err(ServiceError::not_found("Question", &id));
    }

    // Options own a foreign key into questions: they go first. Ledger rows
    // stay; attempts are history.
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM question_options WHERE question_id = ?",
        [&id],
    )?;
    tx.execute("DELETE FROM questions WHERE id = ?", [&id])?;
    tx.commit()?;

    Ok(json!({ "ok": true }))
}

fn question_options_list(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let id = required_str(req, "questionId")?;
    let mut stmt = conn.prepare(
        "SELECT id, option_text, is_correct, option_order
         FROM question_options
         WHERE question_id = ?
         ORDER BY option_order",
    )?;
    let options = stmt
        .query_map([&id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "optionText": r.get::<_, String>(1)?,
                "isCorrect": r.get::<_, i64>(2)? != 0,
                "optionOrder": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "options": options }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "questions.list" => questions_list(state, req),
        "questions.get" => questions_get(state, req),
        "questions.create" => questions_create(state, req),
        "questions.update" => questions_update(state, req),
        "questions.delete" => questions_delete(state, req),
        "questions.options" => question_options_list(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
