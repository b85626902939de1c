use rusqlite::OptionalExtension;
use serde_json::json;

use crate::ai::{self, ConceptContext, GenerationRequest, QuestionGenerator};
use crate::auth;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{db_conn, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

use super::questions::{DIFFICULTIES, QUESTION_TYPES};

fn load_concept_context(
    state: &AppState,
    concept_id: &str,
) -> ServiceResult<ConceptContext> {
    let conn = db_conn(state)?;
    conn.query_row(
        "SELECT c.name, c.description, su.name, u.name, s.display_name, g.name, l.name
         FROM concepts c
         LEFT JOIN sub_units su ON su.id = c.sub_unit_id
         LEFT JOIN units u ON u.id = su.unit_id
         LEFT JOIN subjects s ON s.id = u.subject_id
         LEFT JOIN grades g ON g.id = u.grade_id
         LEFT JOIN levels l ON l.id = g.level_id
         WHERE c.id = ?",
        [concept_id],
        |r| {
            Ok(ConceptContext {
                concept_name: r.get(0)?,
                concept_description: r.get(1)?,
                sub_unit_name: r.get(2)?,
                unit_name: r.get(3)?,
                subject_name: r.get(4)?,
                grade_name: r.get(5)?,
                level_name: r.get(6)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| ServiceError::not_found("Concept", concept_id))
}

fn questions_generate(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::authenticate(conn, req)?;
    let workspace = state
        .workspace
        .clone()
        .ok_or(ServiceError::NoWorkspace)?;

    let concept_id = required_str(req, "conceptId")?;
    let difficulty = required_str(req, "difficulty")?;
    if !DIFFICULTIES.contains(&difficulty.as_str()) {
        return Err(ServiceError::BadParams(format!(
            "unknown difficulty: {}",
            difficulty
        )));
    }
    let question_type = required_str(req, "questionType")?;
    if !QUESTION_TYPES.contains(&question_type.as_str()) {
        return Err(ServiceError::BadParams(format!(
            "unknown questionType: {}",
            question_type
        )));
    }

    let context = load_concept_context(state, &concept_id)?;
    let request = GenerationRequest {
        difficulty: difficulty.clone(),
        question_type: question_type.clone(),
        user_prompt: optional_str(req, "userPrompt")?,
        correct_answer: optional_str(req, "correctAnswer")?,
        generate_image: optional_bool(req, "generateImage")?.unwrap_or(false),
    };

    let generator = ai::select_provider(&workspace);
    let generated = generator.generate(&request, &context)?;

    Ok(json!({
        "questionText": generated.question_text,
        "options": generated.options,
        "correctAnswer": generated.correct_answer,
        "explanation": generated.explanation,
        "generatedImageUrl": generated.generated_image_url,
        "conceptId": concept_id,
        "difficulty": difficulty,
        "questionType": question_type,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "questions.generate" => questions_generate(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
