//! AI question-generation collaborator.
//!
//! One [`QuestionGenerator`] trait; the backing API is picked at
//! configuration time (`EDUTEST_AI_PROVIDER`), never by duplicating the
//! service. Calls are blocking with bounded timeouts and are never retried
//! automatically.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const IMAGE_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GenerationRequest {
    pub difficulty: String,
    pub question_type: String,
    pub user_prompt: Option<String>,
    pub correct_answer: Option<String>,
    pub generate_image: bool,
}

/// Full hierarchy context of the concept the question is generated for.
pub struct ConceptContext {
    pub concept_name: String,
    pub concept_description: Option<String>,
    pub sub_unit_name: Option<String>,
    pub unit_name: Option<String>,
    pub subject_name: Option<String>,
    pub grade_name: Option<String>,
    pub level_name: Option<String>,
}

#[derive(Debug)]
pub struct GeneratedQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
    pub generated_image_url: Option<String>,
}

pub trait QuestionGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
        context: &ConceptContext,
    ) -> ServiceResult<GeneratedQuestion>;
}

/// Placeholder when no API key is configured.
pub struct DisabledGenerator;

impl QuestionGenerator for DisabledGenerator {
    fn generate(
        &self,
        _request: &GenerationRequest,
        _context: &ConceptContext,
    ) -> ServiceResult<GeneratedQuestion> {
        Err(ServiceError::ExternalService(
            "AI generation is not configured: no API key".into(),
        ))
    }
}

pub struct OpenAiGenerator {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    image_model: String,
    image_dir: PathBuf,
}

impl OpenAiGenerator {
    pub fn new(
        api_key: String,
        base_url: String,
        chat_model: String,
        image_model: String,
        image_dir: PathBuf,
    ) -> ServiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::ExternalService(format!("http client: {}", e)))?;
        Ok(OpenAiGenerator {
            client,
            api_key,
            base_url,
            chat_model,
            image_model,
            image_dir,
        })
    }

    fn chat(&self, system_prompt: &str, user_prompt: &str) -> ServiceResult<String> {
        let body = json!({
            "model": self.chat_model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": 0.7,
        });
        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| ServiceError::ExternalService(format!("chat request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(ServiceError::ExternalService(format!(
                "chat request failed with status {}",
                resp.status()
            )));
        }
        let value: serde_json::Value = resp
            .json()
            .map_err(|e| ServiceError::ExternalService(format!("chat response: {}", e)))?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ServiceError::ExternalService("chat response had no message content".into())
            })
    }

    /// Generate an illustration, download it, and return its
    /// workspace-relative path.
    fn generate_image(&self, question_text: &str, context: &ConceptContext) -> ServiceResult<String> {
        let prompt = format!(
            "A clean, minimal educational illustration (no text) for a {} question about \"{}\": {}",
            context.subject_name.as_deref().unwrap_or("science"),
            context.concept_name,
            question_text
        );
        let body = json!({
            "model": self.image_model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });
        let resp = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(IMAGE_TIMEOUT)
            .json(&body)
            .send()
            .map_err(|e| ServiceError::ExternalService(format!("image request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(ServiceError::ExternalService(format!(
                "image request failed with status {}",
                resp.status()
            )));
        }
        let value: serde_json::Value = resp
            .json()
            .map_err(|e| ServiceError::ExternalService(format!("image response: {}", e)))?;
        let url = value["data"][0]["url"].as_str().ok_or_else(|| {
            ServiceError::ExternalService("image response had no url".into())
        })?;

        let bytes = self
            .client
            .get(url)
            .timeout(IMAGE_TIMEOUT)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| ServiceError::ExternalService(format!("image download failed: {}", e)))?;

        std::fs::create_dir_all(&self.image_dir)
            .map_err(|e| ServiceError::ExternalService(format!("image dir: {}", e)))?;
        let filename = format!("{}.png", Uuid::new_v4());
        std::fs::write(self.image_dir.join(&filename), &bytes)
            .map_err(|e| ServiceError::ExternalService(format!("image write: {}", e)))?;
        Ok(format!("ai_images/{}", filename))
    }
}

impl QuestionGenerator for OpenAiGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
        context: &ConceptContext,
    ) -> ServiceResult<GeneratedQuestion> {
        let system_prompt = build_system_prompt(request, context);
        let user_prompt = build_user_prompt(request);

        let content = self.chat(&system_prompt, &user_prompt)?;
        let payload = extract_json_payload(&content).ok_or_else(|| {
            ServiceError::ExternalService("could not locate JSON in model output".into())
        })?;
        let mut generated = parse_generated(&payload)?;

        // Image failure degrades gracefully: the question itself still comes
        // back.
        if request.generate_image {
            match self.generate_image(&generated.question_text, context) {
                Ok(path) => generated.generated_image_url = Some(path),
                Err(e) => {
                    tracing::warn!("image generation failed, continuing without: {}", e);
                }
            }
        }

        Ok(generated)
    }
}

fn build_system_prompt(request: &GenerationRequest, context: &ConceptContext) -> String {
    let mut prompt = String::from(
        "You are an expert teacher writing exam questions. Generate one question \
         for the curriculum context below.\n",
    );
    if let Some(level) = &context.level_name {
        prompt.push_str(&format!("Education level: {}\n", level));
    }
    if let Some(grade) = &context.grade_name {
        prompt.push_str(&format!("Grade: {}\n", grade));
    }
    if let Some(subject) = &context.subject_name {
        prompt.push_str(&format!("Subject: {}\n", subject));
    }
    if let Some(unit) = &context.unit_name {
        prompt.push_str(&format!("Unit: {}\n", unit));
    }
    if let Some(sub_unit) = &context.sub_unit_name {
        prompt.push_str(&format!("Sub-unit: {}\n", sub_unit));
    }
    prompt.push_str(&format!("Concept: {}\n", context.concept_name));
    if let Some(desc) = &context.concept_description {
        prompt.push_str(&format!("Concept description: {}\n", desc));
    }
    prompt.push_str(&format!(
        "Difficulty: {}\nQuestion type: {}\n",
        request.difficulty, request.question_type
    ));
    prompt.push_str(
        "Respond with a single JSON object and nothing else, with keys: \
         \"question\" (string), \"options\" (array of strings, empty unless the \
         type is MULTIPLE_CHOICE or TRUE_FALSE), \"correct_answer\" (string, \
         must equal one of the options for choice types), \"explanation\" \
         (string).",
    );
    prompt
}

fn build_user_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::from("Generate the question now.");
    if let Some(hint) = &request.user_prompt {
        prompt.push_str(&format!(" Additional instructions: {}", hint));
    }
    if let Some(answer) = &request.correct_answer {
        prompt.push_str(&format!(" The correct answer must be: {}", answer));
    }
    prompt
}

/// Models wrap JSON in prose or markdown fences more often than not; take
/// the outermost brace-delimited region and parse that.
fn extract_json_payload(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn parse_generated(payload: &serde_json::Value) -> ServiceResult<GeneratedQuestion> {
    let question_text = payload
        .get("question")
        .or_else(|| payload.get("questionText"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ServiceError::ExternalService("model output missing \"question\"".into())
        })?;
    let options = payload
        .get("options")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|o| o.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let correct_answer = payload
        .get("correct_answer")
        .or_else(|| payload.get("correctAnswer"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ServiceError::ExternalService("model output missing \"correct_answer\"".into())
        })?;
    let explanation = payload
        .get("explanation")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    Ok(GeneratedQuestion {
        question_text,
        options,
        correct_answer,
        explanation,
        generated_image_url: None,
    })
}

/// Configuration-time provider selection. The stored secret wins over the
/// environment so a key rotated through the admin surface takes effect
/// without a restart.
pub fn select_provider(workspace: &Path) -> Box<dyn QuestionGenerator> {
    let api_key = crate::secrets::load_api_key(workspace)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty());
    let Some(api_key) = api_key else {
        return Box::new(DisabledGenerator);
    };

    let provider = std::env::var("EDUTEST_AI_PROVIDER").unwrap_or_else(|_| "openai".into());
    let chat_model =
        std::env::var("EDUTEST_AI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".into());
    let image_model =
        std::env::var("EDUTEST_AI_IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".into());
    let image_dir = workspace.join("ai_images");

    let base_url = match provider.as_str() {
        "openai" => OPENAI_BASE_URL.to_string(),
        // Any OpenAI-compatible endpoint (self-hosted or third-party vendor).
        "compatible" => std::env::var("EDUTEST_AI_BASE_URL")
            .unwrap_or_else(|_| OPENAI_BASE_URL.to_string()),
        other => {
            tracing::warn!("unknown AI provider '{}', generation disabled", other);
            return Box::new(DisabledGenerator);
        }
    };

    match OpenAiGenerator::new(api_key, base_url, chat_model, image_model, image_dir) {
        Ok(g) => Box::new(g),
        Err(e) => {
            tracing::warn!("AI provider init failed: {}, generation disabled", e);
            Box::new(DisabledGenerator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let v = extract_json_payload(r#"{"question":"q","correct_answer":"a"}"#).expect("json");
        assert_eq!(v["question"], "q");
    }

    #[test]
    fn extracts_fenced_json() {
        let content = "Here is your question:\n```json\n{\"question\": \"What is 2+2?\", \"options\": [\"3\", \"4\"], \"correct_answer\": \"4\", \"explanation\": \"arithmetic\"}\n```\nEnjoy!";
        let v = extract_json_payload(content).expect("json");
        let parsed = parse_generated(&v).expect("parse");
        assert_eq!(parsed.question_text, "What is 2+2?");
        assert_eq!(parsed.options, vec!["3", "4"]);
        assert_eq!(parsed.correct_answer, "4");
        assert_eq!(parsed.explanation, "arithmetic");
    }

    #[test]
    fn rejects_output_without_json() {
        assert!(extract_json_payload("no json here").is_none());
    }

    #[test]
    fn missing_answer_is_an_error() {
        let v = extract_json_payload(r#"{"question":"q"}"#).expect("json");
        assert!(parse_generated(&v).is_err());
    }
}
