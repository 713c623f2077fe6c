//! Minimal OpenAI-compatible client for our two call shapes.
//!
//! We only call chat.completions, either with a strict JSON-schema response
//! format (the grading call, which may carry inlined images) or as plain text
//! (the follow-up chat). Calls are instrumented and log model names,
//! latencies, and token usage (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to
//! avoid leaking essay contents into logs.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::domain::ContentPart;
use crate::logic::ModelPort;
use crate::util::trunc_for_log;

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub grading_model: String,
  pub chat_model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let grading_model =
      std::env::var("OPENAI_GRADING_MODEL").unwrap_or_else(|_| "gpt-4o".into());
    let chat_model =
      std::env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(90))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, grading_model, chat_model })
  }

  async fn send(&self, req: &ChatCompletionRequest) -> Result<String, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let res = self.client.post(&url)
      .header(USER_AGENT, "redpen-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();
    Ok(text)
  }
}

impl ModelPort for OpenAI {
  /// One schema-constrained grading call. Returns the raw JSON text; the
  /// caller decodes and validates it.
  #[instrument(level = "info", skip(self, instruction, parts, schema),
               fields(model = %self.grading_model, instr_len = instruction.len(), parts = parts.len()))]
  async fn grade_structured(
    &self,
    instruction: &str,
    parts: &[ContentPart],
    schema: serde_json::Value,
  ) -> Result<String, String> {
    let req = ChatCompletionRequest {
      model: self.grading_model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: MessageContent::Text(instruction.into()) },
        ChatMessageReq { role: "user".into(), content: MessageContent::Parts(to_part_reqs(parts)) },
      ],
      temperature: 0.3,
      response_format: Some(ResponseFormat {
        r#type: "json_schema".into(),
        json_schema: Some(JsonSchemaFormat {
          name: "grading_result".into(),
          strict: true,
          schema,
        }),
      }),
    };

    let start = std::time::Instant::now();
    let out = self.send(&req).await;
    let elapsed = start.elapsed();
    match &out {
      Ok(text) => {
        info!(target: "grading", ?elapsed, reply_len = text.len(), "Grading call completed");
        tracing::debug!(target: "grading", reply = %trunc_for_log(text, 400), "Grading reply");
      }
      Err(e) => info!(target: "grading", ?elapsed, error = %e, "Grading call failed"),
    }
    out
  }

  /// Plain-text chat completion for the follow-up conversation.
  #[instrument(level = "info", skip(self, system, user),
               fields(model = %self.chat_model, user_len = user.len()))]
  async fn chat_plain(&self, system: &str, user: &str) -> Result<String, String> {
    let req = ChatCompletionRequest {
      model: self.chat_model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: MessageContent::Text(system.into()) },
        ChatMessageReq { role: "user".into(), content: MessageContent::Text(user.into()) },
      ],
      temperature: 0.2,
      response_format: None,
    };
    let text = self.send(&req).await?;
    Ok(text.trim().to_string())
  }
}

fn to_part_reqs(parts: &[ContentPart]) -> Vec<PartReq> {
  parts
    .iter()
    .map(|p| match p {
      ContentPart::Text(t) => PartReq::Text { text: t.clone() },
      ContentPart::InlineImage { mime, data } => PartReq::ImageUrl {
        image_url: ImageUrl { url: format!("data:{};base64,{}", mime, data) },
      },
    })
    .collect()
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessageReq {
  role: String,
  content: MessageContent,
}

/// A message body is either a plain string or an ordered array of parts
/// (text / data-URL image), matching the chat.completions wire format.
#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
  Text(String),
  Parts(Vec<PartReq>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PartReq {
  Text { text: String },
  ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
  url: String,
}

#[derive(Serialize)]
struct ResponseFormat {
  #[serde(rename = "type")]
  r#type: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  json_schema: Option<JsonSchemaFormat>,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
  name: String,
  strict: bool,
  schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
