//! Core grading behaviors: submission validation, grading-instruction and
//! schema construction, decoding of the structured result, prior-draft
//! selection, and the follow-up chat.
//!
//! Everything here talks to the model through the narrow `ModelPort` trait so
//! the orchestration can be exercised with a scripted fake in tests.

use std::future::Future;

use base64::Engine;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{
  ChatMessage, ChatRole, ContentPart, EssayType, GradingResult, HistoryRecord, ImageAttachment,
};
use crate::error::{AppError, AppResult};
use crate::util::{fill_template, word_count};

/// Returned to the user when the chat model comes back with empty text.
/// A normal outcome, not a failure.
pub const CHAT_FALLBACK: &str =
  "Sorry, I could not come up with an answer to that. Please try asking again.";

/// How many same-topic prior attempts are selected as revision context.
pub const MAX_PRIOR_DRAFTS: usize = 3;

/// Narrow port to the external model: one structured grading call, one
/// plain-text chat call. `OpenAI` implements it for production.
pub trait ModelPort: Send + Sync {
  /// Returns the raw JSON text of the structured response.
  fn grade_structured(
    &self,
    instruction: &str,
    parts: &[ContentPart],
    schema: Value,
  ) -> impl Future<Output = Result<String, String>> + Send;

  /// Returns the reply text, possibly empty.
  fn chat_plain(&self, system: &str, user: &str)
    -> impl Future<Output = Result<String, String>> + Send;
}

/// One grading submission, as captured by the session controller.
pub struct GradeRequest<'a> {
  pub essay_type: EssayType,
  pub topic_text: &'a str,
  pub topic_image: Option<&'a ImageAttachment>,
  pub essay_text: &'a str,
  pub essay_image: Option<&'a ImageAttachment>,
  pub prior_drafts: &'a [HistoryRecord],
}

/// Caller-side validation, run before any external call: each of topic and
/// essay needs text or an image, and image payloads must be valid base64.
pub fn validate_submission(req: &GradeRequest<'_>) -> AppResult<()> {
  if req.topic_text.trim().is_empty() && req.topic_image.is_none() {
    return Err(AppError::Validation("provide the writing prompt as text or image".into()));
  }
  if req.essay_text.trim().is_empty() && req.essay_image.is_none() {
    return Err(AppError::Validation("provide the essay as text or image".into()));
  }
  for (label, img) in [("topic", req.topic_image), ("essay", req.essay_image)] {
    if let Some(img) = img {
      if base64::engine::general_purpose::STANDARD.decode(&img.data).is_err() {
        return Err(AppError::Validation(format!("{} image is not valid base64", label)));
      }
      if !img.mime.starts_with("image/") {
        return Err(AppError::Validation(format!("{} attachment is not an image", label)));
      }
    }
  }
  Ok(())
}

/// Filter the history to same-type, byte-identical-topic attempts, newest
/// first, at most `MAX_PRIOR_DRAFTS`. An empty topic selects nothing:
/// image-only topics never match prior drafts.
pub fn select_prior_drafts(
  records: &[HistoryRecord],
  essay_type: EssayType,
  topic_text: &str,
) -> Vec<HistoryRecord> {
  if topic_text.is_empty() {
    return vec![];
  }
  let mut matches: Vec<HistoryRecord> = records
    .iter()
    .filter(|r| r.essay_type == essay_type && r.topic_text == topic_text)
    .cloned()
    .collect();
  matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
  matches.truncate(MAX_PRIOR_DRAFTS);
  matches
}

/// Assemble the single system instruction: persona + per-type rubric + word
/// count hint + revision context. Only the most recent prior draft is quoted;
/// the rest of the selection is deliberately not forwarded.
pub fn build_grading_instruction(
  prompts: &Prompts,
  essay_type: EssayType,
  essay_text: &str,
  prior_drafts: &[HistoryRecord],
) -> String {
  let rubric = match essay_type {
    EssayType::Big => &prompts.rubric_big,
    EssayType::Small => &prompts.rubric_small,
  };
  let mut instruction = format!("{}\n\n{}", prompts.grading_system, rubric);

  if !essay_text.trim().is_empty() {
    instruction.push_str(&format!(
      "\n\nThe typed essay contains approximately {} words.",
      word_count(essay_text)
    ));
  }

  if let Some(latest) = prior_drafts.first() {
    let block = fill_template(
      &prompts.revision_context_template,
      &[
        ("prior_score", &format!("{}", latest.result.total_score)),
        ("max_score", &format!("{}", essay_type.max_score())),
        ("prior_essay", &latest.essay_text),
      ],
    );
    instruction.push_str("\n\n");
    instruction.push_str(&block);
  }

  instruction
}

/// Ordered content parts for the grading call: prompt text/image first, then
/// the essay text/image.
pub fn build_content_parts(req: &GradeRequest<'_>) -> Vec<ContentPart> {
  let mut parts = Vec::new();
  if req.topic_text.trim().is_empty() {
    parts.push(ContentPart::Text("Writing prompt: provided as the attached image.".into()));
  } else {
    parts.push(ContentPart::Text(format!("Writing prompt:\n{}", req.topic_text)));
  }
  if let Some(img) = req.topic_image {
    parts.push(ContentPart::InlineImage { mime: img.mime.clone(), data: img.data.clone() });
  }
  if req.essay_text.trim().is_empty() {
    parts.push(ContentPart::Text("Student essay: provided as the attached image.".into()));
  } else {
    parts.push(ContentPart::Text(format!("Student essay:\n{}", req.essay_text)));
  }
  if let Some(img) = req.essay_image {
    parts.push(ContentPart::InlineImage { mime: img.mime.clone(), data: img.data.clone() });
  }
  parts
}

/// The declared response schema. Shape is identical for both essay types;
/// only the numeric bounds and the `maxScore` constant differ.
pub fn grading_schema(essay_type: EssayType) -> Value {
  let max = essay_type.max_score();
  let dim = essay_type.dimension_max();
  let dim_score = || json!({ "type": "number", "minimum": 0, "maximum": dim });
  json!({
    "type": "object",
    "additionalProperties": false,
    "properties": {
      "totalScore": { "type": "number", "minimum": 0, "maximum": max },
      "maxScore": { "type": "number", "const": max },
      "scoreBreakdown": {
        "type": "object",
        "additionalProperties": false,
        "properties": {
          "languageAccuracy": dim_score(),
          "contentCompleteness": dim_score(),
          "languageAuthenticity": dim_score(),
          "structureCoherence": dim_score(),
          "neatness": dim_score()
        },
        "required": [
          "languageAccuracy", "contentCompleteness", "languageAuthenticity",
          "structureCoherence", "neatness"
        ]
      },
      "topicAnalysis": { "type": "string" },
      "wordCountAnalysis": {
        "type": "object",
        "additionalProperties": false,
        "properties": {
          "count": { "type": "integer", "minimum": 0 },
          "comment": { "type": "string" },
          "isAcceptable": { "type": "boolean" },
          "pruningAdvice": { "type": ["string", "null"] }
        },
        "required": ["count", "comment", "isAcceptable", "pruningAdvice"]
      },
      "outline": { "type": "string" },
      "brightSpots": { "type": "array", "items": { "type": "string" } },
      "suggestions": { "type": "array", "items": { "type": "string" } },
      "corrections": {
        "type": "array",
        "items": {
          "type": "object",
          "additionalProperties": false,
          "properties": {
            "original": { "type": "string" },
            "correction": { "type": "string" },
            "explanation": { "type": "string" },
            "type": { "type": "string", "enum": ["grammar", "spelling", "vocabulary", "structure"] }
          },
          "required": ["original", "correction", "explanation", "type"]
        }
      },
      "improvements": {
        "type": "array",
        "items": {
          "type": "object",
          "additionalProperties": false,
          "properties": {
            "original": { "type": "string" },
            "improved": { "type": "string" },
            "reason": { "type": "string" },
            "type": { "type": "string", "enum": ["vocabulary", "sentence_structure"] }
          },
          "required": ["original", "improved", "reason", "type"]
        }
      },
      "polishedVersion": { "type": "string" },
      "exercises": {
        "type": "array",
        "items": {
          "type": "object",
          "additionalProperties": false,
          "properties": {
            "question": { "type": "string" },
            "options": { "type": ["array", "null"], "items": { "type": "string" } },
            "answer": { "type": "string" },
            "explanation": { "type": "string" }
          },
          "required": ["question", "options", "answer", "explanation"]
        }
      },
      "revisionAnalysis": {
        "type": "object",
        "additionalProperties": false,
        "properties": {
          "isRevision": { "type": "boolean" },
          "scoreChange": { "type": "string" },
          "improvements": { "type": "array", "items": { "type": "string" } },
          "persistentErrors": { "type": "array", "items": { "type": "string" } },
          "weaknessSummary": { "type": "string" }
        },
        "required": ["isRevision", "scoreChange", "improvements", "persistentErrors", "weaknessSummary"]
      }
    },
    "required": [
      "totalScore", "maxScore", "scoreBreakdown", "topicAnalysis",
      "wordCountAnalysis", "outline", "brightSpots", "suggestions",
      "corrections", "improvements", "polishedVersion", "exercises",
      "revisionAnalysis"
    ]
  })
}

/// Decode the raw payload into a `GradingResult` and check the score
/// invariants. Missing fields, bad JSON, a foreign `maxScore` or a total above
/// the maximum all reject the payload outright; there is no local repair.
pub fn parse_grading_result(essay_type: EssayType, raw: &str) -> Result<GradingResult, String> {
  if raw.trim().is_empty() {
    return Err("model returned no text".into());
  }
  let result: GradingResult =
    serde_json::from_str(raw).map_err(|e| format!("structured payload rejected: {}", e))?;
  let expected = essay_type.max_score();
  if result.max_score != expected {
    return Err(format!("maxScore {} does not match essay type (expected {})", result.max_score, expected));
  }
  if result.total_score > result.max_score {
    return Err(format!("totalScore {} exceeds maxScore {}", result.total_score, result.max_score));
  }
  Ok(result)
}

/// The Grading Request Builder: validate, build the instruction + parts +
/// schema, issue exactly one external call, decode. No retries, no caching.
#[instrument(level = "info", skip(model, prompts, req),
             fields(essay_type = ?req.essay_type, prior = req.prior_drafts.len(),
                    essay_len = req.essay_text.len()))]
pub async fn grade<M: ModelPort>(
  model: &M,
  prompts: &Prompts,
  req: &GradeRequest<'_>,
) -> AppResult<GradingResult> {
  validate_submission(req)?;

  let instruction = build_grading_instruction(prompts, req.essay_type, req.essay_text, req.prior_drafts);
  let parts = build_content_parts(req);
  let schema = grading_schema(req.essay_type);

  let raw = model
    .grade_structured(&instruction, &parts, schema)
    .await
    .map_err(AppError::Grading)?;

  let result = parse_grading_result(req.essay_type, &raw).map_err(AppError::Grading)?;
  info!(target: "grading", total = result.total_score, max = result.max_score,
        corrections = result.corrections.len(), "Grading result decoded");
  Ok(result)
}

fn format_transcript(messages: &[ChatMessage]) -> String {
  if messages.is_empty() {
    return "(no messages yet)".into();
  }
  messages
    .iter()
    .map(|m| match m.role {
      ChatRole::User => format!("Student: {}", m.content),
      ChatRole::Assistant => format!("Examiner: {}", m.content),
    })
    .collect::<Vec<_>>()
    .join("\n")
}

/// The Chat Orchestrator: one plain-text call embedding the score, the essay,
/// the serialized corrections and the transcript so far. Empty model text is
/// a normal outcome answered with `CHAT_FALLBACK`; a transport failure
/// propagates as `AppError::Chat`.
#[instrument(level = "info", skip_all, fields(transcript_len = transcript.len(), question_len = question.len()))]
pub async fn ask<M: ModelPort>(
  model: &M,
  prompts: &Prompts,
  result: &GradingResult,
  essay_text: &str,
  transcript: &[ChatMessage],
  question: &str,
) -> AppResult<String> {
  let corrections_json = serde_json::to_string(&result.corrections).unwrap_or_else(|_| "[]".into());
  let user = fill_template(
    &prompts.chat_user_template,
    &[
      ("total_score", &format!("{}", result.total_score)),
      ("max_score", &format!("{}", result.max_score)),
      ("essay_text", essay_text),
      ("corrections_json", &corrections_json),
      ("transcript", &format_transcript(transcript)),
      ("question", question),
    ],
  );

  let reply = model
    .chat_plain(&prompts.chat_system, &user)
    .await
    .map_err(AppError::Chat)?;
  let reply = reply.trim();
  if reply.is_empty() {
    warn!(target: "grading", "Chat model returned empty text; serving fallback");
    return Ok(CHAT_FALLBACK.to_string());
  }
  Ok(reply.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Scripted model: counts calls and replays canned responses.
  struct ScriptedModel {
    grade_calls: AtomicUsize,
    grade_script: Result<String, String>,
    chat_script: Result<String, String>,
  }

  impl ScriptedModel {
    fn grading(script: Result<String, String>) -> Self {
      Self {
        grade_calls: AtomicUsize::new(0),
        grade_script: script,
        chat_script: Ok(String::new()),
      }
    }

    fn chatting(script: Result<String, String>) -> Self {
      Self {
        grade_calls: AtomicUsize::new(0),
        grade_script: Err("unused".into()),
        chat_script: script,
      }
    }
  }

  impl ModelPort for ScriptedModel {
    async fn grade_structured(
      &self,
      _instruction: &str,
      _parts: &[ContentPart],
      _schema: Value,
    ) -> Result<String, String> {
      self.grade_calls.fetch_add(1, Ordering::SeqCst);
      self.grade_script.clone()
    }

    async fn chat_plain(&self, _system: &str, _user: &str) -> Result<String, String> {
      self.chat_script.clone()
    }
  }

  fn sample_payload(essay_type: EssayType) -> serde_json::Value {
    let max = essay_type.max_score();
    let dim = essay_type.dimension_max();
    json!({
      "totalScore": max - 2.0,
      "maxScore": max,
      "scoreBreakdown": {
        "languageAccuracy": dim - 1.0,
        "contentCompleteness": dim,
        "languageAuthenticity": dim - 0.5,
        "structureCoherence": dim - 0.5,
        "neatness": dim
      },
      "topicAnalysis": "Opinion essay.",
      "wordCountAnalysis": {
        "count": 180,
        "comment": "Within the target band.",
        "isAcceptable": true,
        "pruningAdvice": null
      },
      "outline": "Intro, body, conclusion.",
      "brightSpots": ["Clear thesis."],
      "suggestions": ["Vary connectors."],
      "corrections": [{
        "original": "he go",
        "correction": "he goes",
        "explanation": "third person singular",
        "type": "grammar"
      }],
      "improvements": [{
        "original": "good",
        "improved": "compelling",
        "reason": "precision",
        "type": "vocabulary"
      }],
      "polishedVersion": "A polished essay.",
      "exercises": [{
        "question": "Pick the correct form.",
        "options": ["go", "goes"],
        "answer": "goes",
        "explanation": "agreement"
      }],
      "revisionAnalysis": {
        "isRevision": false,
        "scoreChange": "",
        "improvements": [],
        "persistentErrors": [],
        "weaknessSummary": ""
      }
    })
  }

  fn prior(id: &str, topic: &str, essay_type: EssayType, t: u64) -> HistoryRecord {
    let result: GradingResult =
      serde_json::from_value(sample_payload(essay_type)).unwrap();
    HistoryRecord {
      id: id.into(),
      timestamp: t,
      essay_type,
      topic_text: topic.into(),
      essay_text: format!("draft at t={}", t),
      result,
      has_images: false,
    }
  }

  #[test]
  fn selector_filters_orders_and_caps() {
    let records = vec![
      prior("r1", "A", EssayType::Big, 1),
      prior("r3", "A", EssayType::Big, 3),
      prior("r2", "B", EssayType::Big, 2),
      prior("r4", "A", EssayType::Small, 4),
    ];
    let selected = select_prior_drafts(&records, EssayType::Big, "A");
    let ids: Vec<&str> = selected.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r3", "r1"]);
  }

  #[test]
  fn selector_returns_nothing_for_empty_topic() {
    let records = vec![prior("r1", "", EssayType::Big, 1)];
    assert!(select_prior_drafts(&records, EssayType::Big, "").is_empty());
  }

  #[test]
  fn selector_takes_at_most_three() {
    let records: Vec<_> = (1..=5u64)
      .map(|t| prior(&format!("r{}", t), "A", EssayType::Big, t))
      .collect();
    let selected = select_prior_drafts(&records, EssayType::Big, "A");
    assert_eq!(selected.len(), 3);
    assert_eq!(selected[0].timestamp, 5);
  }

  #[tokio::test]
  async fn empty_submission_fails_before_any_call() {
    let model = ScriptedModel::grading(Ok("{}".into()));
    let req = GradeRequest {
      essay_type: EssayType::Big,
      topic_text: "",
      topic_image: None,
      essay_text: "",
      essay_image: None,
      prior_drafts: &[],
    };
    let err = grade(&model, &Prompts::default(), &req).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(model.grade_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn invalid_image_base64_fails_validation() {
    let model = ScriptedModel::grading(Ok("{}".into()));
    let img = ImageAttachment { mime: "image/png".into(), data: "!!not-base64!!".into() };
    let req = GradeRequest {
      essay_type: EssayType::Big,
      topic_text: "Topic",
      topic_image: None,
      essay_text: "",
      essay_image: Some(&img),
      prior_drafts: &[],
    };
    let err = grade(&model, &Prompts::default(), &req).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(model.grade_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn well_formed_response_decodes() {
    let payload = sample_payload(EssayType::Big).to_string();
    let model = ScriptedModel::grading(Ok(payload));
    let req = GradeRequest {
      essay_type: EssayType::Big,
      topic_text: "Topic",
      topic_image: None,
      essay_text: "An essay.",
      essay_image: None,
      prior_drafts: &[],
    };
    let result = grade(&model, &Prompts::default(), &req).await.unwrap();
    assert_eq!(result.max_score, 20.0);
    assert!(result.total_score <= result.max_score);
    assert_eq!(model.grade_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn missing_required_field_is_a_grading_failure() {
    let mut payload = sample_payload(EssayType::Big);
    payload.as_object_mut().unwrap().remove("polishedVersion");
    let model = ScriptedModel::grading(Ok(payload.to_string()));
    let req = GradeRequest {
      essay_type: EssayType::Big,
      topic_text: "Topic",
      topic_image: None,
      essay_text: "An essay.",
      essay_image: None,
      prior_drafts: &[],
    };
    let err = grade(&model, &Prompts::default(), &req).await.unwrap_err();
    assert!(matches!(err, AppError::Grading(_)));
  }

  #[test]
  fn foreign_max_score_is_rejected() {
    let mut payload = sample_payload(EssayType::Small);
    payload["maxScore"] = json!(100.0);
    let err = parse_grading_result(EssayType::Small, &payload.to_string()).unwrap_err();
    assert!(err.contains("maxScore"));
  }

  #[test]
  fn total_above_max_is_rejected() {
    let mut payload = sample_payload(EssayType::Big);
    payload["totalScore"] = json!(21.0);
    let err = parse_grading_result(EssayType::Big, &payload.to_string()).unwrap_err();
    assert!(err.contains("exceeds"));
  }

  #[test]
  fn empty_payload_is_rejected() {
    assert!(parse_grading_result(EssayType::Big, "  ").is_err());
    assert!(parse_grading_result(EssayType::Big, "not json").is_err());
  }

  #[test]
  fn instruction_quotes_only_most_recent_prior_draft() {
    let priors = vec![
      prior("r3", "A", EssayType::Big, 3),
      prior("r1", "A", EssayType::Big, 1),
    ];
    let instr =
      build_grading_instruction(&Prompts::default(), EssayType::Big, "essay text here", &priors);
    assert!(instr.contains("draft at t=3"));
    assert!(!instr.contains("draft at t=1"));
    assert!(instr.contains("isRevision"));
  }

  #[test]
  fn instruction_carries_rubric_and_word_count_hint() {
    let instr = build_grading_instruction(
      &Prompts::default(),
      EssayType::Big,
      "one two three four five",
      &[],
    );
    assert!(instr.contains("160-200"));
    assert!(instr.contains("approximately 5 words"));
    assert!(!instr.contains("Revision context"));

    let instr = build_grading_instruction(&Prompts::default(), EssayType::Small, "", &[]);
    assert!(instr.contains("minor composition"));
    assert!(!instr.contains("approximately"));
  }

  #[test]
  fn content_parts_substitute_labels_for_image_only_inputs() {
    let img = ImageAttachment { mime: "image/jpeg".into(), data: "aGk=".into() };
    let req = GradeRequest {
      essay_type: EssayType::Big,
      topic_text: "Topic",
      topic_image: None,
      essay_text: "",
      essay_image: Some(&img),
      prior_drafts: &[],
    };
    let parts = build_content_parts(&req);
    assert_eq!(parts.len(), 3);
    assert!(matches!(&parts[0], ContentPart::Text(t) if t.contains("Topic")));
    assert!(matches!(&parts[1], ContentPart::Text(t) if t.contains("attached image")));
    assert!(matches!(&parts[2], ContentPart::InlineImage { mime, .. } if mime == "image/jpeg"));
  }

  #[test]
  fn schema_bounds_differ_by_essay_type() {
    let big = grading_schema(EssayType::Big);
    let small = grading_schema(EssayType::Small);
    assert_eq!(big["properties"]["maxScore"]["const"], 20.0);
    assert_eq!(small["properties"]["maxScore"]["const"], 10.0);
    assert_eq!(
      big["properties"]["scoreBreakdown"]["properties"]["neatness"]["maximum"],
      4.0
    );
    assert_eq!(
      small["properties"]["scoreBreakdown"]["properties"]["neatness"]["maximum"],
      2.0
    );
  }

  #[tokio::test]
  async fn chat_serves_fallback_on_empty_reply() {
    let model = ScriptedModel::chatting(Ok("   ".into()));
    let result: GradingResult =
      serde_json::from_value(sample_payload(EssayType::Big)).unwrap();
    let reply = ask(&model, &Prompts::default(), &result, "essay", &[], "why?").await.unwrap();
    assert_eq!(reply, CHAT_FALLBACK);
  }

  #[tokio::test]
  async fn chat_transport_failure_propagates() {
    let model = ScriptedModel::chatting(Err("connection reset".into()));
    let result: GradingResult =
      serde_json::from_value(sample_payload(EssayType::Big)).unwrap();
    let err = ask(&model, &Prompts::default(), &result, "essay", &[], "why?").await.unwrap_err();
    assert!(matches!(err, AppError::Chat(_)));
  }

  #[test]
  fn transcript_formats_roles() {
    let messages = vec![
      ChatMessage { role: ChatRole::User, content: "Why 15?".into(), timestamp: 1 },
      ChatMessage { role: ChatRole::Assistant, content: "Because...".into(), timestamp: 2 },
    ];
    let t = format_transcript(&messages);
    assert_eq!(t, "Student: Why 15?\nExaminer: Because...");
    assert_eq!(format_transcript(&[]), "(no messages yet)");
  }
}
