//! Public HTTP request/response DTOs (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{EssayType, GradingResult, HistoryRecord, ImageAttachment};
use crate::state::{Phase, SessionSnapshot};

#[derive(Debug, Deserialize)]
pub struct SubmitIn {
  /// Minted server-side when absent (first submit of a tab).
  #[serde(rename = "sessionId")]
  pub session_id: Option<String>,
  #[serde(rename = "essayType")]
  pub essay_type: EssayType,
  #[serde(rename = "topicText", default)]
  pub topic_text: String,
  #[serde(rename = "topicImage", default)]
  pub topic_image: Option<ImageAttachment>,
  #[serde(rename = "essayText", default)]
  pub essay_text: String,
  #[serde(rename = "essayImage", default)]
  pub essay_image: Option<ImageAttachment>,
}

#[derive(Serialize)]
pub struct GradeOut {
  #[serde(rename = "sessionId")]
  pub session_id: String,
  /// None when the result could not be saved to history.
  #[serde(rename = "recordId")]
  pub record_id: Option<String>,
  pub result: GradingResult,
}

#[derive(Debug, Deserialize)]
pub struct ChatIn {
  #[serde(rename = "sessionId")]
  pub session_id: String,
  pub message: String,
}

#[derive(Serialize)]
pub struct ChatOut {
  pub reply: String,
}

#[derive(Serialize)]
pub struct HistoryOut {
  pub records: Vec<HistoryRecord>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryDeleteIn {
  pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryOpenIn {
  #[serde(rename = "sessionId")]
  pub session_id: String,
  #[serde(rename = "recordId")]
  pub record_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionIn {
  #[serde(rename = "sessionId")]
  pub session_id: String,
}

#[derive(Serialize)]
pub struct SessionOut {
  #[serde(rename = "sessionId")]
  pub session_id: String,
  pub phase: Phase,
  #[serde(rename = "essayType")]
  pub essay_type: EssayType,
  #[serde(rename = "topicText")]
  pub topic_text: String,
  #[serde(rename = "essayText")]
  pub essay_text: String,
  #[serde(rename = "hasTopicImage")]
  pub has_topic_image: bool,
  #[serde(rename = "hasEssayImage")]
  pub has_essay_image: bool,
}

impl SessionOut {
  pub fn from_snapshot(session_id: String, snap: SessionSnapshot) -> Self {
    Self {
      session_id,
      phase: snap.phase,
      essay_type: snap.essay_type,
      topic_text: snap.topic_text,
      essay_text: snap.essay_text,
      has_topic_image: snap.has_topic_image,
      has_essay_image: snap.has_essay_image,
    }
  }
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}
