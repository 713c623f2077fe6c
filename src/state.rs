//! Application state and the per-session grading state machine.
//!
//! This module owns:
//!   - the session map (one `Session` per browser tab / client id)
//!   - the history store behind its blob backend
//!   - the optional model client and the prompt texts
//!
//! A session walks Editing -> Grading -> Viewing -> Editing. One grading call
//! may be in flight per session; a second submit is rejected while it runs.
//! An epoch counter makes sure a late model response cannot touch a session
//! the user has since reset or pointed at a history record.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, instrument, warn};

use crate::config::{load_agent_config_from_env, Prompts};
use crate::domain::{
  ChatMessage, ChatRole, EssayType, GradingResult, HistoryRecord, ImageAttachment,
};
use crate::error::{AppError, AppResult};
use crate::history::{time_id, BlobStorage, FileBlob, HistoryStore};
use crate::logic::{self, GradeRequest, ModelPort};
use crate::openai::OpenAI;
use crate::util::now_millis;

/// Stored in place of empty text fields when only an image was supplied.
/// Raw image payloads are never persisted.
pub const TOPIC_IMAGE_PLACEHOLDER: &str = "(prompt submitted as image)";
pub const ESSAY_IMAGE_PLACEHOLDER: &str = "(essay submitted as image)";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Editing,
  Grading,
  Viewing,
}

impl Default for Phase {
  fn default() -> Self { Phase::Editing }
}

/// Per-client session state. Images live only here, in memory, until the
/// session is cleared.
#[derive(Default)]
pub struct Session {
  pub phase: Phase,
  pub essay_type: EssayType,
  pub topic_text: String,
  pub essay_text: String,
  pub topic_image: Option<ImageAttachment>,
  pub essay_image: Option<ImageAttachment>,
  pub result: Option<GradingResult>,
  pub active_record_id: Option<String>,
  pub chat: Vec<ChatMessage>,
  /// Bumped on every submit and reset; guards against stale model responses.
  epoch: u64,
}

/// Inputs captured from one submit action.
#[derive(Clone)]
pub struct SubmitInput {
  pub essay_type: EssayType,
  pub topic_text: String,
  pub topic_image: Option<ImageAttachment>,
  pub essay_text: String,
  pub essay_image: Option<ImageAttachment>,
}

/// What a successful submit yields: the grading result, plus the history
/// record id when persistence succeeded (None means the result was shown but
/// could not be saved).
#[derive(Debug)]
pub struct SubmitOutcome {
  pub result: GradingResult,
  pub record_id: Option<String>,
}

/// Read-only view of a session for the HTTP layer.
pub struct SessionSnapshot {
  pub phase: Phase,
  pub essay_type: EssayType,
  pub topic_text: String,
  pub essay_text: String,
  pub has_topic_image: bool,
  pub has_essay_image: bool,
}

fn snapshot(s: &Session) -> SessionSnapshot {
  SessionSnapshot {
    phase: s.phase,
    essay_type: s.essay_type,
    topic_text: s.topic_text.clone(),
    essay_text: s.essay_text.clone(),
    has_topic_image: s.topic_image.is_some(),
    has_essay_image: s.essay_image.is_some(),
  }
}

pub struct AppState<M: ModelPort = OpenAI, B: BlobStorage = FileBlob> {
  pub sessions: RwLock<HashMap<String, Session>>,
  pub history: Mutex<HistoryStore<B>>,
  pub model: Option<M>,
  pub prompts: Prompts,
}

impl AppState {
  /// Build production state from env: prompts (TOML override), file-backed
  /// history, OpenAI client if an API key is present.
  #[instrument(level = "info", skip_all)]
  pub fn from_env() -> Self {
    let prompts = load_agent_config_from_env()
      .map(|c| c.prompts)
      .unwrap_or_default();

    let model = OpenAI::from_env();
    if let Some(m) = &model {
      info!(target: "redpen_backend", base_url = %m.base_url, grading_model = %m.grading_model, chat_model = %m.chat_model, "OpenAI enabled.");
    } else {
      warn!(target: "redpen_backend", "OpenAI disabled (no OPENAI_API_KEY). Grading and chat will be unavailable; history still works.");
    }

    Self::new(model, FileBlob::from_env(), prompts)
  }
}

impl<M: ModelPort, B: BlobStorage> AppState<M, B> {
  pub fn new(model: Option<M>, backend: B, prompts: Prompts) -> Self {
    Self {
      sessions: RwLock::new(HashMap::new()),
      history: Mutex::new(HistoryStore::new(backend)),
      model,
      prompts,
    }
  }

  /// Submit transition: validate, grade, persist, move to Viewing.
  ///
  /// Rejects with `Busy` while a grading call is in flight for the session.
  /// On grading failure the session returns to Editing with inputs intact.
  /// Persistence failure never blocks the result; it only costs the record id.
  #[instrument(level = "info", skip(self, input), fields(%session_id, essay_type = ?input.essay_type))]
  pub async fn submit(&self, session_id: &str, input: SubmitInput) -> AppResult<SubmitOutcome> {
    let epoch = {
      let mut sessions = self.sessions.write().await;
      let s = sessions.entry(session_id.to_string()).or_default();
      if s.phase == Phase::Grading {
        return Err(AppError::Busy);
      }

      // Validation runs before the session leaves Editing and before any
      // external call.
      let probe = GradeRequest {
        essay_type: input.essay_type,
        topic_text: &input.topic_text,
        topic_image: input.topic_image.as_ref(),
        essay_text: &input.essay_text,
        essay_image: input.essay_image.as_ref(),
        prior_drafts: &[],
      };
      logic::validate_submission(&probe)?;

      s.phase = Phase::Grading;
      s.essay_type = input.essay_type;
      s.topic_text = input.topic_text.clone();
      s.essay_text = input.essay_text.clone();
      s.topic_image = input.topic_image.clone();
      s.essay_image = input.essay_image.clone();
      s.result = None;
      s.active_record_id = None;
      s.epoch += 1;
      s.epoch
    };

    let Some(model) = self.model.as_ref() else {
      self.abort_grading(session_id, epoch).await;
      return Err(AppError::ModelUnavailable);
    };

    let prior_drafts = {
      let history = self.history.lock().await;
      logic::select_prior_drafts(&history.list(), input.essay_type, &input.topic_text)
    };

    let req = GradeRequest {
      essay_type: input.essay_type,
      topic_text: &input.topic_text,
      topic_image: input.topic_image.as_ref(),
      essay_text: &input.essay_text,
      essay_image: input.essay_image.as_ref(),
      prior_drafts: &prior_drafts,
    };

    let result = match logic::grade(model, &self.prompts, &req).await {
      Ok(r) => r,
      Err(e) => {
        self.abort_grading(session_id, epoch).await;
        return Err(e);
      }
    };

    // Persist first; the grading already happened and is worth recording even
    // if the user has navigated away in the meantime.
    let has_images = input.topic_image.is_some() || input.essay_image.is_some();
    let record_id = {
      let mut history = self.history.lock().await;
      let existing = history.list();
      let now = now_millis();
      let id = time_id(&existing, now);
      let record = HistoryRecord {
        id: id.clone(),
        timestamp: now,
        essay_type: input.essay_type,
        topic_text: if input.topic_text.trim().is_empty() {
          TOPIC_IMAGE_PLACEHOLDER.into()
        } else {
          input.topic_text.clone()
        },
        essay_text: if input.essay_text.trim().is_empty() {
          ESSAY_IMAGE_PLACEHOLDER.into()
        } else {
          input.essay_text.clone()
        },
        result: result.clone(),
        has_images,
      };
      let saved = history.save(record);
      if saved.iter().any(|r| r.id == id) {
        Some(id)
      } else {
        error!(target: "history", "Grading result could not be saved; serving it unsaved");
        None
      }
    };

    {
      let mut sessions = self.sessions.write().await;
      match sessions.get_mut(session_id) {
        Some(s) if s.epoch == epoch && s.phase == Phase::Grading => {
          s.phase = Phase::Viewing;
          s.result = Some(result.clone());
          s.active_record_id = record_id.clone();
          s.chat.clear();
        }
        _ => {
          info!(target: "redpen_backend", %session_id, "Session moved on; late grading response not applied");
        }
      }
    }

    Ok(SubmitOutcome { result, record_id })
  }

  /// Grading failed or could not start: back to Editing with inputs intact,
  /// unless the session has already moved on.
  async fn abort_grading(&self, session_id: &str, epoch: u64) {
    let mut sessions = self.sessions.write().await;
    if let Some(s) = sessions.get_mut(session_id) {
      if s.epoch == epoch && s.phase == Phase::Grading {
        s.phase = Phase::Editing;
      }
    }
  }

  /// Follow-up question about the currently viewed result. The transcript is
  /// only extended when the call succeeds, so a failure leaves nothing to
  /// clean up and the user can simply resend.
  #[instrument(level = "info", skip(self, question), fields(%session_id, question_len = question.len()))]
  pub async fn chat(&self, session_id: &str, question: &str) -> AppResult<String> {
    let (result, essay_text, transcript) = {
      let sessions = self.sessions.read().await;
      let s = sessions
        .get(session_id)
        .ok_or_else(|| AppError::Validation("unknown session".into()))?;
      let result = match (&s.phase, &s.result) {
        (Phase::Viewing, Some(r)) => r.clone(),
        _ => return Err(AppError::Validation("no grading result to discuss".into())),
      };
      (result, s.essay_text.clone(), s.chat.clone())
    };

    let model = self.model.as_ref().ok_or(AppError::ModelUnavailable)?;
    let reply = logic::ask(model, &self.prompts, &result, &essay_text, &transcript, question).await?;

    let mut sessions = self.sessions.write().await;
    if let Some(s) = sessions.get_mut(session_id) {
      if s.phase == Phase::Viewing {
        let now = now_millis();
        s.chat.push(ChatMessage { role: ChatRole::User, content: question.to_string(), timestamp: now });
        s.chat.push(ChatMessage { role: ChatRole::Assistant, content: reply.clone(), timestamp: now });
      }
    }
    Ok(reply)
  }

  /// "Edit" transition: leave Viewing, keep the entered inputs. The chat
  /// transcript dies with the Viewing state.
  #[instrument(level = "info", skip(self), fields(%session_id))]
  pub async fn edit(&self, session_id: &str) -> AppResult<SessionSnapshot> {
    let mut sessions = self.sessions.write().await;
    let s = sessions.entry(session_id.to_string()).or_default();
    match s.phase {
      Phase::Grading => return Err(AppError::Busy),
      Phase::Viewing => {
        s.phase = Phase::Editing;
        s.result = None;
        s.active_record_id = None;
        s.chat.clear();
      }
      Phase::Editing => {}
    }
    Ok(snapshot(s))
  }

  /// "New" transition: clear everything. Also invalidates any in-flight
  /// grading response via the epoch bump.
  #[instrument(level = "info", skip(self), fields(%session_id))]
  pub async fn new_session(&self, session_id: &str) -> AppResult<SessionSnapshot> {
    let mut sessions = self.sessions.write().await;
    let s = sessions.entry(session_id.to_string()).or_default();
    let epoch = s.epoch + 1;
    *s = Session { epoch, ..Session::default() };
    Ok(snapshot(s))
  }

  /// Jump straight to Viewing from a stored record, bypassing a fresh grading
  /// call. Images are not restorable; only the hasImages flag survived.
  #[instrument(level = "info", skip(self), fields(%session_id, %record_id))]
  pub async fn open_history(&self, session_id: &str, record_id: &str) -> AppResult<HistoryRecord> {
    let record = {
      let history = self.history.lock().await;
      history
        .list()
        .into_iter()
        .find(|r| r.id == record_id)
        .ok_or_else(|| AppError::UnknownRecord(record_id.to_string()))?
    };

    let mut sessions = self.sessions.write().await;
    let s = sessions.entry(session_id.to_string()).or_default();
    let epoch = s.epoch + 1;
    *s = Session {
      phase: Phase::Viewing,
      essay_type: record.essay_type,
      topic_text: record.topic_text.clone(),
      essay_text: record.essay_text.clone(),
      topic_image: None,
      essay_image: None,
      result: Some(record.result.clone()),
      active_record_id: Some(record.id.clone()),
      chat: vec![],
      epoch,
    };
    Ok(record)
  }

  pub async fn list_history(&self) -> Vec<HistoryRecord> {
    self.history.lock().await.list()
  }

  pub async fn delete_history(&self, id: &str) -> Vec<HistoryRecord> {
    self.history.lock().await.delete(id)
  }

  pub async fn session_snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
    self.sessions.read().await.get(session_id).map(snapshot)
  }
}
