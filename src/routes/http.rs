//! HTTP endpoint handlers. Thin wrappers that forward to the session
//! controller in `state`; each is instrumented and logs basic result info.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::protocol::*;
use crate::state::{AppState, SubmitInput};

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
  Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state, body),
             fields(essay_type = ?body.essay_type, topic_len = body.topic_text.len(),
                    essay_len = body.essay_text.len(),
                    has_images = body.topic_image.is_some() || body.essay_image.is_some()))]
pub async fn http_post_grade(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SubmitIn>,
) -> AppResult<Json<GradeOut>> {
  let session_id = body.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
  let input = SubmitInput {
    essay_type: body.essay_type,
    topic_text: body.topic_text,
    topic_image: body.topic_image,
    essay_text: body.essay_text,
    essay_image: body.essay_image,
  };
  let outcome = state.submit(&session_id, input).await?;
  info!(target: "grading", %session_id, total = outcome.result.total_score,
        saved = outcome.record_id.is_some(), "HTTP grade served");
  Ok(Json(GradeOut {
    session_id,
    record_id: outcome.record_id,
    result: outcome.result,
  }))
}

#[instrument(level = "info", skip(state, body), fields(%body.session_id, message_len = body.message.len()))]
pub async fn http_post_chat(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ChatIn>,
) -> AppResult<Json<ChatOut>> {
  let reply = state.chat(&body.session_id, &body.message).await?;
  Ok(Json(ChatOut { reply }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_history(State(state): State<Arc<AppState>>) -> Json<HistoryOut> {
  let records = state.list_history().await;
  info!(target: "history", count = records.len(), "HTTP history listed");
  Json(HistoryOut { records })
}

#[instrument(level = "info", skip(state, body), fields(%body.id))]
pub async fn http_post_history_delete(
  State(state): State<Arc<AppState>>,
  Json(body): Json<HistoryDeleteIn>,
) -> Json<HistoryOut> {
  let records = state.delete_history(&body.id).await;
  info!(target: "history", id = %body.id, remaining = records.len(), "HTTP history delete");
  Json(HistoryOut { records })
}

#[instrument(level = "info", skip(state, body), fields(%body.session_id, %body.record_id))]
pub async fn http_post_history_open(
  State(state): State<Arc<AppState>>,
  Json(body): Json<HistoryOpenIn>,
) -> AppResult<Json<GradeOut>> {
  let record = state.open_history(&body.session_id, &body.record_id).await?;
  info!(target: "history", id = %record.id, "HTTP history record opened");
  Ok(Json(GradeOut {
    session_id: body.session_id,
    record_id: Some(record.id),
    result: record.result,
  }))
}

/// Current session state, for a tab that reloads and wants to re-render.
#[instrument(level = "info", skip(state, body), fields(%body.session_id))]
pub async fn http_post_session_get(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SessionIn>,
) -> AppResult<Json<SessionOut>> {
  let snap = state
    .session_snapshot(&body.session_id)
    .await
    .ok_or_else(|| AppError::Validation("unknown session".into()))?;
  Ok(Json(SessionOut::from_snapshot(body.session_id, snap)))
}

#[instrument(level = "info", skip(state, body), fields(%body.session_id))]
pub async fn http_post_session_edit(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SessionIn>,
) -> AppResult<Json<SessionOut>> {
  let snap = state.edit(&body.session_id).await?;
  Ok(Json(SessionOut::from_snapshot(body.session_id, snap)))
}

#[instrument(level = "info", skip(state, body), fields(%body.session_id))]
pub async fn http_post_session_new(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SessionIn>,
) -> AppResult<Json<SessionOut>> {
  let snap = state.new_session(&body.session_id).await?;
  Ok(Json(SessionOut::from_snapshot(body.session_id, snap)))
}
