//! Error taxonomy and the HTTP mapping for it.
//!
//! The variants mirror the failure classes of the grading flow: validation
//! (caught before any model call), a busy session, the grading call itself,
//! the follow-up chat call, and local history persistence. Persistence and
//! chat failures are conveniences failing, so they never abort a grading
//! result that was already obtained.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("missing input: {0}")]
  Validation(String),

  #[error("a grading request is already in flight for this session")]
  Busy,

  #[error("grading failed: {0}")]
  Grading(String),

  #[error("chat failed: {0}")]
  Chat(String),

  /// Persistence failures are logged and absorbed, never returned to a
  /// client; the variant names the taxonomy class.
  #[allow(dead_code)]
  #[error("history persistence failed: {0}")]
  Persistence(String),

  #[error("unknown history record: {0}")]
  UnknownRecord(String),

  #[error("no model configured (OPENAI_API_KEY not set)")]
  ModelUnavailable,
}

#[derive(Serialize)]
pub struct ErrorOut {
  pub code: &'static str,
  pub message: String,
}

impl AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
      Self::Busy => StatusCode::CONFLICT,
      Self::Grading(_) | Self::Chat(_) => StatusCode::BAD_GATEWAY,
      Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
      Self::UnknownRecord(_) => StatusCode::NOT_FOUND,
      Self::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
  }

  fn code(&self) -> &'static str {
    match self {
      Self::Validation(_) => "VALIDATION",
      Self::Busy => "BUSY",
      Self::Grading(_) => "GRADING",
      Self::Chat(_) => "CHAT",
      Self::Persistence(_) => "PERSISTENCE",
      Self::UnknownRecord(_) => "UNKNOWN_RECORD",
      Self::ModelUnavailable => "MODEL_UNAVAILABLE",
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match &self {
      Self::Grading(e) | Self::Chat(e) | Self::Persistence(e) => {
        tracing::error!(target: "redpen_backend", error = %e, code = self.code(), "request failed");
      }
      _ => {
        tracing::warn!(target: "redpen_backend", error = %self, code = self.code(), "request rejected");
      }
    }
    let body = ErrorOut { code: self.code(), message: self.to_string() };
    (self.status_code(), Json(body)).into_response()
  }
}

pub type AppResult<T> = Result<T, AppError>;
