//! Redpen · Essay Grading Backend
//!
//! - Axum HTTP API for grading standardized-test essays via a hosted LLM
//! - Bounded local history of past grading sessions (single JSON blob)
//! - Follow-up chat about a grading result
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                 : u16 (default 3000)
//!   OPENAI_API_KEY       : enables grading/chat if present
//!   OPENAI_BASE_URL      : default "https://api.openai.com/v1"
//!   OPENAI_GRADING_MODEL : default "gpt-4o"
//!   OPENAI_CHAT_MODEL    : default "gpt-4o-mini"
//!   AGENT_CONFIG_PATH    : path to TOML config (prompt/rubric overrides)
//!   HISTORY_PATH         : history blob path (default "./data/history.json")
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod config;
mod history;
mod state;
mod protocol;
mod logic;
mod openai;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (sessions, history store, model client, prompts).
  let state = Arc::new(AppState::from_env());

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "redpen_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
