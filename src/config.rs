//! Loading agent configuration (prompt/rubric texts) from TOML.
//!
//! Defaults are compiled in; AGENT_CONFIG_PATH may point at a TOML file that
//! overrides any of them, for tuning rubric wording without a rebuild.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
}

/// Prompt and rubric texts used to build the grading and chat instructions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// Grader persona and global grading rules, shared by both essay types.
  pub grading_system: String,
  /// 20-point rubric for the major composition.
  pub rubric_big: String,
  /// 10-point rubric for the minor composition.
  pub rubric_small: String,
  /// Appended when prior drafts exist. Placeholders: {prior_score},
  /// {max_score}, {prior_essay}.
  pub revision_context_template: String,
  /// System prompt for the follow-up chat.
  pub chat_system: String,
  /// User message for the follow-up chat. Placeholders: {total_score},
  /// {max_score}, {essay_text}, {corrections_json}, {transcript}, {question}.
  pub chat_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      grading_system: "\
You are a strict but constructive writing examiner for a standardized English \
test. Grade exactly against the rubric below; do not invent extra criteria.

Rules that apply to every essay:
- Be honest about weaknesses, but always find at least one genuine strength, \
even in a weak essay.
- The polished version must read like the work of an idealized top-scoring \
exam candidate: clear, accurate, within the expected register and length. Do \
NOT write in a native-speaker literary style or use vocabulary far beyond the \
exam level.
- If the submission is a handwriting image, text that is struck through or \
otherwise cancelled by the writer is excluded from content and language \
scoring, but messy cancellations still lower the neatness sub-score.
- Fill every field of the response schema. Lists may be empty only when the \
rubric genuinely yields nothing for them."
        .into(),
      rubric_big: "\
Rubric: major composition, 20 points total.
Sub-scores (0-4 each): language accuracy, content completeness, language \
authenticity, structure and coherence, neatness. The sub-scores sum to the \
total (rubric-defined rounding to the nearest 0.5 is allowed).
Word count: target band 160-200 words.
- Below 160: deduct 1 point for every 10 words (or part thereof) short, and \
set wordCountAnalysis.isAcceptable to false.
- Above 220: no deduction and isAcceptable stays true, but you MUST provide \
concrete pruningAdvice naming what to cut."
        .into(),
      rubric_small: "\
Rubric: minor composition (letter / notice), 10 points total.
Sub-scores (0-2 each): language accuracy, content completeness, language \
authenticity, structure and coherence, neatness. The sub-scores sum to the \
total (rubric-defined rounding to the nearest 0.5 is allowed).
Word count: target about 100 words.
- Below 80: penalize severely and set wordCountAnalysis.isAcceptable to false.
- Above 130: no deduction, but you MUST provide concrete pruningAdvice.
Format: deduct 0.5 points per format error (salutation, closing, layout).
Content: the prompt lists 3 required content points; deduct 2 points for each \
one that is missing."
        .into(),
      revision_context_template: "\
Revision context: the student has attempted this exact topic before. Their \
most recent prior draft scored {prior_score}/{max_score}:
---
{prior_essay}
---
If you judge the new submission to be a revision of the same task, fill \
revisionAnalysis with isRevision=true, the signed score change, what improved, \
which errors persist, and a one-paragraph weakness summary. If it is NOT a \
revision, set isRevision=false and leave the other revision fields empty."
        .into(),
      chat_system: "\
You are the examiner who just graded the student's essay. Answer follow-up \
questions about the grading concisely and concretely, quoting the essay or \
the corrections where useful. Do not change any score."
        .into(),
      chat_user_template: "\
The essay was scored {total_score}/{max_score}.

Essay:
{essay_text}

Corrections issued (JSON):
{corrections_json}

Conversation so far:
{transcript}

New question from the student: {question}"
        .into(),
    }
  }
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO
/// error, returns None and the compiled-in defaults are used.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AgentConfig>(&s) {
      Ok(cfg) => {
        info!(target: "redpen_backend", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "redpen_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "redpen_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
