//! Domain models: essay types, the structured grading result, history records,
//! and chat messages.
//!
//! Wire names are camelCase because the same serde shapes serve three places:
//! the declared response schema sent to the model, the HTTP API, and the
//! persisted history blob.

use serde::{Deserialize, Serialize};

/// Which writing task is being graded. Fixes the scoring scale and the rubric.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EssayType {
  /// Major composition, scored out of 20.
  Big,
  /// Minor composition (letter/notice), scored out of 10.
  Small,
}

impl Default for EssayType {
  fn default() -> Self { EssayType::Big }
}

impl EssayType {
  /// Fixed maximum total score for the type.
  pub fn max_score(self) -> f32 {
    match self {
      EssayType::Big => 20.0,
      EssayType::Small => 10.0,
    }
  }

  /// Per-dimension cap; the five sub-scores sum to `max_score`.
  pub fn dimension_max(self) -> f32 {
    self.max_score() / 5.0
  }
}

/// Five rubric dimensions, each bounded by `EssayType::dimension_max`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
  pub language_accuracy: f32,
  pub content_completeness: f32,
  pub language_authenticity: f32,
  pub structure_coherence: f32,
  pub neatness: f32,
}

/// The model's judgement of essay length against the rubric band.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WordCountAnalysis {
  pub count: u32,
  pub comment: String,
  pub is_acceptable: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pruning_advice: Option<String>,
}

/// Objective-error fix (wrong -> right).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Correction {
  pub original: String,
  pub correction: String,
  pub explanation: String,
  #[serde(rename = "type")]
  pub kind: CorrectionKind,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
  Grammar,
  Spelling,
  Vocabulary,
  Structure,
}

/// Stylistic upgrade (acceptable -> better), distinct from a `Correction`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Improvement {
  pub original: String,
  pub improved: String,
  pub reason: String,
  #[serde(rename = "type")]
  pub kind: ImprovementKind,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementKind {
  Vocabulary,
  SentenceStructure,
}

/// Generated practice item targeting a weakness found in the essay.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Exercise {
  pub question: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<String>>,
  pub answer: String,
  pub explanation: String,
}

/// Comparison against the most recent prior draft of the same topic.
///
/// Modeled as a tagged variant so "meaningful only when the model judged the
/// submission to be a revision" is explicit at the type level. On the wire
/// (model response, HTTP, history blob) it is the flat
/// `{isRevision, scoreChange, ...}` object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(from = "RevisionWire", into = "RevisionWire")]
pub enum RevisionAnalysis {
  NoRevision,
  Revision(RevisionDetail),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RevisionDetail {
  /// Signed delta as text, e.g. "+2.5".
  pub score_change: String,
  pub improvements: Vec<String>,
  pub persistent_errors: Vec<String>,
  pub weakness_summary: String,
}

impl Default for RevisionAnalysis {
  fn default() -> Self { RevisionAnalysis::NoRevision }
}

/// Flat wire form of `RevisionAnalysis`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionWire {
  #[serde(default)]
  pub is_revision: bool,
  #[serde(default)]
  pub score_change: String,
  #[serde(default)]
  pub improvements: Vec<String>,
  #[serde(default)]
  pub persistent_errors: Vec<String>,
  #[serde(default)]
  pub weakness_summary: String,
}

impl From<RevisionWire> for RevisionAnalysis {
  fn from(w: RevisionWire) -> Self {
    if w.is_revision {
      RevisionAnalysis::Revision(RevisionDetail {
        score_change: w.score_change,
        improvements: w.improvements,
        persistent_errors: w.persistent_errors,
        weakness_summary: w.weakness_summary,
      })
    } else {
      RevisionAnalysis::NoRevision
    }
  }
}

impl From<RevisionAnalysis> for RevisionWire {
  fn from(r: RevisionAnalysis) -> Self {
    match r {
      RevisionAnalysis::NoRevision => RevisionWire {
        is_revision: false,
        score_change: String::new(),
        improvements: vec![],
        persistent_errors: vec![],
        weakness_summary: String::new(),
      },
      RevisionAnalysis::Revision(d) => RevisionWire {
        is_revision: true,
        score_change: d.score_change,
        improvements: d.improvements,
        persistent_errors: d.persistent_errors,
        weakness_summary: d.weakness_summary,
      },
    }
  }
}

/// The full structured grading response. Every field except `pruningAdvice`,
/// `options` and `revisionAnalysis` is required; a payload missing one is
/// rejected at decode time rather than patched up locally.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
  pub total_score: f32,
  pub max_score: f32,
  pub score_breakdown: ScoreBreakdown,
  pub topic_analysis: String,
  pub word_count_analysis: WordCountAnalysis,
  pub outline: String,
  pub bright_spots: Vec<String>,
  pub suggestions: Vec<String>,
  pub corrections: Vec<Correction>,
  pub improvements: Vec<Improvement>,
  pub polished_version: String,
  pub exercises: Vec<Exercise>,
  #[serde(default)]
  pub revision_analysis: RevisionAnalysis,
}

/// One past grading session. Immutable once created; only deleted, never
/// edited. Raw image bytes are never stored, only the `hasImages` flag.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
  pub id: String,
  pub timestamp: u64,
  pub essay_type: EssayType,
  pub topic_text: String,
  pub essay_text: String,
  pub result: GradingResult,
  pub has_images: bool,
}

/// Follow-up chat message, scoped to one result-viewing session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
  pub role: ChatRole,
  pub content: String,
  pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
  User,
  Assistant,
}

/// Base64 image payload plus its mime type, as uploaded or pasted.
/// Request-scoped only; never persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageAttachment {
  pub mime: String,
  pub data: String,
}

/// One ordered part of the grading call content: plain text or an inlined
/// image. Mirrors the external call contract.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentPart {
  Text(String),
  InlineImage { mime: String, data: String },
}
