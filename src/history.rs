//! History Store: a capped, newest-first list of past grading sessions behind
//! a pluggable blob backend.
//!
//! The whole store is one JSON blob (an array of records). Reads never fail:
//! a missing or corrupt blob yields an empty list and a log line. Writes are
//! fallible; on a write failure the attempted change is abandoned and the
//! caller gets the last successfully persisted state back, so a full disk can
//! never take the grading flow down with it.

use std::fs;
use std::path::PathBuf;

use tracing::{error, warn};

use crate::domain::HistoryRecord;

/// Hard cap on retained records. Oldest evicted first, unconditionally.
pub const HISTORY_CAP: usize = 20;

/// Storage port for the single serialized history blob.
pub trait BlobStorage: Send {
  /// `Ok(None)` means "nothing stored yet", which is not an error.
  fn read(&self) -> Result<Option<String>, String>;
  fn write(&mut self, blob: &str) -> Result<(), String>;
}

/// File-backed blob (one JSON file). The production backend.
pub struct FileBlob {
  path: PathBuf,
}

impl FileBlob {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Path from HISTORY_PATH env or the default `./data/history.json`.
  pub fn from_env() -> Self {
    let path = std::env::var("HISTORY_PATH").unwrap_or_else(|_| "./data/history.json".into());
    Self::new(path)
  }
}

impl BlobStorage for FileBlob {
  fn read(&self) -> Result<Option<String>, String> {
    match fs::read_to_string(&self.path) {
      Ok(s) => Ok(Some(s)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.to_string()),
    }
  }

  fn write(&mut self, blob: &str) -> Result<(), String> {
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    fs::write(&self.path, blob).map_err(|e| e.to_string())
  }
}

/// In-memory blob. Used in tests and usable as a throwaway backend.
#[derive(Default)]
pub struct MemoryBlob {
  blob: Option<String>,
}

impl BlobStorage for MemoryBlob {
  fn read(&self) -> Result<Option<String>, String> {
    Ok(self.blob.clone())
  }

  fn write(&mut self, blob: &str) -> Result<(), String> {
    self.blob = Some(blob.to_string());
    Ok(())
  }
}

pub struct HistoryStore<B: BlobStorage> {
  backend: B,
}

impl<B: BlobStorage> HistoryStore<B> {
  pub fn new(backend: B) -> Self {
    Self { backend }
  }

  /// All records, newest first. Never raises: a corrupt or unreadable blob is
  /// logged and treated as empty.
  pub fn list(&self) -> Vec<HistoryRecord> {
    let blob = match self.backend.read() {
      Ok(Some(s)) => s,
      Ok(None) => return vec![],
      Err(e) => {
        error!(target: "history", error = %e, "History blob read failed; treating as empty");
        return vec![];
      }
    };
    match serde_json::from_str::<Vec<HistoryRecord>>(&blob) {
      Ok(records) => records,
      Err(e) => {
        warn!(target: "history", error = %e, "History blob corrupt; treating as empty");
        vec![]
      }
    }
  }

  /// Prepend `record`, truncate to the cap, persist. On a persistence failure
  /// the change is dropped and the last persisted state is returned instead;
  /// callers must not assume the returned list contains the new record.
  pub fn save(&mut self, record: HistoryRecord) -> Vec<HistoryRecord> {
    let mut records = self.list();
    records.insert(0, record);
    records.truncate(HISTORY_CAP);
    self.persist_or_fall_back(records)
  }

  /// Remove the record with `id` if present (absence is a no-op, not an
  /// error), persist, same failure fallback as `save`.
  pub fn delete(&mut self, id: &str) -> Vec<HistoryRecord> {
    let mut records = self.list();
    let before = records.len();
    records.retain(|r| r.id != id);
    if records.len() == before {
      return records;
    }
    self.persist_or_fall_back(records)
  }

  fn persist_or_fall_back(&mut self, records: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
    let blob = match serde_json::to_string(&records) {
      Ok(b) => b,
      Err(e) => {
        error!(target: "history", error = %e, "History serialization failed; keeping persisted state");
        return self.list();
      }
    };
    match self.backend.write(&blob) {
      Ok(()) => records,
      Err(e) => {
        error!(target: "history", error = %e, "History write failed; keeping persisted state");
        self.list()
      }
    }
  }
}

/// Mint a unique time-derived record id. Sequential saves within the same
/// millisecond bump forward until the id is free.
pub fn time_id(existing: &[HistoryRecord], now_ms: u64) -> String {
  let mut t = now_ms;
  while existing.iter().any(|r| r.id == t.to_string()) {
    t += 1;
  }
  t.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::*;

  fn sample_result() -> GradingResult {
    GradingResult {
      total_score: 15.5,
      max_score: 20.0,
      score_breakdown: ScoreBreakdown {
        language_accuracy: 3.0,
        content_completeness: 3.5,
        language_authenticity: 3.0,
        structure_coherence: 3.0,
        neatness: 3.0,
      },
      topic_analysis: "Argumentative essay on city life.".into(),
      word_count_analysis: WordCountAnalysis {
        count: 185,
        comment: "Within the target band.".into(),
        is_acceptable: true,
        pruning_advice: None,
      },
      outline: "Intro, two body paragraphs, conclusion.".into(),
      bright_spots: vec!["Clear thesis statement.".into()],
      suggestions: vec!["Vary sentence openings.".into()],
      corrections: vec![Correction {
        original: "more better".into(),
        correction: "better".into(),
        explanation: "double comparative".into(),
        kind: CorrectionKind::Grammar,
      }],
      improvements: vec![Improvement {
        original: "very big".into(),
        improved: "substantial".into(),
        reason: "precision".into(),
        kind: ImprovementKind::Vocabulary,
      }],
      polished_version: "City life offers ...".into(),
      exercises: vec![Exercise {
        question: "Choose the correct comparative: This essay is ___ than that one.".into(),
        options: Some(vec!["more better".into(), "better".into()]),
        answer: "better".into(),
        explanation: "comparatives are not doubled".into(),
      }],
      revision_analysis: RevisionAnalysis::Revision(RevisionDetail {
        score_change: "+1.0".into(),
        improvements: vec!["fewer spelling errors".into()],
        persistent_errors: vec!["article usage".into()],
        weakness_summary: "Articles remain the main weakness.".into(),
      }),
    }
  }

  fn record(id: u64) -> HistoryRecord {
    HistoryRecord {
      id: id.to_string(),
      timestamp: id,
      essay_type: EssayType::Big,
      topic_text: "Topic A".into(),
      essay_text: "Essay body.".into(),
      result: sample_result(),
      has_images: false,
    }
  }

  /// Blob that accepts nothing after construction, simulating quota errors.
  struct FailingBlob {
    blob: Option<String>,
  }

  impl BlobStorage for FailingBlob {
    fn read(&self) -> Result<Option<String>, String> {
      Ok(self.blob.clone())
    }
    fn write(&mut self, _blob: &str) -> Result<(), String> {
      Err("quota exceeded".into())
    }
  }

  #[test]
  fn save_caps_at_twenty_newest_first() {
    let mut store = HistoryStore::new(MemoryBlob::default());
    for i in 1..=25u64 {
      store.save(record(i));
    }
    let list = store.list();
    assert_eq!(list.len(), HISTORY_CAP);
    // Newest (25) first, oldest retained is 6.
    assert_eq!(list[0].id, "25");
    assert_eq!(list[19].id, "6");
  }

  #[test]
  fn delete_unknown_id_is_a_no_op() {
    let mut store = HistoryStore::new(MemoryBlob::default());
    store.save(record(1));
    store.save(record(2));
    let list = store.delete("does-not-exist");
    assert_eq!(list.len(), 2);
    assert_eq!(store.list().len(), 2);
  }

  #[test]
  fn delete_removes_matching_record() {
    let mut store = HistoryStore::new(MemoryBlob::default());
    store.save(record(1));
    store.save(record(2));
    let list = store.delete("1");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "2");
  }

  #[test]
  fn round_trip_is_lossless() {
    let mut store = HistoryStore::new(MemoryBlob::default());
    let original = record(42);
    store.save(original.clone());
    let listed = store.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], original);
  }

  #[test]
  fn corrupt_blob_reads_as_empty() {
    let mut blob = MemoryBlob::default();
    blob.write("not json at all").unwrap();
    let store = HistoryStore::new(blob);
    assert!(store.list().is_empty());
  }

  #[test]
  fn write_failure_falls_back_to_persisted_state() {
    // Seed a persisted state of one record, then make writes fail.
    let mut seed = MemoryBlob::default();
    let persisted = vec![record(1)];
    seed.write(&serde_json::to_string(&persisted).unwrap()).unwrap();
    let mut store = HistoryStore::new(FailingBlob { blob: seed.read().unwrap() });

    let after_save = store.save(record(2));
    assert_eq!(after_save.len(), 1);
    assert_eq!(after_save[0].id, "1");

    let after_delete = store.delete("1");
    assert_eq!(after_delete.len(), 1);
    assert_eq!(after_delete[0].id, "1");
  }

  #[test]
  fn file_blob_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    {
      let mut store = HistoryStore::new(FileBlob::new(&path));
      store.save(record(7));
    }
    let store = HistoryStore::new(FileBlob::new(&path));
    assert_eq!(store.list()[0].id, "7");
  }

  #[test]
  fn time_id_bumps_on_collision() {
    let existing = vec![record(1000), record(1001)];
    assert_eq!(time_id(&existing, 1000), "1002");
    assert_eq!(time_id(&existing, 999), "999");
  }
}
