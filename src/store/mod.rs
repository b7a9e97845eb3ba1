//! Incremental CSV result store.
//!
//! Collection appends one row per transcript segment; assessment later
//! upgrades the table in place with six evaluation columns. Both phases
//! run under worker concurrency, so every file touch goes through one
//! async mutex: appends lock-write-flush, row updates rewrite the whole
//! file through a temp file in the same directory and rename it over the
//! original so readers never observe a half-written table.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::eval::Evaluation;
use crate::transcript::Segment;

/// Column order for a freshly collected table.
pub const RESULT_HEADERS: [&str; 10] = [
    "question_id",
    "question_type",
    "question_text",
    "context",
    "chatid",
    "block_type",
    "block_subtype",
    "block_result",
    "block_start",
    "block_end",
];

/// Column order after assessment has upgraded the table.
pub const EVAL_HEADERS: [&str; 16] = [
    "question_id",
    "question_type",
    "question_text",
    "context",
    "chatid",
    "block_type",
    "block_subtype",
    "block_result",
    "block_start",
    "block_end",
    "最终准确率_分数",
    "最终准确率_理由",
    "专业度_分数",
    "专业度_理由",
    "语气合理_分数",
    "语气合理_理由",
];

/// Subkind marking a plain text answer, the only scorable segment kind.
pub const TEXT_REPLY_SUBKIND: &str = "文本回复";

/// One persisted transcript segment with its question provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRow {
    pub question_id: String,
    pub question_type: String,
    pub question_text: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub chatid: String,
    pub block_type: String,
    pub block_subtype: String,
    pub block_result: String,
    pub block_start: f64,
    pub block_end: f64,
}

impl ResultRow {
    /// Build a row from a parsed segment. A zero end time means the bot
    /// never reported one, so it collapses to the start time.
    pub fn from_segment(
        question_id: &str,
        question_type: &str,
        question_text: &str,
        context: &str,
        chat_id: &str,
        segment: &Segment,
    ) -> Self {
        let block_end = if segment.end == 0.0 {
            segment.start
        } else {
            segment.end
        };
        Self {
            question_id: question_id.to_string(),
            question_type: question_type.to_string(),
            question_text: question_text.to_string(),
            context: context.to_string(),
            chatid: chat_id.to_string(),
            block_type: segment.kind.clone(),
            block_subtype: segment.subkind.clone(),
            block_result: segment.content.clone(),
            block_start: segment.start,
            block_end,
        }
    }
}

/// A [`ResultRow`] plus the six evaluation columns.
///
/// The csv crate cannot flatten nested structs, so the base columns are
/// repeated here. Tables written before assessment lack the evaluation
/// columns entirely, hence the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalRow {
    pub question_id: String,
    pub question_type: String,
    pub question_text: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub chatid: String,
    pub block_type: String,
    pub block_subtype: String,
    pub block_result: String,
    pub block_start: f64,
    pub block_end: f64,
    #[serde(rename = "最终准确率_分数", default)]
    pub accuracy_score: Option<u32>,
    #[serde(rename = "最终准确率_理由", default)]
    pub accuracy_rationale: Option<String>,
    #[serde(rename = "专业度_分数", default)]
    pub professionalism_score: Option<u32>,
    #[serde(rename = "专业度_理由", default)]
    pub professionalism_rationale: Option<String>,
    #[serde(rename = "语气合理_分数", default)]
    pub tone_score: Option<u32>,
    #[serde(rename = "语气合理_理由", default)]
    pub tone_rationale: Option<String>,
}

impl EvalRow {
    /// Whether this row is the kind of segment assessment scores at all.
    pub fn is_scorable_answer(&self) -> bool {
        self.block_type == "answer" && self.block_subtype == TEXT_REPLY_SUBKIND
    }

    /// All six evaluation fields are present.
    pub fn is_fully_evaluated(&self) -> bool {
        self.accuracy_score.is_some()
            && self.accuracy_rationale.is_some()
            && self.professionalism_score.is_some()
            && self.professionalism_rationale.is_some()
            && self.tone_score.is_some()
            && self.tone_rationale.is_some()
    }

    /// Scorable and not yet (fully) evaluated. A row with a partial
    /// verdict is re-scored rather than trusted.
    pub fn needs_evaluation(&self) -> bool {
        self.is_scorable_answer() && !self.is_fully_evaluated()
    }

    /// Commit a verdict into this row. All six fields are written
    /// together so a row is never left half-scored.
    pub fn apply_evaluation(&mut self, evaluation: &Evaluation) {
        self.accuracy_score = Some(evaluation.accuracy.score);
        self.accuracy_rationale = Some(evaluation.accuracy.rationale.clone());
        self.professionalism_score = Some(evaluation.professionalism.score);
        self.professionalism_rationale = Some(evaluation.professionalism.rationale.clone());
        self.tone_score = Some(evaluation.tone.score);
        self.tone_rationale = Some(evaluation.tone.rationale.clone());
    }
}

/// Thread-safe CSV table shared by all workers of a run.
pub struct CsvTable {
    path: PathBuf,
    gate: Mutex<()>,
}

impl CsvTable {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            gate: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with the collection header row if it does not
    /// already exist. Existing tables are left untouched so a run can
    /// resume into them.
    pub async fn create_if_missing(&self) -> Result<(), StoreError> {
        let _guard = self.gate.lock().await;
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(RESULT_HEADERS)?;
        writer.flush()?;
        Ok(())
    }

    /// Append rows for one question. The whole batch is serialized first
    /// and written under the lock in one system write, so rows from
    /// concurrent questions interleave at question granularity only.
    pub async fn append(&self, rows: &[ResultRow]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buffer);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }

        let _guard = self.gate.lock().await;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&buffer)?;
        file.flush()?;
        Ok(())
    }

    /// Load the full table. Works on both the 10-column collection schema
    /// and the 16-column evaluated schema.
    pub async fn load(&self) -> Result<Vec<EvalRow>, StoreError> {
        let _guard = self.gate.lock().await;
        self.load_locked()
    }

    fn load_locked(&self) -> Result<Vec<EvalRow>, StoreError> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            rows.push(record?);
        }
        Ok(rows)
    }

    /// Write one evaluation verdict into the row at `index`, upgrading the
    /// table to the 16-column schema. The rewrite goes through a temp file
    /// in the target directory followed by an atomic rename.
    pub async fn update_row(
        &self,
        index: usize,
        evaluation: &Evaluation,
    ) -> Result<(), StoreError> {
        let _guard = self.gate.lock().await;

        let mut rows = self.load_locked()?;
        let len = rows.len();
        let row = rows
            .get_mut(index)
            .ok_or(StoreError::RowOutOfBounds { index, len })?;
        row.apply_evaluation(evaluation);

        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file());
            writer.write_record(EVAL_HEADERS)?;
            for row in &rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::eval::DimensionScore;

    fn sample_row(id: &str, kind: &str, subkind: &str) -> ResultRow {
        ResultRow {
            question_id: id.to_string(),
            question_type: "faq".to_string(),
            question_text: "开馆时间".to_string(),
            context: String::new(),
            chatid: "chat-1".to_string(),
            block_type: kind.to_string(),
            block_subtype: subkind.to_string(),
            block_result: "每天九点开馆".to_string(),
            block_start: 0.5,
            block_end: 1.2,
        }
    }

    fn sample_evaluation() -> Evaluation {
        Evaluation {
            accuracy: DimensionScore {
                score: 90,
                rationale: "准确".to_string(),
            },
            professionalism: DimensionScore {
                score: 85,
                rationale: "专业".to_string(),
            },
            tone: DimensionScore {
                score: 95,
                rationale: "友好".to_string(),
            },
        }
    }

    #[test]
    fn test_from_segment_zero_end_collapses_to_start() {
        let segment = Segment {
            kind: "answer".to_string(),
            subkind: TEXT_REPLY_SUBKIND.to_string(),
            content: "hi".to_string(),
            start: 0.7,
            end: 0.0,
        };
        let row = ResultRow::from_segment("q1", "faq", "text", "", "chat", &segment);
        assert_eq!(row.block_end, 0.7);
    }

    #[tokio::test]
    async fn test_append_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let table = CsvTable::new(dir.path().join("results.csv"));
        table.create_if_missing().await.unwrap();

        table
            .append(&[
                sample_row("q1", "answer", TEXT_REPLY_SUBKIND),
                sample_row("q1", "follow_up", "文本回复"),
            ])
            .await
            .unwrap();

        let rows = table.load().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].question_id, "q1");
        assert_eq!(rows[0].block_result, "每天九点开馆");
        assert_eq!(rows[0].accuracy_score, None);
        assert!(rows[0].needs_evaluation());
        assert!(!rows[1].needs_evaluation());
    }

    #[tokio::test]
    async fn test_create_if_missing_preserves_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = CsvTable::new(dir.path().join("results.csv"));
        table.create_if_missing().await.unwrap();
        table
            .append(&[sample_row("q1", "answer", TEXT_REPLY_SUBKIND)])
            .await
            .unwrap();

        table.create_if_missing().await.unwrap();
        assert_eq!(table.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_row_upgrades_schema() {
        let dir = tempfile::tempdir().unwrap();
        let table = CsvTable::new(dir.path().join("results.csv"));
        table.create_if_missing().await.unwrap();
        table
            .append(&[
                sample_row("q1", "answer", TEXT_REPLY_SUBKIND),
                sample_row("q2", "answer", TEXT_REPLY_SUBKIND),
            ])
            .await
            .unwrap();

        table.update_row(1, &sample_evaluation()).await.unwrap();

        let rows = table.load().await.unwrap();
        assert_eq!(rows[0].accuracy_score, None);
        assert_eq!(rows[1].accuracy_score, Some(90));
        assert_eq!(rows[1].tone_rationale.as_deref(), Some("友好"));
        assert!(rows[1].is_fully_evaluated());
        assert!(!rows[1].needs_evaluation());
    }

    #[tokio::test]
    async fn test_update_row_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let table = CsvTable::new(dir.path().join("results.csv"));
        table.create_if_missing().await.unwrap();
        table
            .append(&[sample_row("q1", "answer", TEXT_REPLY_SUBKIND)])
            .await
            .unwrap();

        let err = table.update_row(5, &sample_evaluation()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::RowOutOfBounds { index: 5, len: 1 }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(CsvTable::new(dir.path().join("results.csv")));
        table.create_if_missing().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("q{i}");
                table
                    .append(&[sample_row(&id, "answer", TEXT_REPLY_SUBKIND)])
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rows = table.load().await.unwrap();
        assert_eq!(rows.len(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_updates_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(CsvTable::new(dir.path().join("results.csv")));
        table.create_if_missing().await.unwrap();
        let rows: Vec<ResultRow> = (0..4)
            .map(|i| sample_row(&format!("q{i}"), "answer", TEXT_REPLY_SUBKIND))
            .collect();
        table.append(&rows).await.unwrap();

        let mut handles = Vec::new();
        for index in 0..4 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                table.update_row(index, &sample_evaluation()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rows = table.load().await.unwrap();
        assert!(rows.iter().all(|r| r.is_fully_evaluated()));
    }

    #[tokio::test]
    async fn test_load_ten_column_table_defaults_evaluations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        let mut writer = csv::Writer::from_path(&path).unwrap();
        writer.write_record(RESULT_HEADERS).unwrap();
        writer
            .write_record([
                "q1", "faq", "问题", "", "chat", "answer", "文本回复", "回复", "0.5", "1.0",
            ])
            .unwrap();
        writer.flush().unwrap();
        drop(writer);

        let table = CsvTable::new(path);
        let rows = table.load().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].accuracy_score, None);
        assert!(rows[0].needs_evaluation());
    }
}
