//! Input question table loading and conversation-context decoding.
//!
//! The input is a CSV table with required columns `question_id`,
//! `question_type` and `question_text`, plus an optional `context` column
//! holding a serialized conversation prefix. Upstream producers serialize
//! that prefix inconsistently, so decoding runs an ordered chain of total
//! decoders and fails closed to "no context".

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Columns every input table must carry.
pub const REQUIRED_COLUMNS: [&str; 3] = ["question_id", "question_type", "question_text"];

/// One question to send to the bot. Immutable once read.
#[derive(Debug, Clone, Deserialize)]
pub struct InputRow {
    pub question_id: String,
    pub question_type: String,
    pub question_text: String,
    /// Serialized conversation prefix, decoded lazily via [`decode_context`].
    #[serde(default)]
    pub context: Option<String>,
}

/// Speaker of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Display name used when rendering history into the scoring prompt.
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "用户",
            Role::Assistant => "助手",
        }
    }
}

/// One turn of the conversation prefix. Turn order is semantically
/// significant and is preserved from the input table through the bot call
/// and into the scoring prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Read and validate the input table.
///
/// Fatal before dispatch: missing file, unsupported extension, missing
/// required columns, or an empty table.
pub fn read_input_table(path: &Path) -> Result<Vec<InputRow>, InputError> {
    if !path.exists() {
        return Err(InputError::FileNotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if extension != "csv" {
        return Err(InputError::UnsupportedFormat { extension });
    }

    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(InputError::MissingColumns(missing));
    }

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: InputRow = record?;
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(InputError::EmptyTable(path.to_path_buf()));
    }

    tracing::info!(
        path = %path.display(),
        rows = rows.len(),
        "Input table loaded"
    );
    Ok(rows)
}

/// Decode a serialized conversation prefix.
///
/// Tries, in order: a JSON array, a comma-joined object sequence without
/// enclosing brackets, and newline-delimited objects. First success wins;
/// undecodable input maps to `None` rather than an error.
pub fn decode_context(raw: &str) -> Option<Vec<ConversationTurn>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(turns) = serde_json::from_str::<Vec<ConversationTurn>>(trimmed) {
        return Some(turns);
    }

    let wrapped = format!("[{trimmed}]");
    if let Ok(turns) = serde_json::from_str::<Vec<ConversationTurn>>(&wrapped) {
        return Some(turns);
    }

    let lines: Result<Vec<ConversationTurn>, _> = trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect();
    match lines {
        Ok(turns) if !turns.is_empty() => Some(turns),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .expect("create temp file");
        file.write_all(content.as_bytes()).expect("write csv");
        file.flush().expect("flush csv");
        file
    }

    #[test]
    fn test_read_valid_table() {
        let file = write_csv(
            "question_id,question_type,question_text,context\n\
             q1,票务,开馆时间是几点？,\n\
             q2,展厅,机器人展区在哪里？,\"[{\"\"role\"\":\"\"user\"\",\"\"content\"\":\"\"你好\"\"}]\"\n",
        );
        let rows = read_input_table(file.path()).expect("read table");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].question_id, "q1");
        assert_eq!(rows[1].context.as_deref().map(|c| c.is_empty()), Some(false));
    }

    #[test]
    fn test_missing_columns_is_fatal() {
        let file = write_csv("question_id,text\nq1,hello\n");
        let err = read_input_table(file.path()).unwrap_err();
        match err {
            InputError::MissingColumns(cols) => {
                assert_eq!(cols, vec!["question_type", "question_text"]);
            }
            other => panic!("expected MissingColumns, got {other}"),
        }
    }

    #[test]
    fn test_empty_table_is_fatal() {
        let file = write_csv("question_id,question_type,question_text\n");
        assert!(matches!(
            read_input_table(file.path()),
            Err(InputError::EmptyTable(_))
        ));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        assert!(matches!(
            read_input_table(Path::new("does-not-exist.csv")),
            Err(InputError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new()
            .suffix(".xls")
            .tempfile()
            .expect("create temp file");
        assert!(matches!(
            read_input_table(file.path()),
            Err(InputError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_decode_json_array() {
        let turns = decode_context(
            r#"[{"role":"user","content":"你好"},{"role":"assistant","content":"您好！"}]"#,
        )
        .expect("decode array");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "您好！");
    }

    #[test]
    fn test_decode_bracketless_objects() {
        let turns = decode_context(
            r#"{"role":"user","content":"a"},{"role":"assistant","content":"b"}"#,
        )
        .expect("decode bracketless");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "a");
    }

    #[test]
    fn test_decode_newline_delimited() {
        let raw = "{\"role\":\"user\",\"content\":\"a\"}\n{\"role\":\"assistant\",\"content\":\"b\"}";
        let turns = decode_context(raw).expect("decode ndjson");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[test]
    fn test_decode_preserves_order() {
        let raw = r#"[{"role":"user","content":"1"},{"role":"assistant","content":"2"},{"role":"user","content":"3"}]"#;
        let turns = decode_context(raw).expect("decode");
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_decode_fails_closed() {
        assert!(decode_context("").is_none());
        assert!(decode_context("   ").is_none());
        assert!(decode_context("not json at all").is_none());
        assert!(decode_context("[{\"role\":").is_none());
    }

    #[test]
    fn test_turn_serialization_round_trip() {
        let turns = vec![
            ConversationTurn {
                role: Role::User,
                content: "问题".to_string(),
            },
            ConversationTurn {
                role: Role::Assistant,
                content: "回答".to_string(),
            },
        ];
        let json = serde_json::to_string(&turns).expect("serialize");
        assert!(json.contains("\"role\":\"user\""));
        let back: Vec<ConversationTurn> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, turns);
    }
}
