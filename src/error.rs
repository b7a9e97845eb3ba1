//! Error types for botbench operations.
//!
//! Defines error types for the major subsystems:
//! - Input table loading and validation
//! - Bot invocation (subprocess transport)
//! - LLM scoring calls
//! - Shared CSV table persistence
//!
//! Input errors are fatal and abort the run before any work is dispatched.
//! Bot, scoring, and persistence errors are caught per row at the job
//! boundary and recorded in the run summary.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the input question table.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Input file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Input table is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Input table is empty: {0}")]
    EmptyTable(PathBuf),

    #[error("Unsupported input format '{extension}': only .csv is supported")]
    UnsupportedFormat { extension: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while invoking the external bot.
#[derive(Debug, Error)]
pub enum BotCallError {
    /// The call exceeded the hard per-call timeout. Not retried.
    #[error("Bot call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The bot signalled rate limiting. Retried with backoff.
    #[error("Bot rate limited: {0}")]
    RateLimited(String),

    /// The transport failed before a response was produced. Retried.
    #[error("Bot transport failed: {0}")]
    Transport(String),

    /// The bot process exited with a non-success status. Not retried.
    #[error("Bot exited with status {code}: {detail}")]
    Status { code: i32, detail: String },

    /// Rate limited on every attempt.
    #[error("Bot rate limited after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    /// Transport failed on every attempt.
    #[error("Bot transport failed after {attempts} attempts: {last}")]
    TransportExhausted { attempts: u32, last: String },
}

impl BotCallError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotCallError::RateLimited(_) | BotCallError::Transport(_)
        )
    }
}

/// Errors raised while scoring an answer with the LLM judge.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Missing API base URL: LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("Missing API key: LLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing model name: LLM_MODEL environment variable not set")]
    MissingModel,

    /// Network-level failure, including request timeouts. Retried.
    #[error("Scoring request failed: {0}")]
    Transport(String),

    /// HTTP 429 from the endpoint. Retried with backoff.
    #[error("Scoring endpoint rate limited: {0}")]
    RateLimited(String),

    /// Any other non-success HTTP status. Not retried.
    #[error("Scoring endpoint returned {code}: {body}")]
    Status { code: u16, body: String },

    /// The call succeeded but the response did not decode to an evaluation.
    #[error("Malformed scoring response: {0}")]
    MalformedResponse(String),

    #[error("Scoring endpoint rate limited after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("Scoring request failed after {attempts} attempts: {last}")]
    TransportExhausted { attempts: u32, last: String },
}

impl EvalError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EvalError::Transport(_) | EvalError::RateLimited(_))
    }
}

/// Errors raised by the shared CSV table.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Row index {index} out of bounds for table of {len} rows")]
    RowOutOfBounds { index: usize, len: usize },

    #[error("Failed to persist table: {0}")]
    Persist(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_error_transience() {
        assert!(BotCallError::RateLimited("busy".into()).is_transient());
        assert!(BotCallError::Transport("broken pipe".into()).is_transient());
        assert!(!BotCallError::Timeout { seconds: 60 }.is_transient());
        assert!(!BotCallError::Status {
            code: 1,
            detail: "boom".into()
        }
        .is_transient());
    }

    #[test]
    fn test_eval_error_transience() {
        assert!(EvalError::RateLimited("429".into()).is_transient());
        assert!(EvalError::Transport("connection reset".into()).is_transient());
        assert!(!EvalError::Status {
            code: 400,
            body: "bad request".into()
        }
        .is_transient());
        assert!(!EvalError::MalformedResponse("not json".into()).is_transient());
    }

    #[test]
    fn test_missing_columns_display() {
        let err = InputError::MissingColumns(vec![
            "question_id".to_string(),
            "question_text".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("question_id"));
        assert!(msg.contains("question_text"));
    }
}
