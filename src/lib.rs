//! botbench: Batch QA collection and scoring for a conversational bot.
//!
//! This library drives an external bot through a table of questions,
//! parses the free-form transcripts into typed segments, persists them
//! incrementally to a shared CSV table, and scores the text answers
//! with an LLM judge.

// Core modules
pub mod bot;
pub mod cli;
pub mod error;
pub mod eval;
pub mod input;
pub mod pipeline;
pub mod store;
pub mod transcript;
pub mod utils;

// Re-export commonly used error types
pub use error::{BotCallError, EvalError, InputError, StoreError};
