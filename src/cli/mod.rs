//! Command-line interface for botbench.
//!
//! Provides the collect and assess commands over a shared question table.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
