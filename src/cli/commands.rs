//! CLI command definitions for botbench.
//!
//! Two commands over the same CSV table: `collect` asks the bot every
//! question from an input table and persists the parsed transcript
//! segments, `assess` scores the persisted answers with an LLM judge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::bot::{BotClient, NodeBotProcess, DEFAULT_CALL_TIMEOUT};
use crate::eval::EvalClient;
use crate::input::read_input_table;
use crate::pipeline::{AssessRunner, CollectRunner, DEFAULT_WORKERS};
use crate::store::CsvTable;

/// Default Node driver script for the bot transport.
const DEFAULT_BOT_SCRIPT: &str = "coze-bot-core.js";

/// Batch QA collection and scoring for a conversational bot.
#[derive(Parser)]
#[command(name = "botbench")]
#[command(about = "Collect bot transcripts for a question table and score the answers")]
#[command(version)]
#[command(
    long_about = "botbench drives a conversational bot through a CSV question table, \
parses each transcript into typed segments, and incrementally appends them to a \
results table. A second pass scores the text answers with an LLM judge.\n\n\
Example usage:\n  botbench collect --input questions.csv\n  botbench assess --table data/results_20260831_120000.csv"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Ask the bot every question in the input table and persist segments.
    Collect(CollectArgs),

    /// Score persisted text answers that have no evaluation yet.
    Assess(AssessArgs),
}

/// Collection phase arguments.
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// Input question table (CSV with question_id, question_type, question_text).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output results table. Defaults to data/results_<timestamp>.csv.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Node driver script invoked once per question.
    #[arg(long, default_value = DEFAULT_BOT_SCRIPT)]
    pub bot_script: PathBuf,

    /// Hard timeout for one bot call, in seconds.
    #[arg(long, default_value_t = DEFAULT_CALL_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Maximum questions in flight at once.
    #[arg(short, long, env = "COLLECT_THREADS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Skip the start-of-job stagger delay.
    #[arg(long)]
    pub no_stagger: bool,
}

/// Assessment phase arguments.
#[derive(Parser, Debug)]
pub struct AssessArgs {
    /// Results table produced by the collect command.
    #[arg(short, long)]
    pub table: PathBuf,

    /// Maximum scoring calls in flight at once.
    #[arg(short, long, env = "ASSESS_THREADS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Skip the start-of-job stagger delay.
    #[arg(long)]
    pub no_stagger: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before
/// running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Collect(args) => run_collect_command(args).await,
        Commands::Assess(args) => run_assess_command(args).await,
    }
}

/// Timestamped default output path, one fresh table per run.
fn default_output_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from("data").join(format!("results_{stamp}.csv"))
}

async fn run_collect_command(args: CollectArgs) -> anyhow::Result<()> {
    let rows = read_input_table(&args.input)?;
    let output = args.output.unwrap_or_else(default_output_path);

    let transport = NodeBotProcess::new(
        args.bot_script.clone(),
        Duration::from_secs(args.timeout_secs.max(1)),
    );
    let bot = Arc::new(BotClient::new(transport));
    let store = Arc::new(CsvTable::new(output.clone()));

    let runner = CollectRunner::new(bot, store);
    let summary = runner
        .run(rows, args.workers.max(1), !args.no_stagger)
        .await?;

    info!(
        table = %output.display(),
        succeeded = summary.succeeded,
        failed = summary.failed,
        segments = summary.records,
        "Collection complete"
    );
    if summary.failed > 0 {
        anyhow::bail!(
            "{} of {} questions failed, see the log above",
            summary.failed,
            summary.total
        );
    }
    Ok(())
}

async fn run_assess_command(args: AssessArgs) -> anyhow::Result<()> {
    if !args.table.exists() {
        anyhow::bail!("Results table not found: {}", args.table.display());
    }
    // Credentials are checked up front so a misconfigured run fails
    // before the first row is dispatched.
    let client = Arc::new(EvalClient::from_env()?);
    let store = Arc::new(CsvTable::new(args.table.clone()));

    let runner = AssessRunner::new(client, store);
    let summary = runner.run(args.workers.max(1), !args.no_stagger).await?;

    info!(
        table = %args.table.display(),
        scored = summary.succeeded,
        failed = summary.failed,
        "Assessment complete"
    );
    if summary.failed > 0 {
        anyhow::bail!(
            "{} of {} answers failed to score, see the log above",
            summary.failed,
            summary.total
        );
    }
    Ok(())
}
