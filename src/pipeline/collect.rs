//! Collection phase: question in, transcript segments out.
//!
//! Each input row becomes one job: decode its conversation prefix, ask
//! the bot, parse the transcript, and append the meaningful segments to
//! the shared table. Jobs run under a semaphore with a fixed worker
//! budget and are independent; a failed row is logged and counted, the
//! rest of the run continues.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::bot::{BotClient, BotTransport};
use crate::input::{decode_context, InputRow};
use crate::store::{CsvTable, ResultRow};
use crate::transcript::parse_transcript;

use super::{stagger_delay, ProgressCounters, RowError, RunSummary};

pub struct CollectRunner<T: BotTransport> {
    bot: Arc<BotClient<T>>,
    store: Arc<CsvTable>,
}

impl<T: BotTransport + 'static> CollectRunner<T> {
    pub fn new(bot: Arc<BotClient<T>>, store: Arc<CsvTable>) -> Self {
        Self { bot, store }
    }

    /// Run all questions with at most `max_workers` in flight.
    pub async fn run(
        &self,
        rows: Vec<InputRow>,
        max_workers: usize,
        stagger: bool,
    ) -> Result<RunSummary, RowError> {
        let total = rows.len();
        tracing::info!(
            questions = total,
            max_workers,
            table = %self.store.path().display(),
            "Starting collection run"
        );

        self.store.create_if_missing().await?;

        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let counters = ProgressCounters::new();

        let jobs = rows.into_iter().enumerate().map(|(index, row)| {
            let semaphore = semaphore.clone();
            let counters = counters.clone();
            let bot = self.bot.clone();
            let store = self.store.clone();

            async move {
                // Closing the semaphore is not part of this design, so
                // acquisition cannot fail while the run is alive.
                let Ok(_permit) = semaphore.acquire().await else {
                    counters.record_failure();
                    return;
                };
                if stagger {
                    tokio::time::sleep(stagger_delay(index)).await;
                }

                match collect_one(&bot, &store, &row).await {
                    Ok(records) => {
                        counters.record_success(records);
                        tracing::info!(
                            question_id = %row.question_id,
                            segments = records,
                            completed = counters.completed(),
                            total,
                            "Question collected"
                        );
                    }
                    Err(err) => {
                        counters.record_failure();
                        tracing::warn!(
                            question_id = %row.question_id,
                            error = %err,
                            completed = counters.completed(),
                            total,
                            "Question failed"
                        );
                    }
                }
            }
        });

        join_all(jobs).await;

        let summary = counters.summary(total);
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            segments = summary.records,
            "Collection run finished"
        );
        Ok(summary)
    }
}

/// Handle one question end to end. Returns the number of rows appended.
async fn collect_one<T: BotTransport>(
    bot: &BotClient<T>,
    store: &CsvTable,
    row: &InputRow,
) -> Result<usize, RowError> {
    let raw_context = row.context.as_deref().unwrap_or("");
    let turns = decode_context(raw_context);
    let context_json = turns
        .as_ref()
        .and_then(|t| serde_json::to_string(t).ok());

    let transcript = bot
        .ask(&row.question_text, context_json.as_deref())
        .await?;
    let parsed = parse_transcript(&transcript);
    let chat_id = parsed.chat_id.as_deref().unwrap_or("");

    let result_rows: Vec<ResultRow> = parsed
        .segments
        .iter()
        .filter(|s| s.is_meaningful())
        .map(|segment| {
            ResultRow::from_segment(
                &row.question_id,
                &row.question_type,
                &row.question_text,
                raw_context,
                chat_id,
                segment,
            )
        })
        .collect();

    if result_rows.is_empty() {
        tracing::warn!(
            question_id = %row.question_id,
            "Transcript produced no meaningful segments"
        );
        return Ok(0);
    }

    let appended = result_rows.len();
    store.append(&result_rows).await?;
    Ok(appended)
}
