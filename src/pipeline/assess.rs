//! Assessment phase: score persisted answers in place.
//!
//! Loads the table once, selects rows that are scorable text answers and
//! not yet fully evaluated, and dispatches one scoring job per pending
//! row under the worker semaphore. Re-running over the same table is a
//! no-op for rows that already carry all six evaluation fields.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::eval::{build_eval_prompt, EvalClient};
use crate::input::decode_context;
use crate::store::{CsvTable, EvalRow};

use super::{stagger_delay, ProgressCounters, RowError, RunSummary};

pub struct AssessRunner {
    client: Arc<EvalClient>,
    store: Arc<CsvTable>,
}

impl AssessRunner {
    pub fn new(client: Arc<EvalClient>, store: Arc<CsvTable>) -> Self {
        Self { client, store }
    }

    /// Score every pending answer with at most `max_workers` in flight.
    pub async fn run(&self, max_workers: usize, stagger: bool) -> Result<RunSummary, RowError> {
        let rows = self.store.load().await?;
        let scorable = rows.iter().filter(|r| r.is_scorable_answer()).count();
        let evaluated = rows
            .iter()
            .filter(|r| r.is_scorable_answer() && r.is_fully_evaluated())
            .count();

        let pending: Vec<(usize, EvalRow)> = rows
            .into_iter()
            .enumerate()
            .filter(|(_, row)| row.needs_evaluation())
            .collect();
        let total = pending.len();

        tracing::info!(
            scorable,
            already_evaluated = evaluated,
            pending = total,
            max_workers,
            model = self.client.model(),
            table = %self.store.path().display(),
            "Starting assessment run"
        );
        if total == 0 {
            return Ok(RunSummary::default());
        }

        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let counters = ProgressCounters::new();

        let jobs = pending.into_iter().enumerate().map(|(job, (index, row))| {
            let semaphore = semaphore.clone();
            let counters = counters.clone();
            let client = self.client.clone();
            let store = self.store.clone();

            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    counters.record_failure();
                    return;
                };
                if stagger {
                    tokio::time::sleep(stagger_delay(job)).await;
                }

                match assess_one(&client, &store, index, &row).await {
                    Ok(()) => {
                        counters.record_success(1);
                        tracing::info!(
                            question_id = %row.question_id,
                            completed = counters.completed(),
                            total,
                            "Answer scored"
                        );
                    }
                    Err(err) => {
                        counters.record_failure();
                        tracing::warn!(
                            question_id = %row.question_id,
                            error = %err,
                            completed = counters.completed(),
                            total,
                            "Answer failed to score"
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
            "Assessment run finished"
        );
        Ok(summary)
    }
}

async fn assess_one(
    client: &EvalClient,
    store: &CsvTable,
    index: usize,
    row: &EvalRow,
) -> Result<(), RowError> {
    if row.block_result.trim().is_empty() {
        return Err(RowError::EmptyAnswer);
    }

    let turns = decode_context(&row.context);
    let prompt = build_eval_prompt(&row.question_text, &row.block_result, turns.as_deref());
    let evaluation = client.score(&prompt).await?;

    tracing::debug!(
        question_id = %row.question_id,
        accuracy = evaluation.accuracy.score,
        professionalism = evaluation.professionalism.score,
        tone = evaluation.tone.score,
        "Evaluation decoded"
    );

    store.update_row(index, &evaluation).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_answer_is_rejected_before_scoring() {
        let row = EvalRow {
            question_id: "q1".to_string(),
            question_type: "faq".to_string(),
            question_text: "问题".to_string(),
            context: String::new(),
            chatid: "chat".to_string(),
            block_type: "answer".to_string(),
            block_subtype: "文本回复".to_string(),
            block_result: "   ".to_string(),
            block_start: 0.0,
            block_end: 0.0,
            accuracy_score: None,
            accuracy_rationale: None,
            professionalism_score: None,
            professionalism_rationale: None,
            tone_score: None,
            tone_rationale: None,
        };
        assert!(row.needs_evaluation());
        assert!(row.block_result.trim().is_empty());
    }
}
