// SPDX-License-Identifier: MPL-2.0

//! Bounded fan-out with per-item isolation.
//!
//! Inputs run in fixed-size batches; every task in a batch runs concurrently
//! and its result is kept as a [`TaskOutcome`]. A failed item is logged and
//! counted, never propagated, unless the error ends the whole run
//! (authentication or cancellation).

use crate::sync::SyncError;
use futures::future::join_all;
use std::future::Future;

/// Result of one fan-out task.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    /// What the task was working on, for logs.
    pub label: String,
    pub result: Result<T, SyncError>,
}

/// Success/failure counts over a set of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of<T>(outcomes: &[TaskOutcome<T>]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        Self {
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }
}

/// Sum of the item counts of successful tasks.
pub fn successful_items(outcomes: &[TaskOutcome<usize>]) -> u64 {
    outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .map(|&n| n as u64)
        .sum()
}

/// Run `task` over `inputs`, `batch_size` at a time.
///
/// `on_batch` is called after each batch with its 1-indexed number, the total
/// batch count, and that batch's summary. Returns the first escalating error,
/// after the batch that produced it has finished.
pub async fn run_batched<I, T, F, Fut, L>(
    inputs: &[I],
    batch_size: usize,
    label: L,
    task: F,
    on_batch: &(dyn Fn(usize, usize, BatchSummary) + Send + Sync),
) -> Result<Vec<TaskOutcome<T>>, SyncError>
where
    F: Fn(&I) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    L: Fn(&I) -> String,
{
    let batch_size = batch_size.max(1);
    let batches = inputs.len().div_ceil(batch_size);
    let mut outcomes = Vec::with_capacity(inputs.len());

    for (index, chunk) in inputs.chunks(batch_size).enumerate() {
        let results = join_all(chunk.iter().map(&task)).await;

        let mut batch: Vec<TaskOutcome<T>> = chunk
            .iter()
            .zip(results)
            .map(|(input, result)| TaskOutcome {
                label: label(input),
                result,
            })
            .collect();

        for outcome in &batch {
            if let Err(e) = &outcome.result {
                tracing::warn!(item = %outcome.label, error = %e, "item failed, skipping");
            }
        }

        on_batch(index + 1, batches, BatchSummary::of(&batch));

        let escalated = batch
            .iter()
            .position(|o| o.result.as_ref().is_err_and(SyncError::escalates));
        if let Some(pos) = escalated
            && let Err(e) = batch.swap_remove(pos).result
        {
            return Err(e.normalize());
        }

        outcomes.extend(batch);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atproto::ClientError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ignore_batches(_: usize, _: usize, _: BatchSummary) {}

    fn api_error(status: u16) -> SyncError {
        SyncError::Client(ClientError::Api {
            status,
            message: "boom".into(),
            error_code: None,
        })
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_counted() {
        let inputs: Vec<u32> = (1..=7).collect();
        let outcomes = run_batched(
            &inputs,
            3,
            |n| format!("item {n}"),
            |&n| async move {
                if n % 3 == 0 {
                    Err(api_error(500))
                } else {
                    Ok(n as usize)
                }
            },
            &ignore_batches,
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 7);
        let summary = BatchSummary::of(&outcomes);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 2);
        assert_eq!(successful_items(&outcomes), 1 + 2 + 4 + 5 + 7);
        assert_eq!(outcomes[2].label, "item 3");
    }

    #[tokio::test]
    async fn test_batches_bound_concurrency() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let seen = Mutex::new(Vec::new());
        let inputs: Vec<usize> = (0..25).collect();
        let (in_flight, peak) = (&in_flight, &peak);

        run_batched(
            &inputs,
            10,
            |n| n.to_string(),
            move |_| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(0usize)
            },
            &|batch, batches, summary| seen.lock().unwrap().push((batch, batches, summary)),
        )
        .await
        .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 10);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].0, 3);
        assert_eq!(seen[2].1, 3);
        assert_eq!(seen[2].2.succeeded, 5);
    }

    #[tokio::test]
    async fn test_auth_failure_escalates_after_batch() {
        let started = AtomicUsize::new(0);
        let inputs: Vec<u32> = (0..6).collect();

        let result = run_batched(
            &inputs,
            2,
            |n| n.to_string(),
            |&n| {
                started.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 1 {
                        Err(SyncError::Client(ClientError::Auth("expired token".into())))
                    } else {
                        Ok(0usize)
                    }
                }
            },
            &ignore_batches,
        )
        .await;

        assert!(matches!(result, Err(SyncError::Client(ClientError::Auth(_)))));
        assert_eq!(started.load(Ordering::SeqCst), 2, "later batches never start");
    }

    #[tokio::test]
    async fn test_ordinary_failures_keep_every_outcome_in_order() {
        let inputs: Vec<u32> = (0..5).collect();
        let outcomes = run_batched(
            &inputs,
            2,
            |n| format!("item {n}"),
            |&n| async move {
                if n % 2 == 1 {
                    Err(api_error(404))
                } else {
                    Ok(n as usize)
                }
            },
            &ignore_batches,
        )
        .await
        .unwrap();

        let labels: Vec<&str> = outcomes.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, ["item 0", "item 1", "item 2", "item 3", "item 4"]);
        assert!(outcomes[1].result.is_err());
        assert!(outcomes[3].result.is_err());
        assert_eq!(successful_items(&outcomes), 2 + 4);
    }

    #[tokio::test]
    async fn test_cancelled_item_stops_run() {
        let inputs = vec![1u32];
        let result = run_batched(
            &inputs,
            5,
            |n| n.to_string(),
            |_| async { Err::<usize, _>(SyncError::Client(ClientError::Cancelled)) },
            &ignore_batches,
        )
        .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_input_runs_no_batches() {
        let inputs: Vec<u32> = Vec::new();
        let outcomes = run_batched(
            &inputs,
            10,
            |n| n.to_string(),
            |_| async { Ok(1usize) },
            &|_, _, _| panic!("no batch expected"),
        )
        .await
        .unwrap();
        assert!(outcomes.is_empty());
    }
}
