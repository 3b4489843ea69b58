use crate::core::scene::Scene;
use crate::core::state::{BatchRun, ProgressSnapshot};
use crate::services::executor::JobExecutor;
use futures_util::{stream, StreamExt};
use log::info;

/// Receives every snapshot a run emits, in emission order.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: &ProgressSnapshot);
}

/// Discards snapshots.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&self, _snapshot: &ProgressSnapshot) {}
}

pub struct BatchOrchestrator {
    executor: JobExecutor,
}

impl BatchOrchestrator {
    pub fn new(executor: JobExecutor) -> Self {
        Self { executor }
    }

    /// Runs every scene with at most `max_workers` jobs in flight and folds
    /// completions into `batch` as they arrive.
    ///
    /// The loop below is the only writer of `batch`, so each completion is
    /// recorded and reported as one step.
    pub async fn run(
        &self,
        mut batch: BatchRun,
        scenes: &[Scene],
        max_workers: usize,
        max_attempts: u32,
        reporter: &dyn ProgressReporter,
    ) -> BatchRun {
        let max_workers = max_workers.max(1);
        info!(
            "Generating {} scenes with {} workers ({} attempts each)",
            scenes.len(),
            max_workers,
            max_attempts
        );
        reporter.report(&batch.snapshot(None));

        let executor = &self.executor;
        let mut completions = stream::iter(scenes)
            .map(|scene| executor.execute(scene, max_attempts))
            .buffer_unordered(max_workers);

        while let Some(result) = completions.next().await {
            let snapshot = batch.record(result);
            reporter.report(&snapshot);
        }

        info!(
            "Batch finished: {}/{} scenes succeeded",
            batch.ordered_successful_paths().len(),
            batch.total()
        );
        batch
    }
}
