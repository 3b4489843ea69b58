use crate::core::workspace::WorkDir;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    Transient,
    Content,
    Io,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub enum JobOutcome {
    Success {
        image_path: PathBuf,
        prompt: String,
    },
    Failure {
        reason: String,
        retries_exhausted: bool,
        kind: FailureKind,
    },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct JobResult {
    pub scene_index: usize,
    pub attempts: u32,
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Success { .. })
    }

    pub fn image_path(&self) -> Option<&PathBuf> {
        match &self.outcome {
            JobOutcome::Success { image_path, .. } => Some(image_path),
            JobOutcome::Failure { .. } => None,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub enum SceneStatus {
    Queued,
    Succeeded { path: PathBuf },
    Failed { reason: String },
}

#[derive(Serialize, Clone, Debug)]
pub struct ProgressSnapshot {
    pub completed_count: usize,
    pub total: usize,
    pub statuses: Vec<SceneStatus>,
    pub ordered_successful_paths: Vec<PathBuf>,
    /// Scene whose completion produced this snapshot; `None` for the initial one.
    pub last_completed: Option<usize>,
}

impl ProgressSnapshot {
    pub fn is_final(&self) -> bool {
        self.completed_count == self.total
    }
}

/// Aggregate state of one batch invocation. Mutated only from the
/// orchestrator's aggregation loop.
pub struct BatchRun {
    work_dir: WorkDir,
    statuses: Vec<SceneStatus>,
    results: Vec<Option<JobResult>>,
    completed_count: usize,
}

impl BatchRun {
    pub fn new(work_dir: WorkDir, total: usize) -> Self {
        Self {
            work_dir,
            statuses: vec![SceneStatus::Queued; total],
            results: vec![None; total],
            completed_count: 0,
        }
    }

    pub fn work_dir(&self) -> &WorkDir {
        &self.work_dir
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    pub fn is_complete(&self) -> bool {
        self.completed_count == self.total()
    }

    /// Records one terminal result and returns the snapshot it produces.
    /// A result for an unknown or already-recorded scene is ignored.
    pub fn record(&mut self, result: JobResult) -> ProgressSnapshot {
        let index = result.scene_index;
        match self.results.get(index) {
            Some(None) => {}
            Some(Some(_)) => {
                log::warn!("Duplicate result for scene {} ignored", index);
                return self.snapshot(None);
            }
            None => {
                log::warn!("Result for unknown scene {} ignored", index);
                return self.snapshot(None);
            }
        }

        self.statuses[index] = match &result.outcome {
            JobOutcome::Success { image_path, .. } => SceneStatus::Succeeded {
                path: image_path.clone(),
            },
            JobOutcome::Failure { reason, .. } => SceneStatus::Failed {
                reason: reason.clone(),
            },
        };
        self.results[index] = Some(result);
        self.completed_count += 1;
        self.snapshot(Some(index))
    }

    pub fn snapshot(&self, last_completed: Option<usize>) -> ProgressSnapshot {
        ProgressSnapshot {
            completed_count: self.completed_count,
            total: self.total(),
            statuses: self.statuses.clone(),
            ordered_successful_paths: self.ordered_successful_paths(),
            last_completed,
        }
    }

    /// Successful output paths in ascending scene order.
    pub fn ordered_successful_paths(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .flatten()
            .filter_map(|r| r.image_path().cloned())
            .collect()
    }

    pub fn successful_paths(&self) -> BTreeMap<usize, PathBuf> {
        self.results
            .iter()
            .flatten()
            .filter_map(|r| r.image_path().map(|p| (r.scene_index, p.clone())))
            .collect()
    }

    pub fn results(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().flatten()
    }

    pub fn into_parts(self) -> (WorkDir, Vec<Option<JobResult>>) {
        (self.work_dir, self.results)
    }
}
