use crate::core::config::{max_attempts, Config};
use crate::core::error::ConfigError;
use crate::core::scene::{GenerationConfig, Scene};
use crate::core::state::{BatchRun, FailureKind, JobOutcome, JobResult, SceneStatus};
use crate::core::workspace::WorkDir;
use crate::services::executor::{JobExecutor, RetryPolicy};
use crate::services::generator::GeneratorFactory;
use crate::services::orchestrator::{BatchOrchestrator, ProgressReporter};
use crate::services::progress::status_line;
use crate::services::prompt::build_prompt;
use crate::utils::archive::{build_archive, default_archive_name};
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Inputs of a whole-batch invocation.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub credential: String,
    pub scene_config_json: String,
    pub auto_retry: bool,
    pub max_workers: usize,
}

/// Inputs of a one-scene invocation. `scene_index` is zero-based.
#[derive(Debug, Clone)]
pub struct SingleSceneRequest {
    pub credential: String,
    pub scene_config_json: String,
    pub auto_retry: bool,
    pub scene_index: usize,
}

/// Everything a finished invocation produced.
#[derive(Debug)]
pub struct BatchReport {
    /// Scenes that were run, in scene order. Aligned with `results`.
    pub scenes: Vec<Scene>,
    pub results: Vec<JobResult>,
    /// Generated images in scene order. The files are only still on disk
    /// when `kept_work_dir` is set; otherwise they were packed into
    /// `archive` and the work dir was removed.
    pub ordered_successful_paths: Vec<PathBuf>,
    pub archive: Option<PathBuf>,
    pub archive_error: Option<String>,
    /// Set when the generated PNGs were left on disk.
    pub kept_work_dir: Option<PathBuf>,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn total(&self) -> usize {
        self.scenes.len()
    }

    pub fn hit_rate_limit(&self) -> bool {
        self.results.iter().any(|r| {
            matches!(
                r.outcome,
                JobOutcome::Failure {
                    kind: FailureKind::RateLimited,
                    ..
                }
            )
        })
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Generation complete! {}/{} scenes generated.",
            self.success_count(),
            self.total()
        )];

        for (scene, result) in self.scenes.iter().zip(&self.results) {
            let label = format!("Scene {:02} ({})", scene.display_number, scene.title);
            let status = match &result.outcome {
                JobOutcome::Success { image_path, .. } => SceneStatus::Succeeded {
                    path: image_path.clone(),
                },
                JobOutcome::Failure { reason, .. } => SceneStatus::Failed {
                    reason: reason.clone(),
                },
            };
            let mut line = status_line(&label, &status);
            if result.attempts > 1 {
                line.push_str(&format!(" [{} attempts]", result.attempts));
            }
            lines.push(line);
        }

        if let Some(archive) = &self.archive {
            lines.push(format!("Archive: {}", archive.display()));
        }
        if let Some(err) = &self.archive_error {
            lines.push(format!("Archive failed: {}", err));
        }
        if let Some(dir) = &self.kept_work_dir {
            lines.push(format!("Images kept in: {}", dir.display()));
        }

        if self.hit_rate_limit() {
            lines.push(String::new());
            lines.push("Some scenes hit the API rate limit. To recover:".to_string());
            lines.push("  - enable billing on the API project for a higher quota".to_string());
            lines.push("  - wait for the quota to reset and run again".to_string());
            lines.push("  - keep auto-retry enabled so rate-limited scenes are retried".to_string());
        }
        lines.join("\n")
    }
}

pub struct WorkflowManager {
    config: Config,
    generators: Box<dyn GeneratorFactory>,
}

impl WorkflowManager {
    pub fn new(config: Config, generators: Box<dyn GeneratorFactory>) -> Self {
        Self { config, generators }
    }

    /// Generates every scene in the request and packages the results.
    pub async fn run_batch(
        &self,
        request: BatchRequest,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchReport> {
        require_credential(&request.credential)?;
        let config = GenerationConfig::from_json(&request.scene_config_json)?;
        let scenes = config.scenes.clone();

        self.execute(
            &request.credential,
            config,
            scenes,
            request.max_workers,
            max_attempts(request.auto_retry),
            reporter,
        )
        .await
    }

    /// Generates one scene. The index is checked before anything is created.
    pub async fn run_single(
        &self,
        request: SingleSceneRequest,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchReport> {
        require_credential(&request.credential)?;
        let config = GenerationConfig::from_json(&request.scene_config_json)?;
        let mut scene = config.scene(request.scene_index)?.clone();
        // The run tracks scenes by position, so a lone scene sits at 0.
        scene.index = 0;

        self.execute(
            &request.credential,
            config,
            vec![scene],
            1,
            max_attempts(request.auto_retry),
            reporter,
        )
        .await
    }

    async fn execute(
        &self,
        credential: &str,
        config: GenerationConfig,
        scenes: Vec<Scene>,
        max_workers: usize,
        max_attempts: u32,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchReport> {
        let generator = self.generators.create(credential)?;
        let work_dir = WorkDir::create_in(Path::new(&self.config.work_folder))?;
        info!("Working directory: {}", work_dir.path().display());

        let executor = JobExecutor::new(
            generator,
            Arc::new(config),
            work_dir.path().to_path_buf(),
            RetryPolicy::from(&self.config.retry),
        );
        let orchestrator = BatchOrchestrator::new(executor);

        let batch = BatchRun::new(work_dir, scenes.len());
        let batch = orchestrator
            .run(batch, &scenes, max_workers, max_attempts, reporter)
            .await;

        let successful = batch.successful_paths();
        let ordered_successful_paths = batch.ordered_successful_paths();

        let (archive, archive_error) = if successful.is_empty() {
            warn!("No scenes succeeded, skipping archive");
            (None, None)
        } else {
            let archive_path = Path::new(&self.config.output_folder).join(default_archive_name());
            match tokio::task::spawn_blocking(move || build_archive(&successful, &archive_path))
                .await
                .context("Archive task panicked")?
            {
                Ok(path) => {
                    info!("Archive written to {}", path.display());
                    (Some(path), None)
                }
                Err(e) => {
                    warn!("Failed to build archive: {}", e);
                    (None, Some(e.to_string()))
                }
            }
        };

        let (work_dir, results) = batch.into_parts();
        let results: Vec<JobResult> = results.into_iter().flatten().collect();

        // Images are only reachable through the work dir when the archive failed.
        let keep = self.config.keep_work_dir || (archive_error.is_some() && !ordered_successful_paths.is_empty());
        let kept_work_dir = if keep {
            Some(work_dir.keep())
        } else {
            work_dir.discard()?;
            None
        };

        Ok(BatchReport {
            scenes,
            results,
            ordered_successful_paths,
            archive,
            archive_error,
            kept_work_dir,
        })
    }
}

/// Builds the prompt of every scene, or of one scene when `index` is set,
/// without contacting the image service.
pub fn preview_prompts(scene_config_json: &str, index: Option<usize>) -> Result<Vec<(Scene, String)>> {
    let config = GenerationConfig::from_json(scene_config_json)?;
    let scenes: Vec<&Scene> = match index {
        Some(i) => vec![config.scene(i)?],
        None => config.scenes.iter().collect(),
    };
    Ok(scenes
        .into_iter()
        .map(|scene| (scene.clone(), build_prompt(scene, &config)))
        .collect())
}

fn require_credential(credential: &str) -> Result<(), ConfigError> {
    if credential.trim().is_empty() {
        return Err(ConfigError::MissingCredential);
    }
    Ok(())
}
