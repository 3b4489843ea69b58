use crate::core::config::RetryConfig;
use crate::core::error::GenerateError;
use crate::core::scene::{GenerationConfig, Scene};
use crate::core::state::{FailureKind, JobOutcome, JobResult};
use crate::services::generator::ImageGenerator;
use crate::services::prompt::build_prompt;
use crate::utils::postprocess;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any single wait, whatever the service or config asks for.
pub const MAX_RETRY_WAIT: Duration = Duration::from_secs(60 * 60);

/// Waits applied between attempts of one scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Multiplied by the attempt number after a generic failure.
    pub base_delay: Duration,
    /// Used when a rate-limit response carries no retry hint.
    pub default_rate_limit_wait: Duration,
    pub rate_limit_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            default_rate_limit_wait: config.rate_limit_wait(),
            rate_limit_margin: config.rate_limit_margin(),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(MAX_RETRY_WAIT)
    }

    /// Service hint (or the default) capped at [`MAX_RETRY_WAIT`].
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or(self.default_rate_limit_wait)
            .min(MAX_RETRY_WAIT)
    }
}

/// Runs one scene through the image service and the post-processor.
pub struct JobExecutor {
    generator: Arc<dyn ImageGenerator>,
    config: Arc<GenerationConfig>,
    output_dir: PathBuf,
    policy: RetryPolicy,
}

impl JobExecutor {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        config: Arc<GenerationConfig>,
        output_dir: PathBuf,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            config,
            output_dir,
            policy,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Attempts `scene` up to `max_attempts` times and always yields a
    /// terminal result. Only the calling task is suspended while waiting.
    pub async fn execute(&self, scene: &Scene, max_attempts: u32) -> JobResult {
        let max_attempts = max_attempts.max(1);
        let prompt = build_prompt(scene, &self.config);
        let aspect_hint = self.config.output_rules.aspect_ratio.to_string();
        debug!("Scene {} prompt:\n{}", scene.display_number, prompt);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.generator.generate(&prompt, &aspect_hint).await {
                Ok(bytes) => return self.finish(scene, attempt, prompt, bytes).await,
                Err(e @ GenerateError::NoImage(_)) => {
                    return failure(scene, attempt, e.to_string(), false, FailureKind::Content);
                }
                Err(GenerateError::RateLimited { retry_after }) => {
                    let wait = self.policy.rate_limit_wait(retry_after);
                    if attempt >= max_attempts {
                        return failure(
                            scene,
                            attempt,
                            format!("rate limit exceeded (retry after {}s)", wait.as_secs()),
                            true,
                            FailureKind::RateLimited,
                        );
                    }
                    let delay = wait.saturating_add(self.policy.rate_limit_margin);
                    warn!(
                        "Scene {} rate limited, waiting {}s before attempt {}/{}",
                        scene.display_number,
                        delay.as_secs(),
                        attempt + 1,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(GenerateError::Other(reason)) => {
                    if attempt >= max_attempts {
                        return failure(scene, attempt, reason, true, FailureKind::Transient);
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Scene {} failed: {}, retrying in {}s ({}/{})",
                        scene.display_number,
                        reason,
                        delay.as_secs(),
                        attempt + 1,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn finish(&self, scene: &Scene, attempts: u32, prompt: String, bytes: Vec<u8>) -> JobResult {
        let rules = &self.config.output_rules;
        let (aspect, width, height) = (rules.aspect_ratio, rules.target_width, rules.target_height);

        let normalized = match tokio::task::spawn_blocking(move || {
            postprocess::normalize(&bytes, aspect, width, height)
        })
        .await
        {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => return failure(scene, attempts, e.to_string(), false, FailureKind::Content),
            Err(e) => {
                return failure(
                    scene,
                    attempts,
                    format!("post-processing task failed: {}", e),
                    false,
                    FailureKind::Content,
                )
            }
        };

        let image_path = self.output_dir.join(scene.output_file_name());
        if let Err(e) = tokio::fs::write(&image_path, &normalized.png).await {
            return failure(
                scene,
                attempts,
                format!("failed to write {}: {}", image_path.display(), e),
                false,
                FailureKind::Io,
            );
        }

        info!(
            "Scene {} saved to {} ({}x{})",
            scene.display_number,
            image_path.display(),
            normalized.width,
            normalized.height
        );
        JobResult {
            scene_index: scene.index,
            attempts,
            outcome: JobOutcome::Success { image_path, prompt },
        }
    }
}

fn failure(
    scene: &Scene,
    attempts: u32,
    reason: String,
    retries_exhausted: bool,
    kind: FailureKind,
) -> JobResult {
    warn!("Scene {} failed: {}", scene.display_number, reason);
    JobResult {
        scene_index: scene.index,
        attempts,
        outcome: JobOutcome::Failure {
            reason,
            retries_exhausted,
            kind,
        },
    }
}
