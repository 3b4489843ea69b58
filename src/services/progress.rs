use crate::core::scene::Scene;
use crate::core::state::{ProgressSnapshot, SceneStatus};
use crate::services::orchestrator::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};

/// Renders snapshots as a terminal progress bar with one line per finished scene.
pub struct ConsoleReporter {
    pb: ProgressBar,
    labels: Vec<String>,
}

impl ConsoleReporter {
    pub fn new(scenes: &[Scene]) -> Self {
        let pb = ProgressBar::new(scenes.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Self {
            pb,
            labels: scenes.iter().map(scene_label).collect(),
        }
    }

    fn label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("Scene #{}", index + 1))
    }
}

fn scene_label(scene: &Scene) -> String {
    format!("Scene {:02} ({})", scene.display_number, scene.title)
}

/// One-line description of a finished scene.
pub fn status_line(label: &str, status: &SceneStatus) -> String {
    match status {
        SceneStatus::Queued => format!("… {}: queued", label),
        SceneStatus::Succeeded { path } => format!(
            "✓ {}: {}",
            label,
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        ),
        SceneStatus::Failed { reason } => format!("✗ {}: {}", label, reason),
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, snapshot: &ProgressSnapshot) {
        self.pb.set_length(snapshot.total as u64);
        self.pb.set_position(snapshot.completed_count as u64);

        if let Some(index) = snapshot.last_completed {
            if let Some(status) = snapshot.statuses.get(index) {
                self.pb.println(status_line(&self.label(index), status));
            }
        }

        if snapshot.is_final() {
            self.pb.finish_with_message(format!(
                "{} succeeded",
                snapshot.ordered_successful_paths.len()
            ));
        } else {
            self.pb.set_message(format!(
                "{} succeeded",
                snapshot.ordered_successful_paths.len()
            ));
        }
    }
}
