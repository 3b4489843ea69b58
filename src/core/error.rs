use std::path::PathBuf;
use std::time::Duration;

/// Rejections raised before any generation work starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API key is missing")]
    MissingCredential,

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid aspect ratio '{0}', expected W:H")]
    InvalidAspectRatio(String),

    #[error("Invalid size '{0}', expected WxH")]
    InvalidSize(String),

    #[error("Invalid prompt policy '{0}'")]
    InvalidPolicy(String),

    #[error("No scenes to generate")]
    NoScenes,

    #[error("Invalid scene index: {index} (config has {total} scenes)")]
    SceneIndexOutOfRange { index: usize, total: usize },
}

/// Outcome classification for a single call to the image service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerateError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("no image in response: {0}")]
    NoImage(String),

    #[error("{0}")]
    Other(String),
}

/// Failures of the returned image content itself. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("invalid target size {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("no successful results to archive")]
    Empty,

    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
