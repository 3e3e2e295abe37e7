//! Application settings consumed read-only by the download core

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User-facing settings.
///
/// The core never mutates these; the presentation layer (or the CLI) owns
/// persistence and hands the values in at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory downloaded files are written to. When it does not exist at
    /// task start, the task falls back to the current working directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Hard ceiling on outstanding downloads (active + queued).
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,

    /// Number of downloads allowed to transfer at the same time.
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,
}

fn default_output_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_max_queue() -> usize {
    10
}

fn default_concurrent_downloads() -> usize {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_queue: default_max_queue(),
            concurrent_downloads: default_concurrent_downloads(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    pub fn with_concurrent_downloads(mut self, concurrent: usize) -> Self {
        self.concurrent_downloads = concurrent;
        self
    }

    /// Load settings from environment variables, starting from defaults.
    ///
    /// Supported variables: `UQLOAD_DL_OUTPUT_DIR`, `UQLOAD_DL_MAX_QUEUE`,
    /// `UQLOAD_DL_CONCURRENT_DOWNLOADS`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(dir) = std::env::var("UQLOAD_DL_OUTPUT_DIR") {
            settings.output_dir = PathBuf::from(dir);
        }
        if let Ok(max_queue) = std::env::var("UQLOAD_DL_MAX_QUEUE") {
            if let Ok(value) = max_queue.parse() {
                settings.max_queue = value;
            }
        }
        if let Ok(concurrent) = std::env::var("UQLOAD_DL_CONCURRENT_DOWNLOADS") {
            if let Ok(value) = concurrent.parse() {
                settings.concurrent_downloads = value;
            }
        }

        settings
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// The output directory when it exists, the current working directory
    /// otherwise.
    pub fn resolved_output_dir(&self) -> PathBuf {
        resolve_output_dir(&self.output_dir)
    }
}

/// Validates an output directory, falling back to the current working
/// directory when the configured path is not a directory.
pub(crate) fn resolve_output_dir(dir: &Path) -> PathBuf {
    if dir.is_dir() {
        dir.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}
