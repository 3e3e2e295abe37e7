//! Download engine for uqload-hosted videos.
//!
//! Resolves uqload page URLs into direct media URLs ([`uqload`]), then
//! downloads them through an admission-controlled concurrent queue
//! ([`downloader`]) with pause, resume, and cancellation.

pub mod config;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod uqload;
pub mod util;

pub use config::Settings;
pub use downloader::{CancelPrompt, DownloadPool, DownloadTask, QueueEvent, QueueManager};
pub use error::{DownloadError, Result};
pub use fetcher::Fetcher;
pub use uqload::{UqloadResolver, VideoDescriptor};
