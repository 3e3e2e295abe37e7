//! Error types shared across the crate

use thiserror::Error;

/// Error type for resolution and download operations.
///
/// Cancellation is modelled as an error internally so the streaming loop can
/// unwind with `?`, but it is converted into its own outward notification at
/// the task boundary rather than being reported as a failure.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Bad caller input: empty URL list, empty media URL, URL without a
    /// usable file name, and similar.
    #[error("{0}")]
    InvalidInput(String),

    /// The provided page URL does not look like a uqload video page.
    #[error("Invalid Uqload URL. Please try again.")]
    InvalidUqloadUrl,

    /// The page reports the video as deleted or missing, or the expected
    /// metadata could not be located in the page markup.
    #[error("Video not Found")]
    VideoNotFound,

    /// At least one request in a fetch batch failed; the whole resolution
    /// attempt is treated as failed rather than proceeding with partial data.
    #[error("at least one request in the batch failed")]
    IncompleteBatch,

    /// The media endpoint answered with something other than 200.
    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    /// The media response carried no usable Content-Length header.
    #[error("Content-Length header is missing")]
    MissingContentLength,

    /// The download was cancelled by the user.
    #[error("Download cancelled by the user.")]
    Cancelled,

    /// Transport-level failure from the HTTP client.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem failure while writing the downloaded data.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Result type for resolution and download operations.
pub type Result<T> = std::result::Result<T, DownloadError>;
