//! Cooperatively pausable and cancellable download task
//!
//! A task streams the media body to disk in fixed-size chunks. Before every
//! chunk write it blocks on the pause gate until the gate is open, then
//! checks the cancellation flag. `cancel` opens the gate unconditionally so
//! a paused task can never deadlock waiting to be cancelled; cancellation
//! latency is therefore at most one chunk-processing interval.

use crate::config::resolve_output_dir;
use crate::error::{DownloadError, Result};
use crate::fetcher::{BROWSER_USER_AGENT, REQUEST_TIMEOUT};
use crate::uqload::{referer_for, VideoDescriptor};
use futures::StreamExt;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Size of one streamed chunk; pause and cancellation are observed at chunk
/// boundaries.
pub const CHUNK_SIZE: usize = 10 * 1024;

/// Opaque task identifier, unique for the process lifetime.
pub type TaskId = Uuid;

/// A discrete notification emitted by a task, delivered exactly once.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEventKind {
    /// The transfer passed header validation and is writing to disk.
    Started,
    /// One chunk was written.
    Progress {
        bytes_downloaded: u64,
        total_bytes: u64,
    },
    /// The whole body was written.
    Completed,
    /// The cancellation flag was observed at a chunk boundary. A partial
    /// file is left on disk.
    Cancelled,
    /// Any other failure, carried as a display message.
    Failed(String),
}

/// One in-flight transfer.
///
/// Owned by the pool once submitted; the queue manager keeps a non-owning
/// handle for routing pause/cancel signals. All control methods are safe to
/// call from outside the task's own execution context.
pub struct DownloadTask {
    id: TaskId,
    descriptor: VideoDescriptor,
    output_dir: PathBuf,
    events: mpsc::UnboundedSender<TaskEvent>,
    /// Open (`true`) lets the streaming loop proceed; closed blocks it
    /// before the next chunk write.
    pause_gate: watch::Sender<bool>,
    cancelled: CancellationToken,
    /// Set when the task is removed from the pool queue before it ever ran;
    /// `run` then exits without emitting any event.
    aborted: AtomicBool,
    running: AtomicBool,
    bytes_downloaded: AtomicU64,
}

impl DownloadTask {
    /// Creates a task for the given descriptor.
    ///
    /// Fails when the descriptor's media URL is empty.
    pub fn new(
        descriptor: VideoDescriptor,
        output_dir: PathBuf,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Result<Arc<Self>> {
        if descriptor.media_url.trim().is_empty() {
            return Err(DownloadError::invalid_input(
                "URL must be a non empty string",
            ));
        }

        let (pause_gate, _) = watch::channel(true);
        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            descriptor,
            output_dir,
            events,
            pause_gate,
            cancelled: CancellationToken::new(),
            aborted: AtomicBool::new(false),
            running: AtomicBool::new(false),
            bytes_downloaded: AtomicU64::new(0),
        }))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn descriptor(&self) -> &VideoDescriptor {
        &self.descriptor
    }

    /// True from the *started* notification until any terminal state,
    /// letting callers distinguish "still occupying pool capacity" from
    /// "finished".
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        !*self.pause_gate.borrow()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    /// Closes the pause gate; the transfer blocks before its next chunk
    /// write. Idempotent.
    pub fn pause(&self) {
        self.pause_gate.send_replace(false);
    }

    /// Opens the pause gate, unblocking a paused transfer. Idempotent.
    pub fn resume(&self) {
        self.pause_gate.send_replace(true);
    }

    /// Sets the cancellation flag and opens the pause gate so a paused task
    /// does not deadlock waiting to be cancelled.
    pub fn cancel(&self) {
        self.cancelled.cancel();
        self.pause_gate.send_replace(true);
    }

    /// Synchronously removes a task that has not started running: it will
    /// never run and never emit events. Returns false when the transfer is
    /// already in flight, in which case `cancel` is the only way to stop it.
    pub(crate) fn abort_before_start(&self) -> bool {
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.aborted.store(true, Ordering::SeqCst);
        self.cancelled.cancel();
        self.pause_gate.send_replace(true);
        true
    }

    /// Executes the transfer, funnelling every outcome into exactly one
    /// terminal notification. Nothing escapes as a fault that could take
    /// down the worker.
    pub async fn run(self: &Arc<Self>, client: &reqwest::Client) {
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }

        let result = self.download(client).await;
        self.running.store(false, Ordering::SeqCst);

        // Removed from the queue while still connecting: the remover has
        // already reported it, so no event may be emitted here.
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }

        match result {
            Ok(()) => {
                info!(task_id = %self.id, "download completed");
                self.emit(TaskEventKind::Completed);
            }
            Err(DownloadError::Cancelled) => {
                debug!(task_id = %self.id, "download cancelled, partial file kept");
                self.emit(TaskEventKind::Cancelled);
            }
            Err(err) => {
                debug!(task_id = %self.id, %err, "download failed");
                self.emit(TaskEventKind::Failed(err.to_string()));
            }
        }
    }

    async fn download(&self, client: &reqwest::Client) -> Result<()> {
        let media_url = self.descriptor.media_url.trim();
        if media_url.is_empty() {
            return Err(DownloadError::invalid_input(
                "URL must be a non empty string",
            ));
        }
        let parsed = Url::parse(media_url)
            .map_err(|_| DownloadError::invalid_input("URL must be a valid absolute URL"))?;

        let destination = self.resolve_destination(&parsed)?;

        let response = client
            .get(media_url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .header(reqwest::header::REFERER, referer_for(media_url))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::UnexpectedStatus(status.as_u16()));
        }

        let total_bytes = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|len| *len > 0)
            .ok_or(DownloadError::MissingContentLength)?;

        // Publish *running* before re-checking the abort flag: after the
        // store, abort_before_start can no longer succeed, so an abort either
        // lands before this point (observed here) or is refused.
        self.running.store(true, Ordering::SeqCst);
        if self.aborted.load(Ordering::SeqCst) {
            return Err(DownloadError::Cancelled);
        }
        self.emit(TaskEventKind::Started);

        let mut gate = self.pause_gate.subscribe();
        let mut file = tokio::fs::File::create(&destination).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                // Blocks without consuming CPU while the gate is closed;
                // cancel() reopens the gate, so this always wakes up.
                let _ = gate.wait_for(|open| *open).await;

                if self.cancelled.is_cancelled() {
                    file.flush().await.ok();
                    return Err(DownloadError::Cancelled);
                }

                file.write_all(piece).await?;

                let written = self.bytes_downloaded.load(Ordering::SeqCst) + piece.len() as u64;
                let written = written.min(total_bytes);
                self.bytes_downloaded.store(written, Ordering::SeqCst);
                self.emit(TaskEventKind::Progress {
                    bytes_downloaded: written,
                    total_bytes,
                });
            }
        }

        file.flush().await?;
        info!(task_id = %self.id, path = %destination.display(), "file saved");
        Ok(())
    }

    /// Derives the destination path from the media URL and descriptor
    /// title, avoiding collisions with a random token suffix.
    fn resolve_destination(&self, media_url: &Url) -> Result<PathBuf> {
        let file_name = media_url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("");
        let url_path = Path::new(file_name);
        let url_stem = url_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("");
        let extension = url_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        if url_stem.is_empty() || extension.is_empty() {
            return Err(DownloadError::invalid_input(
                "URL must be a non empty string",
            ));
        }

        let title = self.descriptor.title.trim();
        let stem = if title.is_empty() { url_stem } else { title };

        let output_dir = resolve_output_dir(&self.output_dir);
        let destination = output_dir.join(format!("{stem}.{extension}"));
        if destination.is_file() {
            return Ok(output_dir.join(format!(
                "{stem}_{}.{extension}",
                Uuid::new_v4().simple()
            )));
        }
        Ok(destination)
    }

    fn emit(&self, kind: TaskEventKind) {
        let _ = self.events.send(TaskEvent {
            task_id: self.id,
            kind,
        });
    }
}
