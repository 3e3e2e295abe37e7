//! Admission-controlled download pool
//!
//! Bounds the number of concurrently transferring tasks with a semaphore
//! (`max_active`) and rejects submission outright once the outstanding
//! ceiling (`max_outstanding`, active + queued) is reached. The outstanding
//! counter lives behind a single mutex; it is incremented by `submit` and
//! decremented exactly once per task reaching a terminal state — the queue
//! manager upholds that 1:1 discipline.

use super::task::DownloadTask;
use crate::fetcher::REQUEST_TIMEOUT;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

pub const DEFAULT_MAX_ACTIVE: usize = 2;
pub const DEFAULT_MAX_OUTSTANDING: usize = 5;

pub struct DownloadPool {
    semaphore: Arc<Semaphore>,
    active: Mutex<usize>,
    max_active: usize,
    max_outstanding: usize,
    client: reqwest::Client,
}

impl DownloadPool {
    /// Creates a pool running at most `max_active` transfers at once and
    /// admitting at most `max_outstanding` tasks in total. Both bounds are
    /// clamped to at least 1, and the outstanding ceiling to at least
    /// `max_active`.
    pub fn new(max_active: usize, max_outstanding: usize) -> Self {
        // Streaming GETs must survive longer than 20s, so the transfer
        // client carries connect/read timeouts instead of a total deadline.
        let client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .read_timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self::with_client(max_active, max_outstanding, client)
    }

    pub fn with_client(max_active: usize, max_outstanding: usize, client: reqwest::Client) -> Self {
        let max_active = max_active.max(1);
        let max_outstanding = max_outstanding.max(max_active);
        Self {
            semaphore: Arc::new(Semaphore::new(max_active)),
            active: Mutex::new(0),
            max_active,
            max_outstanding,
            client,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    /// Hands the task to the execution substrate.
    ///
    /// Returns false without side effects when the outstanding ceiling is
    /// reached. Otherwise the counter is incremented and the task runs as
    /// soon as a worker permit is available.
    pub fn submit(&self, task: Arc<DownloadTask>) -> bool {
        {
            let mut active = self.active.lock();
            if *active >= self.max_outstanding {
                return false;
            }
            *active += 1;
        }

        let semaphore = self.semaphore.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Ok(_permit) = semaphore.acquire_owned().await {
                task.run(&client).await;
            }
        });
        true
    }

    /// Point-in-time snapshot; may be stale by the time `submit` is
    /// attempted.
    pub fn is_full(&self) -> bool {
        *self.active.lock() >= self.max_outstanding
    }

    pub fn active_count(&self) -> usize {
        *self.active.lock()
    }

    /// Frees one unit of capacity. Must be called exactly once per task
    /// reaching a terminal state; calling it twice over-frees capacity.
    pub fn decrement(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        debug!(active = *active, "pool capacity released");
    }

    /// Attempts to remove a task that has not started running; it will
    /// never run and never emit events. Returns false when the transfer is
    /// already in flight — stopping it then requires the task's own
    /// cancellation protocol.
    pub fn try_take(&self, task: &DownloadTask) -> bool {
        task.abort_before_start()
    }
}

impl Default for DownloadPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACTIVE, DEFAULT_MAX_OUTSTANDING)
    }
}
