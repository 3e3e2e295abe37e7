//! Queue manager: owns the pool and the live-task registry
//!
//! Routes task notifications to bookkeeping (registry removal, pool
//! capacity release, error counting) and forwards them outward over a
//! channel the presentation layer consumes. Terminal events from different
//! tasks serialize through one dispatcher, so two tasks finishing at the
//! same time cannot corrupt the shared counters; registry membership gates
//! the capacity release, keeping the increment/decrement discipline 1:1
//! even when a task is removed from the queue before it ran.

use super::pool::DownloadPool;
use super::task::{DownloadTask, TaskEvent, TaskEventKind, TaskId};
use crate::config::Settings;
use crate::error::{DownloadError, Result};
use crate::uqload::VideoDescriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Asks the user to confirm a cancellation. The presentation layer supplies
/// the implementation (a dialog, a prompt, or an auto-confirm in tests).
#[async_trait]
pub trait CancelPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// Notifications consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    TaskStarted {
        task_id: TaskId,
    },
    TaskProgress {
        task_id: TaskId,
        bytes_downloaded: u64,
        total_bytes: u64,
    },
    TaskCompleted {
        task_id: TaskId,
        outstanding: usize,
    },
    TaskCancelled {
        task_id: TaskId,
        outstanding: usize,
    },
    TaskFailed {
        task_id: TaskId,
        message: String,
        errors: usize,
        outstanding: usize,
    },
    /// A task was removed from the queue before it ever started.
    TaskRemoved {
        task_id: TaskId,
        outstanding: usize,
    },
    /// Submission was refused because the outstanding ceiling is reached.
    QueueFull {
        message: String,
    },
}

pub struct QueueManager {
    pool: DownloadPool,
    output_dir: PathBuf,
    tasks: Mutex<HashMap<TaskId, Arc<DownloadTask>>>,
    errors: AtomicUsize,
    task_events: mpsc::UnboundedSender<TaskEvent>,
    queue_events: mpsc::UnboundedSender<QueueEvent>,
}

impl QueueManager {
    /// Builds a manager from settings and returns it together with the
    /// outward notification stream.
    pub fn new(settings: &Settings) -> (Arc<Self>, mpsc::UnboundedReceiver<QueueEvent>) {
        Self::with_pool(
            DownloadPool::new(settings.concurrent_downloads, settings.max_queue),
            settings.output_dir.clone(),
        )
    }

    pub fn with_pool(
        pool: DownloadPool,
        output_dir: PathBuf,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<QueueEvent>) {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(Self {
            pool,
            output_dir,
            tasks: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
            task_events: task_tx,
            queue_events: queue_tx,
        });

        let dispatcher = manager.clone();
        tokio::spawn(async move { dispatcher.dispatch(task_rx).await });

        (manager, queue_rx)
    }

    pub fn pool(&self) -> &DownloadPool {
        &self.pool
    }

    /// Number of live tasks (active or queued).
    pub fn size(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn task(&self, task_id: TaskId) -> Option<Arc<DownloadTask>> {
        self.tasks.lock().get(&task_id).cloned()
    }

    /// Creates a task for the descriptor and submits it to the pool.
    ///
    /// Returns `None` (after emitting a queue-full notification) when the
    /// pool refuses admission; the caller may retry later at its own
    /// discretion.
    pub fn enqueue(&self, descriptor: VideoDescriptor) -> Result<Option<TaskId>> {
        if self.pool.is_full() {
            self.notify_queue_full();
            return Ok(None);
        }

        let task = DownloadTask::new(descriptor, self.output_dir.clone(), self.task_events.clone())?;
        let task_id = task.id();
        self.tasks.lock().insert(task_id, task.clone());

        // is_full is a snapshot; submission itself re-checks under the
        // counter's lock.
        if !self.pool.submit(task) {
            self.tasks.lock().remove(&task_id);
            self.notify_queue_full();
            return Ok(None);
        }

        debug!(%task_id, outstanding = self.pool.active_count(), "task enqueued");
        Ok(Some(task_id))
    }

    /// Cancels one task after confirmation.
    ///
    /// The task is paused while the prompt is open; refusal resumes it. On
    /// confirmation a task that never started is removed outright, while a
    /// running one goes through the cooperative cancellation protocol and
    /// leaves the registry when its cancelled notification arrives.
    pub async fn cancel_one(&self, task_id: TaskId, prompt: &dyn CancelPrompt) -> Result<()> {
        let task = self
            .task(task_id)
            .ok_or_else(|| DownloadError::invalid_input(format!("unknown task: {task_id}")))?;

        task.pause();
        if !prompt
            .confirm("Are you sure you want to cancel the download?")
            .await
        {
            task.resume();
            return Ok(());
        }

        if self.pool.try_take(&task) {
            if self.release(task_id) {
                self.notify(QueueEvent::TaskRemoved {
                    task_id,
                    outstanding: self.pool.active_count(),
                });
            }
        } else {
            task.cancel();
        }
        Ok(())
    }

    /// Cancels every live task after a single confirmation.
    ///
    /// Queued tasks are removed immediately; running ones are cancelled
    /// cooperatively and leave the registry via their cancelled
    /// notifications, so capacity is released exactly once per task.
    pub async fn cancel_all(&self, prompt: &dyn CancelPrompt) {
        if self.size() == 0 {
            return;
        }

        self.pause_all();
        if !prompt
            .confirm("Are you sure you want to cancel all downloads?")
            .await
        {
            self.resume_all();
            return;
        }

        let tasks: Vec<Arc<DownloadTask>> = self.tasks.lock().values().cloned().collect();
        for task in tasks {
            if !task.is_running() && self.pool.try_take(&task) {
                if self.release(task.id()) {
                    self.notify(QueueEvent::TaskRemoved {
                        task_id: task.id(),
                        outstanding: self.pool.active_count(),
                    });
                }
            } else {
                task.cancel();
            }
        }
    }

    /// Pauses every running task.
    pub fn pause_all(&self) {
        for task in self.tasks.lock().values() {
            if task.is_running() {
                task.pause();
            }
        }
    }

    /// Resumes every running task.
    pub fn resume_all(&self) {
        for task in self.tasks.lock().values() {
            if task.is_running() {
                task.resume();
            }
        }
    }

    async fn dispatch(self: Arc<Self>, mut task_rx: mpsc::UnboundedReceiver<TaskEvent>) {
        while let Some(event) = task_rx.recv().await {
            self.route(event);
        }
    }

    fn route(&self, event: TaskEvent) {
        let task_id = event.task_id;
        match event.kind {
            TaskEventKind::Started => self.notify(QueueEvent::TaskStarted { task_id }),
            TaskEventKind::Progress {
                bytes_downloaded,
                total_bytes,
            } => self.notify(QueueEvent::TaskProgress {
                task_id,
                bytes_downloaded,
                total_bytes,
            }),
            TaskEventKind::Completed => {
                if self.release(task_id) {
                    self.notify(QueueEvent::TaskCompleted {
                        task_id,
                        outstanding: self.pool.active_count(),
                    });
                }
            }
            TaskEventKind::Cancelled => {
                if self.release(task_id) {
                    self.notify(QueueEvent::TaskCancelled {
                        task_id,
                        outstanding: self.pool.active_count(),
                    });
                }
            }
            TaskEventKind::Failed(message) => {
                if self.release(task_id) {
                    warn!(%task_id, %message, "download failed");
                    let errors = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
                    self.notify(QueueEvent::TaskFailed {
                        task_id,
                        message,
                        errors,
                        outstanding: self.pool.active_count(),
                    });
                }
            }
        }
    }

    /// Removes the task from the registry, releasing pool capacity only
    /// when the task was still registered. Returns whether it was.
    fn release(&self, task_id: TaskId) -> bool {
        let removed = self.tasks.lock().remove(&task_id).is_some();
        if removed {
            self.pool.decrement();
        }
        removed
    }

    fn notify_queue_full(&self) {
        warn!("download queue is full");
        self.notify(QueueEvent::QueueFull {
            message: "The queue is full!".to_string(),
        });
    }

    fn notify(&self, event: QueueEvent) {
        let _ = self.queue_events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Mock, Server, ServerGuard};
    use std::io::Write;
    use std::time::Duration;

    struct AutoPrompt(bool);

    #[async_trait]
    impl CancelPrompt for AutoPrompt {
        async fn confirm(&self, _message: &str) -> bool {
            self.0
        }
    }

    fn descriptor(server: &ServerGuard, title: &str) -> VideoDescriptor {
        VideoDescriptor {
            title: title.to_string(),
            media_url: format!("{}/clip/v.mp4", server.url()),
            thumbnail_url: String::new(),
            size_bytes: 20 * 1024,
            content_type: "video/mp4".to_string(),
            resolution: None,
            duration: None,
        }
    }

    /// Serves 20 KiB slowly enough for pause/cancel to land mid-transfer.
    fn slow_media_mock(server: &mut ServerGuard) -> Mock {
        let body = vec![b'Q'; 20 * 1024];
        server
            .mock("GET", "/clip/v.mp4")
            .with_status(200)
            .with_header("content-length", &body.len().to_string())
            .with_chunked_body(move |w| {
                for chunk in body.chunks(2 * 1024) {
                    std::thread::sleep(Duration::from_millis(50));
                    w.write_all(chunk)?;
                }
                Ok(())
            })
            .expect_at_least(0)
            .create()
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> QueueEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for a queue event")
            .expect("queue event channel closed")
    }

    async fn wait_for_terminal(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> QueueEvent {
        loop {
            match next_event(rx).await {
                QueueEvent::TaskStarted { .. } | QueueEvent::TaskProgress { .. } => continue,
                terminal => return terminal,
            }
        }
    }

    #[tokio::test]
    async fn test_enqueue_rejects_when_pool_is_full() {
        let mut server = Server::new_async().await;
        let _mock = slow_media_mock(&mut server);

        let temp = tempfile::tempdir().unwrap();
        let (manager, mut rx) =
            QueueManager::with_pool(DownloadPool::new(1, 1), temp.path().to_path_buf());

        let first = manager.enqueue(descriptor(&server, "one")).unwrap();
        assert!(first.is_some());
        assert_eq!(manager.pool().active_count(), 1);

        let second = manager.enqueue(descriptor(&server, "two")).unwrap();
        assert!(second.is_none());
        assert_eq!(manager.pool().active_count(), 1);
        assert_eq!(manager.size(), 1);

        let event = next_event(&mut rx).await;
        assert_eq!(
            event,
            QueueEvent::QueueFull {
                message: "The queue is full!".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_terminal_event_releases_capacity_exactly_once() {
        let mut server = Server::new_async().await;
        let body = vec![b'Q'; 4 * 1024];
        let _mock = server
            .mock("GET", "/clip/v.mp4")
            .with_status(200)
            .with_header("content-length", &body.len().to_string())
            .with_body(body)
            .create();

        let temp = tempfile::tempdir().unwrap();
        let (manager, mut rx) =
            QueueManager::with_pool(DownloadPool::new(1, 1), temp.path().to_path_buf());

        manager.enqueue(descriptor(&server, "done")).unwrap();
        let terminal = wait_for_terminal(&mut rx).await;
        assert!(matches!(terminal, QueueEvent::TaskCompleted { outstanding: 0, .. }));

        assert_eq!(manager.size(), 0);
        assert_eq!(manager.pool().active_count(), 0);

        // Capacity is back: the next submission is admitted.
        let again = manager.enqueue(descriptor(&server, "again")).unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_failed_task_bumps_error_counter() {
        let mut server = Server::new_async().await;
        let _mock = server.mock("GET", "/clip/v.mp4").with_status(500).create();

        let temp = tempfile::tempdir().unwrap();
        let (manager, mut rx) =
            QueueManager::with_pool(DownloadPool::new(1, 1), temp.path().to_path_buf());

        manager.enqueue(descriptor(&server, "broken")).unwrap();
        let terminal = wait_for_terminal(&mut rx).await;
        match terminal {
            QueueEvent::TaskFailed {
                message,
                errors,
                outstanding,
                ..
            } => {
                assert_eq!(message, "Unexpected status code: 500");
                assert_eq!(errors, 1);
                assert_eq!(outstanding, 0);
            }
            other => panic!("expected TaskFailed, got {other:?}"),
        }
        assert_eq!(manager.error_count(), 1);
        assert_eq!(manager.size(), 0);
    }

    #[tokio::test]
    async fn test_cancel_one_declined_resumes_the_task() {
        let mut server = Server::new_async().await;
        let _mock = slow_media_mock(&mut server);

        let temp = tempfile::tempdir().unwrap();
        let (manager, mut rx) =
            QueueManager::with_pool(DownloadPool::new(1, 1), temp.path().to_path_buf());

        let task_id = manager
            .enqueue(descriptor(&server, "keep"))
            .unwrap()
            .unwrap();

        // Let the transfer start.
        let started = next_event(&mut rx).await;
        assert_eq!(started, QueueEvent::TaskStarted { task_id });

        manager.cancel_one(task_id, &AutoPrompt(false)).await.unwrap();

        let task = manager.task(task_id).expect("task must still be live");
        assert!(!task.is_paused());
        assert!(!task.is_cancelled());

        let terminal = wait_for_terminal(&mut rx).await;
        assert!(matches!(terminal, QueueEvent::TaskCompleted { .. }));
    }

    #[tokio::test]
    async fn test_cancel_one_confirmed_cancels_a_running_task() {
        let mut server = Server::new_async().await;
        let _mock = slow_media_mock(&mut server);

        let temp = tempfile::tempdir().unwrap();
        let (manager, mut rx) =
            QueueManager::with_pool(DownloadPool::new(1, 1), temp.path().to_path_buf());

        let task_id = manager
            .enqueue(descriptor(&server, "doomed"))
            .unwrap()
            .unwrap();

        let started = next_event(&mut rx).await;
        assert_eq!(started, QueueEvent::TaskStarted { task_id });

        manager.cancel_one(task_id, &AutoPrompt(true)).await.unwrap();

        let terminal = wait_for_terminal(&mut rx).await;
        assert!(matches!(
            terminal,
            QueueEvent::TaskCancelled { outstanding: 0, .. }
        ));
        assert_eq!(manager.size(), 0);
        assert_eq!(manager.pool().active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_one_removes_a_queued_task_without_running_it() {
        let mut server = Server::new_async().await;
        let _mock = slow_media_mock(&mut server);

        let temp = tempfile::tempdir().unwrap();
        // One worker, two admitted: the second task waits its turn.
        let (manager, mut rx) =
            QueueManager::with_pool(DownloadPool::new(1, 2), temp.path().to_path_buf());

        let _running = manager
            .enqueue(descriptor(&server, "running"))
            .unwrap()
            .unwrap();
        let queued_id = manager
            .enqueue(descriptor(&server, "queued"))
            .unwrap()
            .unwrap();
        assert_eq!(manager.pool().active_count(), 2);

        manager.cancel_one(queued_id, &AutoPrompt(true)).await.unwrap();

        assert_eq!(manager.size(), 1);
        assert_eq!(manager.pool().active_count(), 1);

        let removed = loop {
            match next_event(&mut rx).await {
                QueueEvent::TaskRemoved { task_id, .. } => break task_id,
                _ => continue,
            }
        };
        assert_eq!(removed, queued_id);
    }

    #[tokio::test]
    async fn test_cancel_all_empties_the_queue() {
        let mut server = Server::new_async().await;
        let _mock = slow_media_mock(&mut server);

        let temp = tempfile::tempdir().unwrap();
        let (manager, mut rx) =
            QueueManager::with_pool(DownloadPool::new(1, 3), temp.path().to_path_buf());

        for name in ["a", "b", "c"] {
            manager.enqueue(descriptor(&server, name)).unwrap().unwrap();
        }
        assert_eq!(manager.size(), 3);

        manager.cancel_all(&AutoPrompt(true)).await;

        // The queued tasks are removed synchronously; the running one
        // leaves once its cancelled notification arrives.
        let mut gone = 0;
        while gone < 3 {
            match next_event(&mut rx).await {
                QueueEvent::TaskRemoved { .. } | QueueEvent::TaskCancelled { .. } => gone += 1,
                _ => continue,
            }
        }
        assert_eq!(manager.size(), 0);
        assert_eq!(manager.pool().active_count(), 0);
        assert_eq!(manager.error_count(), 0);
    }
}
