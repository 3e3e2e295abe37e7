//! Concurrent download orchestration
//!
//! [`task`] runs a single chunked transfer with pause/resume and
//! cooperative cancellation, [`pool`] bounds how many run at once, and
//! [`queue`] ties them together behind the registry and event stream the
//! presentation layer talks to.

pub mod pool;
pub mod queue;
pub mod task;

pub use pool::{DownloadPool, DEFAULT_MAX_ACTIVE, DEFAULT_MAX_OUTSTANDING};
pub use queue::{CancelPrompt, QueueEvent, QueueManager};
pub use task::{DownloadTask, TaskEvent, TaskEventKind, TaskId, CHUNK_SIZE};
