//! Events delivered to the presentation layer and the handles that tag them

use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;

/// Unique, monotonically increasing task identifier
///
/// A search's id doubles as its generation: the scheduler only delivers
/// search events whose id matches the currently active search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Search,
    Download,
}

/// Opaque handle returned when a task is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, kind: TaskKind) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TaskKind::Search => write!(f, "search#{}", self.id),
            TaskKind::Download => write!(f, "download#{}", self.id),
        }
    }
}

/// Everything the core tells its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// A validated thumbnail; the bytes now belong to the consumer
    ThumbnailReady {
        handle: TaskHandle,
        image: Bytes,
        full_url: String,
    },
    /// Terminal search event with the number of thumbnails emitted
    SearchCompleted { handle: TaskHandle, loaded: usize },
    /// `percent` is `None` when the total size is unknown
    DownloadProgress {
        handle: TaskHandle,
        percent: Option<u8>,
        downloaded: u64,
    },
    DownloadCompleted { handle: TaskHandle, path: PathBuf },
    DownloadFailed { handle: TaskHandle, reason: String },
}

impl TaskEvent {
    /// Handle of the task that produced this event
    pub fn handle(&self) -> TaskHandle {
        match self {
            TaskEvent::ThumbnailReady { handle, .. }
            | TaskEvent::SearchCompleted { handle, .. }
            | TaskEvent::DownloadProgress { handle, .. }
            | TaskEvent::DownloadCompleted { handle, .. }
            | TaskEvent::DownloadFailed { handle, .. } => *handle,
        }
    }

    /// Returns true for the last event a task emits
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::SearchCompleted { .. }
                | TaskEvent::DownloadCompleted { .. }
                | TaskEvent::DownloadFailed { .. }
        )
    }
}
