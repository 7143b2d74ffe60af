//! Background task core for searching a photo provider and downloading photos
//!
//! The presentation layer talks to a [`TaskScheduler`]: it starts searches and
//! downloads and drains an [`EventReceiver`] for thumbnails, progress and
//! outcomes. Network and disk work never runs on the caller's context.

pub mod config;
pub mod download;
pub mod error;
pub mod event;
pub mod http;
pub mod scheduler;
pub mod search;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use download::{file_name_for, DownloadRequest, Transfer};
pub use error::{ConfigError, FetchError, TaskError};
pub use event::{TaskEvent, TaskHandle, TaskId, TaskKind};
pub use http::{ChunkStream, Fetcher, HttpFetcher};
pub use scheduler::{EventReceiver, TaskScheduler};
pub use search::{PhotoCandidate, SearchQuery};

/// Task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Handed out, not yet picked up by the runtime
    Created,
    /// Working
    Running,
    /// Finished with its terminal event
    Completed,
    /// Download ended in `DownloadFailed`
    Failed,
    /// Search replaced by a newer one before finishing
    Superseded,
}

impl TaskState {
    /// Returns true if no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Superseded
        )
    }

    /// Returns true if moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Created, TaskState::Running) => true,
            // a task may finish or be replaced before the runtime ever polls it
            (
                TaskState::Created | TaskState::Running,
                TaskState::Completed | TaskState::Failed | TaskState::Superseded,
            ) => true,
            _ => false,
        }
    }
}
