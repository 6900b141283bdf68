//! Engine-level error type.

use thiserror::Error;

use issuesync_client::RestError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    /// Ingress named a project group we have no context for. Rejected
    /// synchronously, nothing is enqueued.
    #[error("unknown project group '{0}'")]
    UnknownProjectGroup(String),

    /// The event kind carried identifiers we require but did not get.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A key belongs to a project this group does not replicate.
    #[error("no project context for key '{0}'")]
    UnknownProject(String),

    /// The dispatcher is shut down and accepts no further work.
    #[error("event queue is closed")]
    QueueClosed,

    /// Explicit capacity signal for non-blocking submission.
    #[error("event queue is full")]
    QueueFull,

    /// Remote call failed after retry policy was exhausted.
    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}
