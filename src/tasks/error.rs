use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::tasks::task::Task;

/// Definitive cause a task stopped, carried as data rather than unwound as
/// control flow.
///
/// Every stopped task holds exactly one `TaskError`; observers read it back
/// from the task handle, its settlements, or a [`TaskInfo`](crate::TaskInfo)
/// snapshot at any point after the fact. The variants `Complete`, `Exit` and
/// `StopByUser` are terminal: the retry policy never restarts a task that
/// stopped with one of them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// Normal completion sentinel. A blocking or async run hook returning
    /// `Ok(())` stops its task with this cause.
    #[error("complete")]
    Complete,

    /// A non-keepalive Job ran out of live children and control items and
    /// stopped itself, chaining the reason of the last child it was driving.
    #[error("auto stop")]
    AutoStop { source: Option<Box<TaskError>> },

    /// The retry budget is spent.
    #[error("retry out")]
    RetryExhausted,

    /// An external caller requested the stop.
    #[error("stop by user")]
    StopByUser,

    /// Explicit restart request; the only cause a zero-budget retry policy
    /// will restart on.
    #[error("restart")]
    Restart,

    #[error("timeout")]
    Timeout,

    /// Process-wide shutdown.
    #[error("exit")]
    Exit,

    /// A contained panic, from a hook or from reactor internals.
    #[error("panic: {message}")]
    Fault { message: String },

    /// The owning reactor is at capacity; the child was rejected, not queued.
    #[error("too many children in job")]
    TooManyChildren,

    /// The operation targeted a task that is already torn down.
    #[error("disposed")]
    Disposed,

    /// Registration key collision; carries the task already holding the key.
    #[error("task key already exists")]
    AlreadyExists { existing: Task },

    /// Hook-supplied failure.
    #[error("{message}")]
    Failed { message: Arc<str> },
}

impl TaskError {
    /// Builds a [`TaskError::Failed`] from any displayable error value.
    pub fn custom(message: impl ToString) -> Self {
        TaskError::Failed {
            message: message.to_string().into(),
        }
    }

    /// True for the causes the retry policy treats as final: normal
    /// completion, process exit, and user-requested stop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskError::Complete | TaskError::Exit | TaskError::StopByUser
        )
    }
}

impl From<io::Error> for TaskError {
    fn from(err: io::Error) -> Self {
        TaskError::custom(err)
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::Failed {
            message: message.into(),
        }
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::Failed {
            message: message.into(),
        }
    }
}
