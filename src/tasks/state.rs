use std::fmt;

/// Lifecycle states, in the order a task moves through them.
///
/// Transitions only advance, with one exception: a retry resets a failed
/// task back to `Starting` while its identity and retry counters persist.
/// A task with neither a blocking nor an async run hook parks at `Started`
/// until it is stopped from outside.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskState {
    Init = 0,
    Starting = 1,
    Started = 2,
    /// Executing its blocking run hook on the owning reactor.
    Running = 3,
    /// Its async run hook is executing on an independent tokio task.
    Going = 4,
    Disposing = 5,
    Disposed = 6,
}

impl TaskState {
    pub(crate) fn from_u8(value: u8) -> TaskState {
        match value {
            0 => TaskState::Init,
            1 => TaskState::Starting,
            2 => TaskState::Started,
            3 => TaskState::Running,
            4 => TaskState::Going,
            5 => TaskState::Disposing,
            _ => TaskState::Disposed,
        }
    }

    /// At least started, not yet tearing down.
    pub fn is_live(&self) -> bool {
        *self >= TaskState::Started && *self < TaskState::Disposing
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Init => "init",
            TaskState::Starting => "starting",
            TaskState::Started => "started",
            TaskState::Running => "running",
            TaskState::Going => "going",
            TaskState::Disposing => "disposing",
            TaskState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Kind tag distinguishing plain tasks, child-owning Jobs, keepalive Works,
/// and channel-style tasks that consume repeated ticks.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Task,
    Job,
    Work,
    Channel,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Task => "task",
            TaskKind::Job => "job",
            TaskKind::Work => "work",
            TaskKind::Channel => "channel",
        };
        f.write_str(name)
    }
}
