use std::collections::HashMap;
use std::time::SystemTime;

use crate::tasks::error::TaskError;
use crate::tasks::state::{TaskKind, TaskState};
use crate::tasks::task::Task;

/// Serializable snapshot of one task, with its structural children and the
/// child currently holding its reactor's attention. This recursive node is
/// the only shape external observers (dashboards, persistence) need from
/// the core.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: u32,
    pub kind: TaskKind,
    pub owner: String,
    pub state: TaskState,
    pub level: u8,
    pub start_time: Option<SystemTime>,
    pub start_reason: String,
    pub stop_reason: Option<String>,
    pub metadata: HashMap<String, String>,
    pub retry_count: u32,
    pub max_retry: i32,
    pub event_loop_running: bool,
    pub blocked: Option<Box<TaskInfo>>,
    pub children: Vec<TaskInfo>,
}

impl TaskInfo {
    /// Materializes the subtree rooted at `task`, depth-first.
    pub fn snapshot(task: &Task) -> TaskInfo {
        let (children, blocked, event_loop_running) = match task.as_job() {
            Some(job) => {
                let mut children = Vec::new();
                job.range_children(|child| {
                    children.push(TaskInfo::snapshot(child));
                    true
                });
                let blocked = job
                    .blocked()
                    .map(|blocked| Box::new(TaskInfo::snapshot(&blocked)));
                (children, blocked, job.event_loop_running())
            }
            None => (Vec::new(), None, false),
        };
        TaskInfo {
            id: task.id(),
            kind: task.kind(),
            owner: task.owner_type(),
            state: task.state(),
            level: task.level(),
            start_time: task.start_time(),
            start_reason: task.start_reason(),
            stop_reason: task.stop_reason().map(|cause| cause.to_string()),
            metadata: task.metadata(),
            retry_count: task.retry_count(),
            max_retry: task.max_retry(),
            event_loop_running,
            blocked,
            children,
        }
    }
}

/// Aggregate counters over a live subtree.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub retries: u64,
}

impl TaskStats {
    pub fn collect(task: &Task) -> TaskStats {
        let mut stats = TaskStats::default();
        visit(task, &mut stats);
        stats
    }
}

fn visit(task: &Task, stats: &mut TaskStats) {
    stats.total += 1;
    stats.retries += u64::from(task.retry_count());
    let state = task.state();
    if state.is_live() {
        stats.running += 1;
    }
    if state == TaskState::Disposed {
        match task.stop_reason() {
            Some(
                TaskError::Complete
                | TaskError::AutoStop { .. }
                | TaskError::StopByUser
                | TaskError::Exit,
            ) => stats.completed += 1,
            _ => stats.failed += 1,
        }
    }
    if let Some(job) = task.as_job() {
        job.range_children(|child| {
            visit(child, stats);
            true
        });
    }
}
