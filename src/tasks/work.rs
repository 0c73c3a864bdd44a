use std::marker::PhantomData;
use std::sync::Arc;

use crate::tasks::config::{TaskKey, TaskSpec};
use crate::tasks::job::Job;
use crate::tasks::read;
use crate::tasks::state::TaskKind;
use crate::tasks::task::Task;

/// Builds a parentless Job/Work handle: root cancellation token, settled
/// startup, ready to accept children. Root and Manager bootstrap through
/// this.
pub(crate) fn detached(owner: &str, kind: TaskKind) -> Job {
    let spec = match kind {
        TaskKind::Work => TaskSpec::work(owner),
        _ => TaskSpec::job(owner),
    };
    let task = Task::from_spec(spec);
    task.init_detached();
    match task.as_job() {
        Some(job) => job,
        None => unreachable!("detached spec is always a job"),
    }
}

/// A detached, typed Work collection: a keepalive registry addressing tasks
/// by application key rather than task ID.
///
/// Lookup is type-filtered: only children carrying a `T` attachment (see
/// [`TaskSpec::attach`]) in the live state band (at least started, not yet
/// disposing) are visible; stale or foreign entries are silently skipped.
///
/// # Examples
///
/// ```
/// use tasktree::{Manager, TaskSpec};
///
/// struct Session {
///     user: String,
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let sessions: Manager<Session> = Manager::new();
/// let task = sessions.job().add_task(
///     TaskSpec::new("Session").key("alice").attach(Session {
///         user: "alice".into(),
///     }),
/// );
/// task.wait_started().await.unwrap();
///
/// let found = sessions.get(&"alice".into()).expect("registered");
/// assert_eq!(found.payload::<Session>().unwrap().user, "alice");
/// # }
/// ```
pub struct Manager<T> {
    job: Job,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Manager<T> {
    pub fn new() -> Manager<T> {
        Manager {
            job: detached("Manager", TaskKind::Work),
            _marker: PhantomData,
        }
    }

    /// The underlying Work for registration and supervision.
    pub fn job(&self) -> &Job {
        &self.job
    }

    fn typed(&self, task: &Task) -> Option<Arc<T>> {
        if !task.state().is_live() {
            return None;
        }
        task.payload::<T>()
    }

    /// The live, typed task registered under `key`.
    pub fn get(&self, key: &TaskKey) -> Option<Task> {
        let task = read(&self.job.core().children).get(key).cloned()?;
        self.typed(&task).map(|_| task)
    }

    pub fn has(&self, key: &TaskKey) -> bool {
        self.get(key).is_some()
    }

    /// First live task whose payload satisfies `predicate`.
    pub fn find(&self, mut predicate: impl FnMut(&T, &Task) -> bool) -> Option<Task> {
        let mut found = None;
        self.job.range_children(|task| {
            if let Some(payload) = self.typed(task) {
                if predicate(&payload, task) {
                    found = Some(task.clone());
                    return false;
                }
            }
            true
        });
        found
    }

    /// Iterates live typed entries; return `false` to stop early.
    pub fn range(&self, mut callback: impl FnMut(Arc<T>, &Task) -> bool) {
        self.job.range_children(|task| {
            match self.typed(task) {
                Some(payload) => callback(payload, task),
                None => true,
            }
        });
    }

    pub fn to_list(&self) -> Vec<Task> {
        let mut list = Vec::new();
        self.range(|_, task| {
            list.push(task.clone());
            true
        });
        list
    }

    /// Count of live typed entries.
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.range(|_, _| {
            count += 1;
            true
        });
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + Sync + 'static> Default for Manager<T> {
    fn default() -> Manager<T> {
        Manager::new()
    }
}
