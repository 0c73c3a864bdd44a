use std::collections::HashMap;
use std::mem;
use std::ops::Deref;
use std::panic::Location;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use crate::tasks::config::{TaskKey, TaskSpec};
use crate::tasks::error::TaskError;
use crate::tasks::event_loop::{ControlItem, EventLoop};
use crate::tasks::task::Task;
use crate::tasks::{lock, read, write};

type DescendantListener = Box<dyn FnMut(&Task) + Send>;

/// Job-only state embedded in a task core: the keyed children registry, the
/// reactor, and the descendant listener lists.
///
/// Structural registry writes happen only on the owning reactor (or on the
/// single `add_task`/`dispose` caller driving it); reads are concurrent
/// snapshots from any thread.
pub(crate) struct JobCore {
    pub(crate) children: RwLock<HashMap<TaskKey, Task>>,
    pub(crate) size: AtomicI32,
    pub(crate) keepalive: bool,
    pub(crate) blocked: RwLock<Option<Task>>,
    pub(crate) event_loop: EventLoop,
    descendant_start_listeners: Mutex<Vec<DescendantListener>>,
    descendant_dispose_listeners: Mutex<Vec<DescendantListener>>,
}

impl JobCore {
    pub(crate) fn new(keepalive: bool) -> JobCore {
        JobCore {
            children: RwLock::new(HashMap::new()),
            size: AtomicI32::new(0),
            keepalive,
            blocked: RwLock::new(None),
            event_loop: EventLoop::new(),
            descendant_start_listeners: Mutex::new(Vec::new()),
            descendant_dispose_listeners: Mutex::new(Vec::new()),
        }
    }
}

/// A task that owns and supervises children, driving them through its
/// reactor. Derefs to [`Task`] for the shared per-task surface.
#[derive(Clone)]
pub struct Job {
    pub(crate) task: Task,
}

impl Deref for Job {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.task
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Job) -> bool {
        self.task == other.task
    }
}

impl Eq for Job {}

impl Job {
    pub(crate) fn core(&self) -> &JobCore {
        match self.task.core.job {
            Some(ref core) => core,
            None => unreachable!("job handle over a task without job state"),
        }
    }

    /// The task view of this Job.
    pub fn as_task(&self) -> &Task {
        &self.task
    }

    pub(crate) fn keepalive(&self) -> bool {
        self.core().keepalive
    }

    /// Registers `spec` as a child: assigns identity and cancellation
    /// parent, records provenance, inserts it by key, and enqueues it on the
    /// reactor. The returned handle's settlements carry any rejection
    /// (duplicate key, stopped Job, reactor at capacity).
    #[track_caller]
    pub fn add_task(&self, spec: TaskSpec) -> Task {
        let caller = Location::caller();
        let child = self.init_child(spec, format!("{}:{}", caller.file(), caller.line()));
        self.insert_and_enqueue(child)
    }

    /// Like [`Job::add_task`], but the owning Job lives only as long as the
    /// child: when the child disposes, the Job is stopped with its reason.
    #[track_caller]
    pub fn add_depend_task(&self, spec: TaskSpec) -> Task {
        let caller = Location::caller();
        let child = self.init_child(spec, format!("{}:{}", caller.file(), caller.line()));
        child.using_task(&self.task);
        self.insert_and_enqueue(child)
    }

    /// Runs one child to completion in place, bypassing the keyed registry:
    /// starts it on the calling task, awaits its stop, tears it down, and
    /// returns the definitive cause.
    pub async fn run_task(&self, spec: TaskSpec) -> TaskError {
        let child = self.init_child(spec, "run_task".to_string());
        if self.is_stopped() {
            let cause = self.stop_reason().unwrap_or(TaskError::Disposed);
            child.reject_startup(cause.clone());
            return cause;
        }
        self.on_stop_task(&child);
        let started = child.start().await;
        child.cancelled().await;
        if started {
            child.dispose().await;
        }
        child.stop_reason().unwrap_or(TaskError::Disposed)
    }

    pub(crate) fn init_child(&self, spec: TaskSpec, start_reason: String) -> Task {
        let child = Task::from_spec(spec);
        child.init_context(&self.task, start_reason);
        child
    }

    fn insert_and_enqueue(&self, child: Task) -> Task {
        if self.is_stopped() {
            child.reject_startup(self.stop_reason().unwrap_or(TaskError::Disposed));
            return child;
        }
        let Some(key) = child.key() else {
            child.reject_startup(TaskError::Disposed);
            return child;
        };
        {
            let mut children = write(&self.core().children);
            if let Some(existing) = children.get(&key) {
                child.reject_startup(TaskError::AlreadyExists {
                    existing: existing.clone(),
                });
                return child;
            }
            children.insert(key.clone(), child.clone());
        }
        if let Err(cause) = self
            .core()
            .event_loop
            .add(self, ControlItem::Child(child.clone()))
        {
            write(&self.core().children).remove(&key);
            child.reject_startup(cause);
            return child;
        }
        if self.is_stopped() {
            write(&self.core().children).remove(&key);
            child.reject_startup(self.stop_reason().unwrap_or(TaskError::Disposed));
            return child;
        }
        let remains = self.core().size.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(task_id = child.id(), remains, "child added");
        child
    }

    /// Runs `callback` with exclusive access to Job-owned state: queued onto
    /// the reactor, or executed inline when no child is live (nothing can be
    /// racing then). Resolves when the callback ran, or with the Job's stop
    /// reason if it stopped first. Must not be called from the owning
    /// reactor itself.
    pub async fn call(&self, callback: impl FnOnce() + Send + 'static) -> Result<(), TaskError> {
        if self.core().size.load(Ordering::Acquire) <= 0 {
            callback();
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        let item = ControlItem::Call(Box::new(move || {
            callback();
            let _ = done_tx.send(());
        }));
        self.core().event_loop.add(self, item)?;
        let token = self.token();
        tokio::select! { biased;
            _ = done_rx => Ok(()),
            _ = token.cancelled() => Err(self.stop_reason().unwrap_or(TaskError::Disposed)),
        }
    }

    /// One-shot iteration over the current children snapshot; return `false`
    /// from the callback to stop early.
    pub fn range_children(&self, mut callback: impl FnMut(&Task) -> bool) {
        let snapshot: Vec<Task> = read(&self.core().children).values().cloned().collect();
        for child in &snapshot {
            if !callback(child) {
                break;
            }
        }
    }

    /// Number of registered children.
    pub fn child_count(&self) -> usize {
        self.core().size.load(Ordering::Acquire).max(0) as usize
    }

    /// The child currently holding the reactor's attention, if any.
    pub fn blocked(&self) -> Option<Task> {
        read(&self.core().blocked).clone()
    }

    pub(crate) fn set_blocked(&self, child: Option<&Task>) {
        *write(&self.core().blocked) = child.cloned();
    }

    /// Whether the reactor task is currently active.
    pub fn event_loop_running(&self) -> bool {
        self.core().event_loop.is_running()
    }

    /// Listener invoked for every task that starts anywhere in this Job's
    /// subtree; events bubble through every ancestor.
    pub fn on_descendant_start(&self, listener: impl FnMut(&Task) + Send + 'static) {
        lock(&self.core().descendant_start_listeners).push(Box::new(listener));
    }

    /// Listener invoked for every task disposed anywhere in this Job's
    /// subtree; events bubble through every ancestor.
    pub fn on_descendant_dispose(&self, listener: impl FnMut(&Task) + Send + 'static) {
        lock(&self.core().descendant_dispose_listeners).push(Box::new(listener));
    }

    /// Activates the reactor, parent chain first: a Job's own completion is
    /// just another signal source to its parent, so ancestors must be
    /// listening before this Job wakes.
    pub(crate) fn activate(&self) {
        if let Some(parent) = self.parent_job() {
            parent.activate();
        }
        self.core().event_loop.spawn_if_idle(self);
    }

    pub(crate) fn on_child_start(&self, child: &Task) {
        self.notify_descendant_start(child);
    }

    pub(crate) async fn on_child_dispose(&self, child: &Task) {
        self.notify_descendant_dispose(child);
        child.dispose().await;
    }

    fn notify_descendant_start(&self, descendant: &Task) {
        fire_descendant_listeners(&self.core().descendant_start_listeners, descendant);
        if let Some(parent) = self.parent_job() {
            parent.notify_descendant_start(descendant);
        }
    }

    fn notify_descendant_dispose(&self, descendant: &Task) {
        fire_descendant_listeners(&self.core().descendant_dispose_listeners, descendant);
        if let Some(parent) = self.parent_job() {
            parent.notify_descendant_dispose(descendant);
        }
    }

    pub(crate) fn remove_child(&self, child: &Task) {
        let Some(key) = child.key() else {
            return;
        };
        let removed = {
            let mut children = write(&self.core().children);
            match children.get(&key) {
                Some(existing) if existing == child => children.remove(&key).is_some(),
                _ => false,
            }
        };
        if removed {
            let remains = self.core().size.fetch_sub(1, Ordering::AcqRel) - 1;
            debug!(task_id = child.id(), remains, "remove child");
        }
    }

    /// Depth-first synchronous teardown: stops every child with `reason` and
    /// awaits its full disposal, with the reactor awake to drive the
    /// removals.
    pub(crate) async fn wait_children_dispose(&self, reason: TaskError) {
        self.activate();
        let children: Vec<Task> = read(&self.core().children).values().cloned().collect();
        for child in children {
            child.stop(reason.clone());
            child.wait_stopped().await;
        }
    }
}

fn fire_descendant_listeners(listeners: &Mutex<Vec<DescendantListener>>, descendant: &Task) {
    let mut taken = mem::take(&mut *lock(listeners));
    for listener in taken.iter_mut() {
        listener(descendant);
    }
    let mut guard = lock(listeners);
    let added = mem::take(&mut *guard);
    taken.extend(added);
    *guard = taken;
}
