use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::SystemTime;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::tasks::channel::{SignalSource, TickPayload, tick_interval};
use crate::tasks::config::{Caps, Hooks, ListenerFn, RetryConfig, TaskKey, TaskSpec};
use crate::tasks::error::TaskError;
use crate::tasks::job::{Job, JobCore};
use crate::tasks::promise::{Settlement, StopToken};
use crate::tasks::state::{TaskKind, TaskState};
use crate::tasks::{lock, read, write};

/// Metadata key whose value, when set, overrides the owner-type label.
pub const OWNER_TYPE_KEY: &str = "ownerType";

static NEXT_TASK_ID: Mutex<u32> = Mutex::new(0);
static PROPAGATE_PANICS: AtomicBool = AtomicBool::new(false);

pub(crate) fn next_task_id() -> u32 {
    let mut counter = NEXT_TASK_ID
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    *counter += 1;
    *counter
}

/// Process-wide debug switch: when enabled, panics in hooks and reactors
/// propagate instead of being contained as [`TaskError::Fault`] stops.
pub fn propagate_panics(enabled: bool) {
    PROPAGATE_PANICS.store(enabled, Ordering::Release);
}

pub(crate) fn panics_propagated() -> bool {
    PROPAGATE_PANICS.load(Ordering::Acquire)
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cancellation token plus both settlements; replaced wholesale by a retry
/// reset so stale waiters keep observing the attempt they were watching.
pub(crate) struct Ctl {
    pub(crate) token: StopToken,
    pub(crate) startup: Settlement,
    pub(crate) shutdown: Settlement,
}

impl Ctl {
    pub(crate) fn new(parent: Option<&StopToken>) -> Ctl {
        let token = match parent {
            Some(parent) => StopToken::child(parent),
            None => StopToken::root(),
        };
        Ctl {
            token,
            startup: Settlement::new(),
            shutdown: Settlement::new(),
        }
    }
}

pub(crate) enum Resource {
    Action(Box<dyn FnOnce() + Send>),
    Task(Task),
}

pub(crate) struct TaskCore {
    pub(crate) kind: TaskKind,
    pub(crate) owner: String,
    pub(crate) caps: Caps,
    id: AtomicU32,
    state: AtomicU8,
    level: AtomicU8,
    key: RwLock<Option<TaskKey>>,
    start_instant: RwLock<Option<Instant>>,
    started_at: RwLock<Option<SystemTime>>,
    start_reason: RwLock<String>,
    retry: Mutex<RetryConfig>,
    metadata: RwLock<HashMap<String, String>>,
    hooks: Mutex<Hooks>,
    ctl: RwLock<Ctl>,
    parent_token: RwLock<Option<StopToken>>,
    parent: RwLock<Option<Weak<TaskCore>>>,
    on_stop: Mutex<Vec<Resource>>,
    resources: Mutex<Vec<Resource>>,
    start_listeners: Mutex<Vec<ListenerFn>>,
    dispose_listeners: Mutex<Vec<ListenerFn>>,
    tick_interval: Option<std::time::Duration>,
    signal_chan: Mutex<Option<mpsc::Receiver<TickPayload>>>,
    attachment: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) job: Option<JobCore>,
}

/// Handle to one supervised task. Clones share the same underlying task;
/// equality is identity.
///
/// A handle is observation and control only: lifecycle transitions are
/// driven by the owning Job's reactor after [`Job::add_task`](crate::Job::add_task).
#[derive(Clone)]
pub struct Task {
    pub(crate) core: Arc<TaskCore>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("owner", &self.core.owner)
            .field("state", &self.state())
            .finish()
    }
}

impl Task {
    pub(crate) fn from_spec(spec: TaskSpec) -> Task {
        let caps = Caps {
            start: spec.hooks.start.is_some(),
            run: spec.hooks.run.is_some(),
            go: spec.hooks.go.is_some(),
            dispose: spec.hooks.dispose.is_some(),
            tick: spec.hooks.tick.is_some(),
        };
        let job = matches!(spec.kind, TaskKind::Job | TaskKind::Work)
            .then(|| JobCore::new(spec.kind == TaskKind::Work));
        let metadata = spec.metadata.into_iter().collect();
        Task {
            core: Arc::new(TaskCore {
                kind: spec.kind,
                owner: spec.owner,
                caps,
                id: AtomicU32::new(0),
                state: AtomicU8::new(TaskState::Init as u8),
                level: AtomicU8::new(0),
                key: RwLock::new(spec.key),
                start_instant: RwLock::new(None),
                started_at: RwLock::new(None),
                start_reason: RwLock::new(String::new()),
                retry: Mutex::new(spec.retry),
                metadata: RwLock::new(metadata),
                hooks: Mutex::new(spec.hooks),
                ctl: RwLock::new(Ctl::new(spec.linked_token.as_ref())),
                parent_token: RwLock::new(spec.linked_token),
                parent: RwLock::new(None),
                on_stop: Mutex::new(Vec::new()),
                resources: Mutex::new(Vec::new()),
                start_listeners: Mutex::new(spec.start_listeners),
                dispose_listeners: Mutex::new(spec.dispose_listeners),
                tick_interval: spec.tick_interval,
                signal_chan: Mutex::new(spec.signal_chan),
                attachment: spec.attachment,
                job,
            }),
        }
    }

    /// Wires a freshly built child into its owning Job: cancellation parent,
    /// identity, level, provenance.
    pub(crate) fn init_context(&self, parent: &Task, start_reason: String) {
        let parent_token = read(&self.core.parent_token)
            .clone()
            .unwrap_or_else(|| parent.token());
        *write(&self.core.parent) = Some(Arc::downgrade(&parent.core));
        self.core
            .level
            .store(parent.level().saturating_add(1), Ordering::Release);
        let id = self.ensure_id();
        if read(&self.core.key).is_none() {
            *write(&self.core.key) = Some(TaskKey::Id(id));
        }
        *write(&self.core.start_reason) = start_reason;
        *write(&self.core.ctl) = Ctl::new(Some(&parent_token));
        *write(&self.core.parent_token) = Some(parent_token);
    }

    /// Bootstraps a parentless task (Root, Manager): root token, settled
    /// startup so waiters resolve immediately.
    pub(crate) fn init_detached(&self) {
        self.ensure_id();
        let ctl = Ctl::new(None);
        ctl.startup.resolve();
        *write(&self.core.ctl) = ctl;
    }

    fn ensure_id(&self) -> u32 {
        let id = self.core.id.load(Ordering::Acquire);
        if id != 0 {
            return id;
        }
        let id = next_task_id();
        self.core.id.store(id, Ordering::Release);
        id
    }

    pub fn id(&self) -> u32 {
        self.core.id.load(Ordering::Acquire)
    }

    pub fn kind(&self) -> TaskKind {
        self.core.kind
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.core.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.core.state.store(state as u8, Ordering::Release);
    }

    pub fn level(&self) -> u8 {
        self.core.level.load(Ordering::Acquire)
    }

    /// Owner-type label; the `ownerType` metadata key overrides the spec's.
    pub fn owner_type(&self) -> String {
        if let Some(owner) = read(&self.core.metadata).get(OWNER_TYPE_KEY) {
            return owner.clone();
        }
        self.core.owner.clone()
    }

    pub fn key(&self) -> Option<TaskKey> {
        read(&self.core.key).clone()
    }

    /// Wall-clock time of the last start attempt.
    pub fn start_time(&self) -> Option<SystemTime> {
        *read(&self.core.started_at)
    }

    pub(crate) fn start_instant(&self) -> Option<Instant> {
        *read(&self.core.start_instant)
    }

    /// Caller-site provenance recorded at registration.
    pub fn start_reason(&self) -> String {
        read(&self.core.start_reason).clone()
    }

    pub fn parent(&self) -> Option<Task> {
        read(&self.core.parent)
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|core| Task { core })
    }

    pub(crate) fn parent_job(&self) -> Option<Job> {
        self.parent().and_then(|parent| parent.as_job())
    }

    /// The Job view of this task, when it is one.
    pub fn as_job(&self) -> Option<Job> {
        self.core.job.as_ref().map(|_| Job { task: self.clone() })
    }

    /// The payload attached by [`TaskSpec::attach`], when its type matches.
    pub fn payload<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.core.attachment.clone()?.downcast::<T>().ok()
    }

    pub fn metadata(&self) -> HashMap<String, String> {
        read(&self.core.metadata).clone()
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        read(&self.core.metadata).get(key).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl ToString) {
        write(&self.core.metadata).insert(key.into(), value.to_string());
    }

    pub fn remove_metadata(&self, key: &str) {
        write(&self.core.metadata).remove(key);
    }

    /// Reconfigures the retry policy; effective from the next failure.
    pub fn set_retry(&self, max_retry: i32, retry_interval: std::time::Duration) {
        let mut retry = lock(&self.core.retry);
        retry.max_retry = max_retry;
        retry.retry_interval = retry_interval;
    }

    pub fn retry_count(&self) -> u32 {
        lock(&self.core.retry).retry_count
    }

    pub fn max_retry(&self) -> i32 {
        lock(&self.core.retry).max_retry
    }

    /// Clears the retry counter, reopening the full budget for future
    /// failures.
    pub fn reset_retry_count(&self) {
        lock(&self.core.retry).retry_count = 0;
    }

    pub(crate) fn token(&self) -> StopToken {
        read(&self.core.ctl).token.clone()
    }

    pub(crate) fn startup(&self) -> Settlement {
        read(&self.core.ctl).startup.clone()
    }

    pub(crate) fn shutdown(&self) -> Settlement {
        read(&self.core.ctl).shutdown.clone()
    }

    pub(crate) fn reject_startup(&self, cause: TaskError) {
        self.startup().reject(cause);
    }

    pub fn is_stopped(&self) -> bool {
        self.token().is_cancelled()
    }

    /// The definitive stop cause; `None` while the task is live.
    pub fn stop_reason(&self) -> Option<TaskError> {
        self.token().cause()
    }

    /// Resolves when stop has been requested (directly or via an ancestor).
    pub async fn cancelled(&self) {
        let token = self.token();
        token.cancelled().await;
    }

    /// Registers a listener fired right after the task reaches `Started`.
    pub fn on_start(&self, listener: impl FnMut() + Send + 'static) {
        lock(&self.core.start_listeners).push(Box::new(listener));
    }

    /// Registers a listener fired at the end of teardown.
    pub fn on_dispose(&self, listener: impl FnMut() + Send + 'static) {
        lock(&self.core.dispose_listeners).push(Box::new(listener));
    }

    /// Runs `action` the instant a stop is requested; the release path for
    /// blocking resources (listening sockets and the like) that must not
    /// wait for full teardown. Runs immediately when already stopped.
    pub fn on_stop(&self, action: impl FnOnce() + Send + 'static) {
        if self.is_stopped() {
            action();
            return;
        }
        lock(&self.core.on_stop).push(Resource::Action(Box::new(action)));
    }

    /// Stops `task` with this task's stop reason the instant a stop is
    /// requested. A self-reference is skipped.
    pub fn on_stop_task(&self, task: &Task) {
        if task == self {
            warn!(task_id = self.id(), "on_stop resource is the task itself, skipped");
            return;
        }
        if self.is_stopped() {
            task.stop(self.stop_reason().unwrap_or(TaskError::Disposed));
            return;
        }
        lock(&self.core.on_stop).push(Resource::Task(task.clone()));
    }

    /// Releases `action` during teardown, after the dispose hook, in
    /// registration order, at most once.
    pub fn using(&self, action: impl FnOnce() + Send + 'static) {
        lock(&self.core.resources).push(Resource::Action(Box::new(action)));
    }

    /// Stops `task` during teardown. A self-reference is skipped.
    pub fn using_task(&self, task: &Task) {
        if task == self {
            warn!(task_id = self.id(), "dispose resource is the task itself, skipped");
            return;
        }
        lock(&self.core.resources).push(Resource::Task(task.clone()));
    }

    /// Requests a stop with `reason`. Idempotent: only the first caller's
    /// reason takes effect; on-stop actions run exactly once.
    #[track_caller]
    pub fn stop(&self, reason: TaskError) {
        let caller = Location::caller();
        let (token, startup) = {
            let ctl = read(&self.core.ctl);
            (ctl.token.clone(), ctl.startup.clone())
        };
        if token.cancel(reason.clone()) {
            let message = if startup.is_rejected() {
                "task start failed"
            } else {
                "task stop"
            };
            let elapsed = self
                .start_instant()
                .map(|start| start.elapsed())
                .unwrap_or_default();
            debug!(
                caller = %caller,
                reason = %reason,
                elapsed = ?elapsed,
                task_id = self.id(),
                kind = %self.kind(),
                owner = %self.owner_type(),
                "{message}"
            );
        }
        // Draining makes the actions at-most-once even when the token was
        // already cancelled through an ancestor.
        self.run_stop_actions();
    }

    fn run_stop_actions(&self) {
        let actions = mem::take(&mut *lock(&self.core.on_stop));
        for resource in actions {
            match resource {
                Resource::Action(action) => action(),
                Resource::Task(task) => {
                    task.stop(self.stop_reason().unwrap_or(TaskError::Disposed));
                }
            }
        }
    }

    /// Resolves once the task reached `Started`, or with the cause that
    /// prevented it (registration rejection, start failure, early stop).
    pub async fn wait_started(&self) -> Result<(), TaskError> {
        let (startup, token) = {
            let ctl = read(&self.core.ctl);
            (ctl.startup.clone(), ctl.token.clone())
        };
        tokio::select! { biased;
            result = startup.wait() => result,
            _ = token.cancelled() => startup
                .peek()
                .unwrap_or_else(|| Err(token.cause().unwrap_or(TaskError::Disposed))),
        }
    }

    /// Resolves once the task is fully torn down, yielding the definitive
    /// stop cause; a task that never started yields its rejection instead.
    pub async fn wait_stopped(&self) -> TaskError {
        if let Err(cause) = self.wait_started().await {
            return cause;
        }
        let shutdown = self.shutdown();
        match shutdown.wait().await {
            Ok(()) => TaskError::Complete,
            Err(cause) => cause,
        }
    }

    /// Drives one registration through the attempt loop. Returns whether the
    /// task came up; on failure the retry policy decides how many times the
    /// loop repeats. Runs on the owning reactor.
    pub(crate) async fn start(&self) -> bool {
        loop {
            *write(&self.core.start_instant) = Some(Instant::now());
            *write(&self.core.started_at) = Some(SystemTime::now());
            debug!(
                task_id = self.id(),
                kind = %self.kind(),
                owner = %self.owner_type(),
                reason = %self.start_reason(),
                "task start"
            );
            self.set_state(TaskState::Starting);

            let mut failure: Option<TaskError> = None;
            if self.core.caps.start {
                failure = self.invoke_start_hook();
            }
            if failure.is_none() {
                self.set_state(TaskState::Started);
                self.startup().resolve();
                self.fire_start_listeners();
                if self.is_stopped() {
                    failure = Some(self.stop_reason().unwrap_or(TaskError::Disposed));
                } else if self.core.caps.run {
                    self.set_state(TaskState::Running);
                    debug!(
                        task_id = self.id(),
                        kind = %self.kind(),
                        owner = %self.owner_type(),
                        "task run"
                    );
                    failure = Some(match self.invoke_run_hook() {
                        Ok(()) => TaskError::Complete,
                        Err(cause) => cause,
                    });
                }
            }

            match failure {
                None => {
                    if self.core.caps.go {
                        self.set_state(TaskState::Going);
                        debug!(
                            task_id = self.id(),
                            kind = %self.kind(),
                            owner = %self.owner_type(),
                            "task go"
                        );
                        self.spawn_go();
                    }
                    return true;
                }
                Some(cause) => {
                    self.stop(cause.clone());
                    if let Some(parent) = self.parent_job() {
                        parent.on_child_dispose(self).await;
                    }
                    if self.check_retry(&cause).await {
                        self.reset();
                    } else {
                        return false;
                    }
                }
            }
        }
    }

    fn invoke_start_hook(&self) -> Option<TaskError> {
        let mut hooks = lock(&self.core.hooks);
        let hook = hooks.start.as_mut()?;
        if panics_propagated() {
            return hook(self).err();
        }
        match std::panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
            Ok(result) => result.err(),
            Err(payload) => {
                let message = panic_message(payload);
                error!(task_id = self.id(), error = %message, "start hook panic");
                Some(TaskError::Fault { message })
            }
        }
    }

    fn invoke_run_hook(&self) -> Result<(), TaskError> {
        let mut hooks = lock(&self.core.hooks);
        let Some(hook) = hooks.run.as_mut() else {
            return Ok(());
        };
        if panics_propagated() {
            return hook(self);
        }
        match std::panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload);
                error!(task_id = self.id(), error = %message, "run hook panic");
                Err(TaskError::Fault { message })
            }
        }
    }

    fn spawn_go(&self) {
        let future = {
            let mut hooks = lock(&self.core.hooks);
            let Some(hook) = hooks.go.as_mut() else {
                return;
            };
            hook(self.clone())
        };
        let task = self.clone();
        tokio::spawn(async move {
            let result = if panics_propagated() {
                future.await
            } else {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload);
                        error!(task_id = task.id(), error = %message, "go hook panic");
                        Err(TaskError::Fault { message })
                    }
                }
            };
            match result {
                Ok(()) => task.stop(TaskError::Complete),
                Err(cause) => task.stop(cause),
            }
        });
    }

    fn invoke_dispose_hook(&self) {
        let mut hooks = lock(&self.core.hooks);
        let Some(hook) = hooks.dispose.as_mut() else {
            return;
        };
        if panics_propagated() {
            hook(self);
            return;
        }
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
            let message = panic_message(payload);
            error!(task_id = self.id(), error = %message, "dispose hook panic");
        }
    }

    /// Delivers one signal-source value to the tick hook. A panic here is
    /// contained at the reactor boundary, not locally.
    pub(crate) fn tick(&self, payload: TickPayload) {
        let mut hooks = lock(&self.core.hooks);
        if let Some(hook) = hooks.tick.as_mut() {
            hook(self, payload);
        }
    }

    /// Installs the receiver a channel-style task's reactor will wait on;
    /// typically called from a start hook.
    pub fn set_signal_channel(&self, receiver: mpsc::Receiver<TickPayload>) {
        *lock(&self.core.signal_chan) = Some(receiver);
    }

    /// Collected by the reactor right after a successful start. Interval
    /// sources are rebuilt per attempt so retries tick on a fresh schedule.
    pub(crate) fn take_signal_source(&self) -> Option<SignalSource> {
        if let Some(receiver) = lock(&self.core.signal_chan).take() {
            return Some(SignalSource::Channel(receiver));
        }
        self.core
            .tick_interval
            .map(|interval| SignalSource::Interval(tick_interval(interval)))
    }

    /// Decides whether a failed task restarts: terminal causes and a stopped
    /// parent never retry; an unlimited or unspent budget retries after
    /// sleeping out the remainder of the configured interval; an exhausted
    /// positive budget fails; a zero budget honors only an explicit restart
    /// request.
    pub(crate) async fn check_retry(&self, cause: &TaskError) -> bool {
        if cause.is_terminal() {
            return false;
        }
        let parent_stopped = match self.parent() {
            Some(parent) => parent.is_stopped(),
            None => true,
        };
        if parent_stopped {
            return false;
        }
        let (max_retry, interval) = {
            let retry = lock(&self.core.retry);
            (retry.max_retry, retry.retry_interval)
        };
        let count = lock(&self.core.retry).retry_count;
        if max_retry < 0 || i64::from(count) < i64::from(max_retry) {
            let count = {
                let mut retry = lock(&self.core.retry);
                retry.retry_count += 1;
                retry.retry_count
            };
            self.set_metadata("retryCount", count);
            if max_retry < 0 {
                warn!(task_id = self.id(), "retry {count}/unlimited");
            } else {
                warn!(task_id = self.id(), "retry {count}/{max_retry}");
            }
            if let Some(started) = self.start_instant() {
                let elapsed = started.elapsed();
                if elapsed < interval {
                    tokio::time::sleep(interval - elapsed).await;
                }
            }
            true
        } else if max_retry > 0 {
            warn!(task_id = self.id(), "max retry {max_retry} failed");
            false
        } else {
            matches!(cause, TaskError::Restart)
        }
    }

    /// Rewinds to the pre-start state for another attempt: fresh token and
    /// settlements derived from the same cancellation parent, identity and
    /// retry counter preserved.
    pub(crate) fn reset(&self) {
        let parent_token = read(&self.core.parent_token).clone();
        *write(&self.core.ctl) = Ctl::new(parent_token.as_ref());
    }

    /// Tears the task down exactly once. Only a task that reached `Started`
    /// disposes; a Job first synchronously stops and awaits every child.
    pub(crate) async fn dispose(&self) {
        let mut current = self.core.state.load(Ordering::Acquire);
        loop {
            let state = TaskState::from_u8(current);
            if state < TaskState::Started {
                debug!(
                    task_id = self.id(),
                    kind = %self.kind(),
                    owner = %self.owner_type(),
                    state = %state,
                    "task dispose canceled"
                );
                return;
            }
            if state >= TaskState::Disposing {
                return;
            }
            match self.core.state.compare_exchange_weak(
                current,
                TaskState::Disposing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(now) => current = now,
            }
        }

        let reason = self.stop_reason().unwrap_or(TaskError::Complete);
        debug!(
            reason = %reason,
            task_id = self.id(),
            kind = %self.kind(),
            owner = %self.owner_type(),
            "task dispose"
        );
        if let Some(job) = self.as_job() {
            self.set_metadata("disposeProcess", "wait children");
            job.wait_children_dispose(reason.clone()).await;
        }
        self.set_metadata("disposeProcess", "self");
        self.invoke_dispose_hook();
        self.shutdown().reject(reason.clone());
        self.set_metadata("disposeProcess", "resources");
        // A stop that arrived only through ancestor token propagation never
        // ran the on-stop actions; drain whatever is left.
        self.run_stop_actions();
        let resources = mem::take(&mut *lock(&self.core.resources));
        for resource in resources {
            match resource {
                Resource::Action(action) => action(),
                Resource::Task(task) => task.stop(reason.clone()),
            }
        }
        self.fire_dispose_listeners();
        self.set_metadata("disposeProcess", "done");
        self.set_state(TaskState::Disposed);
        debug!(
            reason = %reason,
            task_id = self.id(),
            kind = %self.kind(),
            owner = %self.owner_type(),
            "task disposed"
        );
    }

    fn fire_start_listeners(&self) {
        let mut taken = mem::take(&mut *lock(&self.core.start_listeners));
        for listener in taken.iter_mut() {
            if self.is_stopped() {
                break;
            }
            listener();
        }
        // Listeners registered while iterating go behind the survivors.
        let mut listeners = lock(&self.core.start_listeners);
        let added = mem::take(&mut *listeners);
        taken.extend(added);
        *listeners = taken;
    }

    fn fire_dispose_listeners(&self) {
        let mut taken = mem::take(&mut *lock(&self.core.dispose_listeners));
        let total = taken.len();
        for (index, listener) in taken.iter_mut().enumerate() {
            self.set_metadata("disposeProcess", format!("a:{index}/{total}"));
            listener();
        }
        let mut listeners = lock(&self.core.dispose_listeners);
        let added = mem::take(&mut *listeners);
        taken.extend(added);
        *listeners = taken;
    }
}
