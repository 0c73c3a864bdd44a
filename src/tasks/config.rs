use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::tasks::channel::TickPayload;
use crate::tasks::error::TaskError;
use crate::tasks::promise::StopToken;
use crate::tasks::state::TaskKind;
use crate::tasks::task::Task;

pub(crate) type StartFn = Box<dyn FnMut(&Task) -> Result<(), TaskError> + Send>;
pub(crate) type RunFn = Box<dyn FnMut(&Task) -> Result<(), TaskError> + Send>;
pub(crate) type GoFn = Box<dyn FnMut(Task) -> BoxFuture<'static, Result<(), TaskError>> + Send>;
pub(crate) type DisposeFn = Box<dyn FnMut(&Task) + Send>;
pub(crate) type TickFn = Box<dyn FnMut(&Task, TickPayload) + Send>;
pub(crate) type ListenerFn = Box<dyn FnMut() + Send>;

/// Retry policy: `max_retry < 0` means unlimited, `0` means no budget (only
/// an explicit restart request is honored), positive bounds the retries on
/// top of the first attempt. `retry_interval` is the minimum spacing between
/// attempt start times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retry: i32,
    pub retry_interval: Duration,
    pub retry_count: u32,
}

impl Default for RetryConfig {
    fn default() -> RetryConfig {
        RetryConfig {
            max_retry: 0,
            retry_interval: Duration::ZERO,
            retry_count: 0,
        }
    }
}

/// Sibling-unique registration key. Defaults to the task's numeric ID when
/// the spec does not name one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Id(u32),
    Name(Arc<str>),
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKey::Id(id) => write!(f, "#{id}"),
            TaskKey::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for TaskKey {
    fn from(name: &str) -> TaskKey {
        TaskKey::Name(name.into())
    }
}

impl From<String> for TaskKey {
    fn from(name: String) -> TaskKey {
        TaskKey::Name(name.into())
    }
}

impl From<u32> for TaskKey {
    fn from(id: u32) -> TaskKey {
        TaskKey::Id(id)
    }
}

#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) start: Option<StartFn>,
    pub(crate) run: Option<RunFn>,
    pub(crate) go: Option<GoFn>,
    pub(crate) dispose: Option<DisposeFn>,
    pub(crate) tick: Option<TickFn>,
}

/// Which optional hooks a spec carries, captured once at registration so the
/// reactor never re-probes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Caps {
    pub(crate) start: bool,
    pub(crate) run: bool,
    pub(crate) go: bool,
    pub(crate) dispose: bool,
    pub(crate) tick: bool,
}

impl Caps {
    /// A child with any execution hook needs the owning reactor awake to
    /// drive it; a bare Job child can wait for its own first activation.
    pub(crate) fn has_exec_hooks(&self) -> bool {
        self.start || self.run || self.go
    }
}

/// Builder describing a task before registration: owner label, key, retry
/// policy, metadata, and the optional Start/Run/Go/Dispose/Tick hooks.
///
/// # Examples
///
/// ```
/// use tasktree::TaskSpec;
///
/// let spec = TaskSpec::new("Downloader")
///     .key("primary")
///     .retry(3, std::time::Duration::from_millis(500))
///     .go(|task| async move {
///         task.cancelled().await;
///         Ok(())
///     });
/// # let _ = spec;
/// ```
pub struct TaskSpec {
    pub(crate) owner: String,
    pub(crate) kind: TaskKind,
    pub(crate) key: Option<TaskKey>,
    pub(crate) retry: RetryConfig,
    pub(crate) metadata: Vec<(String, String)>,
    pub(crate) hooks: Hooks,
    pub(crate) start_listeners: Vec<ListenerFn>,
    pub(crate) dispose_listeners: Vec<ListenerFn>,
    pub(crate) linked_token: Option<StopToken>,
    pub(crate) tick_interval: Option<Duration>,
    pub(crate) signal_chan: Option<mpsc::Receiver<TickPayload>>,
    pub(crate) attachment: Option<Arc<dyn Any + Send + Sync>>,
}

impl TaskSpec {
    /// A plain task with the given owner-type label.
    pub fn new(owner: impl Into<String>) -> TaskSpec {
        TaskSpec {
            owner: owner.into(),
            kind: TaskKind::Task,
            key: None,
            retry: RetryConfig::default(),
            metadata: Vec::new(),
            hooks: Hooks::default(),
            start_listeners: Vec::new(),
            dispose_listeners: Vec::new(),
            linked_token: None,
            tick_interval: None,
            signal_chan: None,
            attachment: None,
        }
    }

    /// A Job: owns children and stops itself once they are all gone.
    pub fn job(owner: impl Into<String>) -> TaskSpec {
        let mut spec = TaskSpec::new(owner);
        spec.kind = TaskKind::Job;
        spec
    }

    /// A Work: a Job that stays alive after its children finish.
    pub fn work(owner: impl Into<String>) -> TaskSpec {
        let mut spec = TaskSpec::new(owner);
        spec.kind = TaskKind::Work;
        spec
    }

    /// Registration key; must be unique among siblings.
    pub fn key(mut self, key: impl Into<TaskKey>) -> TaskSpec {
        self.key = Some(key.into());
        self
    }

    /// Retry policy applied when the task fails with a non-terminal cause.
    pub fn retry(mut self, max_retry: i32, retry_interval: Duration) -> TaskSpec {
        self.retry.max_retry = max_retry;
        self.retry.retry_interval = retry_interval;
        self
    }

    /// Seed metadata visible in snapshots from the moment of registration.
    pub fn metadata(mut self, key: impl Into<String>, value: impl ToString) -> TaskSpec {
        self.metadata.push((key.into(), value.to_string()));
        self
    }

    /// Start hook: runs on the owning reactor before the task counts as
    /// started; an `Err` aborts the attempt and consults the retry policy.
    pub fn start(
        mut self,
        hook: impl FnMut(&Task) -> Result<(), TaskError> + Send + 'static,
    ) -> TaskSpec {
        self.hooks.start = Some(Box::new(hook));
        self
    }

    /// Blocking run hook: executes synchronously on the owning reactor, so a
    /// long run stalls every sibling queued on the same Job. `Ok(())` stops
    /// the task with the completion sentinel.
    pub fn run(
        mut self,
        hook: impl FnMut(&Task) -> Result<(), TaskError> + Send + 'static,
    ) -> TaskSpec {
        self.hooks.run = Some(Box::new(hook));
        self
    }

    /// Async run hook: spawned on an independent tokio task; its result (or
    /// the completion sentinel) settles the task when it finishes.
    pub fn go<F, Fut>(mut self, mut hook: F) -> TaskSpec
    where
        F: FnMut(Task) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.hooks.go = Some(Box::new(move |task| Box::pin(hook(task))));
        self
    }

    /// Dispose hook: runs during teardown, after children (if any) are gone.
    pub fn dispose(mut self, hook: impl FnMut(&Task) + Send + 'static) -> TaskSpec {
        self.hooks.dispose = Some(Box::new(hook));
        self
    }

    /// Tick hook for channel-style tasks: invoked on the owning reactor for
    /// every value the task's signal source delivers.
    pub fn tick(mut self, hook: impl FnMut(&Task, TickPayload) + Send + 'static) -> TaskSpec {
        self.hooks.tick = Some(Box::new(hook));
        if self.kind == TaskKind::Task {
            self.kind = TaskKind::Channel;
        }
        self
    }

    /// Periodic signal source: the reactor delivers a tick to the tick hook
    /// every `interval`, first tick one interval after start.
    pub fn interval(mut self, interval: Duration) -> TaskSpec {
        self.tick_interval = Some(interval);
        if self.kind == TaskKind::Task {
            self.kind = TaskKind::Channel;
        }
        self
    }

    /// Ad-hoc signal source: the reactor delivers every received value to
    /// the tick hook and tears the task down when the channel closes.
    pub fn channel(mut self, receiver: mpsc::Receiver<TickPayload>) -> TaskSpec {
        self.signal_chan = Some(receiver);
        if self.kind == TaskKind::Task {
            self.kind = TaskKind::Channel;
        }
        self
    }

    /// Listener fired after the task reaches `Started` (and again after each
    /// successful retry start).
    pub fn on_start(mut self, listener: impl FnMut() + Send + 'static) -> TaskSpec {
        self.start_listeners.push(Box::new(listener));
        self
    }

    /// Listener fired at the end of teardown, in registration order.
    pub fn on_dispose(mut self, listener: impl FnMut() + Send + 'static) -> TaskSpec {
        self.dispose_listeners.push(Box::new(listener));
        self
    }

    /// Overrides the cancellation parent: the task observes this token
    /// instead of the owning Job's.
    pub fn linked_token(mut self, token: StopToken) -> TaskSpec {
        self.linked_token = Some(token);
        self
    }

    /// Attaches a typed payload retrievable with [`Task::payload`] and used
    /// by [`Manager`](crate::Manager) for type-filtered lookup.
    pub fn attach<T: Send + Sync + 'static>(mut self, value: T) -> TaskSpec {
        self.attachment = Some(Arc::new(value));
        self
    }
}
