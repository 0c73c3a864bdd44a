use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::select_all;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};

use crate::tasks::channel::{SignalSource, TickPayload};
use crate::tasks::error::TaskError;
use crate::tasks::job::Job;
use crate::tasks::task::{Task, panic_message, panics_propagated};

/// Control queue depth: newly started children and deferred callbacks beyond
/// this are rejected with the capacity cause, never queued further out.
pub(crate) const CONTROL_QUEUE_CAPACITY: usize = 20;

/// Hard cap on the live wait set of one reactor.
pub(crate) const MAX_WAIT_SET: usize = 65_535;

pub(crate) enum ControlItem {
    Child(Task),
    Call(Box<dyn FnOnce() + Send>),
}

/// Per-Job reactor plumbing: a bounded control queue and the activation
/// flag. The loop itself is lazily spawned and deactivates when idle; the
/// receiver sits behind an async mutex so a re-activated loop can only
/// proceed once its predecessor has fully exited.
pub(crate) struct EventLoop {
    tx: mpsc::Sender<ControlItem>,
    rx: Mutex<mpsc::Receiver<ControlItem>>,
    running: AtomicBool,
}

impl EventLoop {
    pub(crate) fn new() -> EventLoop {
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        EventLoop {
            tx,
            rx: Mutex::new(rx),
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enqueues an item, waking the reactor unless the item is a bare Job
    /// child: such a child has nothing to drive until its own first
    /// activation, which reaches this reactor through the parent chain.
    pub(crate) fn add(&self, job: &Job, item: ControlItem) -> Result<(), TaskError> {
        let should_activate = match &item {
            ControlItem::Call(_) => true,
            ControlItem::Child(child) => {
                !(child.as_job().is_some() && !child.core.caps.has_exec_hooks())
            }
        };
        self.tx
            .try_send(item)
            .map_err(|_| TaskError::TooManyChildren)?;
        if should_activate || job.is_stopped() {
            job.activate();
        }
        Ok(())
    }

    pub(crate) fn spawn_if_idle(&self, job: &Job) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tokio::spawn(run_event_loop(job.clone()));
        }
    }

    fn try_deactivate(&self) -> bool {
        self.running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

enum LoopEvent {
    Control(ControlItem),
    Child(usize, ChildEvent),
}

enum ChildEvent {
    Tick(TickPayload),
    Closed,
}

/// One live wait-set slot. A slot with a signal source belongs to a
/// channel-style child (repeated ticks); without one, the only observable
/// event is the child's own stop.
struct ChildEntry {
    task: Task,
    source: Option<SignalSource>,
}

impl ChildEntry {
    fn is_channel(&self) -> bool {
        self.source.is_some()
    }

    async fn next_event(&mut self) -> ChildEvent {
        let token = self.task.token();
        match &mut self.source {
            None => {
                token.cancelled().await;
                ChildEvent::Closed
            }
            Some(SignalSource::Interval(ticker)) => {
                tokio::select! {
                    _ = token.cancelled() => ChildEvent::Closed,
                    instant = ticker.tick() => ChildEvent::Tick(Box::new(instant)),
                }
            }
            Some(SignalSource::Channel(receiver)) => {
                tokio::select! {
                    _ = token.cancelled() => ChildEvent::Closed,
                    value = receiver.recv() => match value {
                        Some(payload) => ChildEvent::Tick(payload),
                        None => ChildEvent::Closed,
                    },
                }
            }
        }
    }
}

/// The dynamic multi-wait: races every live child's next event. Futures are
/// rebuilt per wake, which is what lets the set change between wakes.
async fn next_child_event(children: &mut [ChildEntry]) -> (usize, ChildEvent) {
    let events: Vec<_> = children
        .iter_mut()
        .map(|entry| Box::pin(entry.next_event()))
        .collect();
    let (event, index, _) = select_all(events).await;
    (index, event)
}

/// The reactor task of one Job. Holds the control receiver for its whole
/// lifetime; a panic anywhere in the body is contained and converted into a
/// normal stop on the owning Job unless `propagate_panics` is set. On exit a
/// non-keepalive Job auto-stops, chaining the reason of the child it was
/// last driving.
pub(crate) async fn run_event_loop(job: Job) {
    debug!(job_id = job.id(), owner = %job.owner_type(), "event loop start");
    {
        let mut rx = job.core().event_loop.rx.lock().await;
        if panics_propagated() {
            event_loop_body(&job, &mut rx).await;
        } else if let Err(payload) =
            AssertUnwindSafe(event_loop_body(&job, &mut rx)).catch_unwind().await
        {
            let message = panic_message(payload);
            error!(job_id = job.id(), error = %message, "job panic");
            job.stop(TaskError::Fault { message });
        }
    }
    debug!(job_id = job.id(), owner = %job.owner_type(), "event loop exit");
    if !job.keepalive() {
        let source = job
            .blocked()
            .and_then(|blocked| blocked.stop_reason())
            .map(Box::new);
        job.stop(TaskError::AutoStop { source });
    }
    job.set_blocked(None);
}

async fn event_loop_body(job: &Job, rx: &mut mpsc::Receiver<ControlItem>) {
    let mut children: Vec<ChildEntry> = Vec::new();
    loop {
        if rx.is_empty() && children.is_empty() && job.core().event_loop.try_deactivate() {
            if !rx.is_empty() {
                // An enqueue raced the exit; hand the queue to a fresh loop.
                job.activate();
            }
            return;
        }
        job.set_blocked(None);

        let event = if children.is_empty() {
            match rx.recv().await {
                Some(item) => LoopEvent::Control(item),
                None => {
                    debug!(job_id = job.id(), "control channel closed");
                    job.stop(TaskError::AutoStop { source: None });
                    return;
                }
            }
        } else {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(item) => LoopEvent::Control(item),
                    None => {
                        debug!(job_id = job.id(), "control channel closed");
                        job.stop(TaskError::AutoStop { source: None });
                        return;
                    }
                },
                (index, event) = next_child_event(&mut children) => {
                    LoopEvent::Child(index, event)
                }
            }
        };

        match event {
            LoopEvent::Control(ControlItem::Call(callback)) => callback(),
            LoopEvent::Control(ControlItem::Child(child)) => {
                if children.len() >= MAX_WAIT_SET {
                    warn!(
                        count = children.len(),
                        job_id = job.id(),
                        task_id = child.id(),
                        "too many live children, rejecting"
                    );
                    child.stop(TaskError::TooManyChildren);
                    continue;
                }
                job.set_blocked(Some(&child));
                if child.start().await {
                    let source = child.take_signal_source();
                    children.push(ChildEntry {
                        task: child.clone(),
                        source,
                    });
                    job.on_child_start(&child);
                } else {
                    job.remove_child(&child);
                }
            }
            LoopEvent::Child(index, child_event) => {
                let child = children[index].task.clone();
                job.set_blocked(Some(&child));
                if children[index].is_channel() {
                    match child_event {
                        ChildEvent::Tick(payload) => child.tick(payload),
                        ChildEvent::Closed => {
                            if !child.is_stopped() {
                                child.stop(TaskError::Complete);
                            }
                            job.on_child_dispose(&child).await;
                            job.remove_child(&child);
                            children.remove(index);
                        }
                    }
                } else {
                    // A plain child's only event is its stop.
                    job.on_child_dispose(&child).await;
                    let reason = child.stop_reason().unwrap_or(TaskError::Disposed);
                    if child.check_retry(&reason).await {
                        child.reset();
                        if child.start().await {
                            // Restarted in place: the slot is reused, only
                            // the signal source needs rebuilding.
                            children[index].source = child.take_signal_source();
                            job.on_child_start(&child);
                            continue;
                        }
                    }
                    job.remove_child(&child);
                    children.remove(index);
                }
            }
        }
    }
}
