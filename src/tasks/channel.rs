use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

use crate::tasks::config::TaskSpec;
use crate::tasks::lock;
use crate::tasks::task::Task;

/// Value delivered to a channel-style task's tick hook. Boxed `Any` so one
/// reactor multiplexes heterogeneous sources: interval tasks receive a
/// [`tokio::time::Instant`], ad-hoc channels deliver whatever the producer
/// sent.
pub type TickPayload = Box<dyn Any + Send>;

/// Signal source the reactor waits on for a channel-style child. Collected
/// from the task right after a successful start, so a start hook may install
/// the channel itself.
pub(crate) enum SignalSource {
    Interval(Interval),
    Channel(mpsc::Receiver<TickPayload>),
}

pub(crate) fn tick_interval(interval: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    // Ticker semantics: a stalled reactor drops missed ticks instead of
    // bursting to catch up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// A periodic task that runs its own tick loop on an independent tokio task
/// instead of borrowing the owning reactor: the first tick fires
/// immediately, later ticks every `interval`, and the loop exits on
/// cancellation.
///
/// Use this over [`TaskSpec::interval`] when a tick may take long enough to
/// stall siblings.
pub fn async_tick(interval: Duration, hook: impl FnMut(&Task) + Send + 'static) -> TaskSpec {
    let hook = Arc::new(Mutex::new(hook));
    let mut spec = TaskSpec::new("AsyncTick").go(move |task| {
        let hook = hook.clone();
        async move {
            (*lock(&hook))(&task);
            let mut ticker = tick_interval(interval);
            loop {
                tokio::select! {
                    _ = task.cancelled() => return Ok(()),
                    _ = ticker.tick() => (*lock(&hook))(&task),
                }
            }
        }
    });
    spec.kind = crate::tasks::state::TaskKind::Channel;
    spec
}
