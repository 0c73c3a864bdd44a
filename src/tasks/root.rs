use std::ops::Deref;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::tasks::channel::TickPayload;
use crate::tasks::config::TaskSpec;
use crate::tasks::error::TaskError;
use crate::tasks::job::Job;
use crate::tasks::state::{TaskKind, TaskState};
use crate::tasks::work::detached;

/// The top-level Work of a supervision tree. Installs an OS-signal child so
/// a termination signal tears the whole tree down, bottom-up.
///
/// # Examples
///
/// ```no_run
/// use tasktree::{Root, TaskSpec};
///
/// #[tokio::main]
/// async fn main() {
///     let root = Root::new().await;
///     root.add_task(TaskSpec::new("Server").go(|task| async move {
///         task.cancelled().await;
///         Ok(())
///     }));
///     // Blocks until a termination signal (or explicit shutdown) has torn
///     // the tree down.
///     root.wait_stopped().await;
/// }
/// ```
pub struct Root {
    job: Job,
}

impl Deref for Root {
    type Target = Job;

    fn deref(&self) -> &Job {
        &self.job
    }
}

impl Root {
    /// Bootstraps the root: started state, settled startup, signal-driven
    /// shutdown installed.
    pub async fn new() -> Root {
        let job = detached("Root", TaskKind::Work);
        job.as_task().set_state(TaskState::Started);
        let signal_task = job.add_task(os_signal_spec(job.clone()));
        if let Err(cause) = signal_task.wait_started().await {
            warn!(reason = %cause, "signal handler failed to install");
        }
        Root { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Stops the tree with the process-exit cause and disposes it
    /// depth-first; returns once every descendant is torn down. Idempotent.
    pub async fn shutdown(&self) {
        shutdown_tree(self.job.clone()).await;
    }
}

pub(crate) async fn shutdown_tree(job: Job) {
    info!(root_id = job.id(), "shutting down");
    job.stop(TaskError::Exit);
    job.as_task().dispose().await;
    info!(root_id = job.id(), "shutdown complete");
}

fn os_signal_spec(root: Job) -> TaskSpec {
    TaskSpec::new("OsSignal")
        .start(|task| {
            let (tx, rx) = mpsc::channel(1);
            let forwarder = tokio::spawn(forward_signals(tx));
            task.set_signal_channel(rx);
            task.on_stop(move || forwarder.abort());
            Ok(())
        })
        .tick(move |_, _| {
            // Shutdown runs on its own task; the reactor delivering this
            // tick is itself part of what gets torn down.
            let job = root.clone();
            tokio::spawn(async move { shutdown_tree(job).await });
        })
}

#[cfg(unix)]
async fn forward_signals(tx: mpsc::Sender<TickPayload>) {
    use tokio::signal::unix::{SignalKind, signal};

    let streams = (
        signal(SignalKind::hangup()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );
    let (Ok(mut sighup), Ok(mut sigint), Ok(mut sigterm), Ok(mut sigquit)) = streams else {
        warn!("failed to install signal handlers");
        return;
    };
    loop {
        tokio::select! {
            _ = sighup.recv() => {}
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
            _ = sigquit.recv() => {}
        }
        if tx.send(Box::new(())).await.is_err() {
            return;
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(tx: mpsc::Sender<TickPayload>) {
    loop {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to install signal handlers");
            return;
        }
        if tx.send(Box::new(())).await.is_err() {
            return;
        }
    }
}
