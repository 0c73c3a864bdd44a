use std::pin::pin;
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::tasks::error::TaskError;

/// One-shot settlement: resolved with `Ok(())` or rejected with a cause,
/// exactly once. Waiters that arrive after settlement return immediately.
///
/// Used for the "start succeeded/failed" and "fully stopped" notifications a
/// task exposes; clones observe the same settlement.
#[derive(Clone)]
pub struct Settlement {
    inner: Arc<SettleInner>,
}

struct SettleInner {
    cell: OnceLock<Result<(), TaskError>>,
    notify: Notify,
}

impl Settlement {
    pub fn new() -> Settlement {
        Settlement {
            inner: Arc::new(SettleInner {
                cell: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Settles the value. The first caller wins; later calls report `false`
    /// and change nothing.
    pub fn fulfill(&self, result: Result<(), TaskError>) -> bool {
        let won = self.inner.cell.set(result).is_ok();
        if won {
            self.inner.notify.notify_waiters();
        }
        won
    }

    pub fn resolve(&self) -> bool {
        self.fulfill(Ok(()))
    }

    pub fn reject(&self, cause: TaskError) -> bool {
        self.fulfill(Err(cause))
    }

    pub fn peek(&self) -> Option<Result<(), TaskError>> {
        self.inner.cell.get().cloned()
    }

    pub fn is_settled(&self) -> bool {
        self.inner.cell.get().is_some()
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.cell.get(), Some(Err(_)))
    }

    /// Waits for settlement and returns it.
    pub async fn wait(&self) -> Result<(), TaskError> {
        loop {
            // Register interest before checking so a fulfill racing between
            // the check and the await still wakes us.
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if let Some(result) = self.inner.cell.get() {
                return result.clone();
            }
            notified.await;
        }
    }
}

impl Default for Settlement {
    fn default() -> Settlement {
        Settlement::new()
    }
}

/// Cancellation handle with a typed cause: a [`CancellationToken`] plus a
/// first-cause-wins cell, linked to the parent token so cancelling an
/// ancestor is observed (cause included) by every descendant.
#[derive(Clone)]
pub struct StopToken {
    token: CancellationToken,
    cause: Arc<OnceLock<TaskError>>,
    parent: Option<Arc<StopToken>>,
}

impl StopToken {
    /// A root token with no parent.
    pub fn root() -> StopToken {
        StopToken {
            token: CancellationToken::new(),
            cause: Arc::new(OnceLock::new()),
            parent: None,
        }
    }

    /// Derives a child token: cancelled automatically when `parent` cancels,
    /// cancellable on its own without affecting the parent.
    pub fn child(parent: &StopToken) -> StopToken {
        StopToken {
            token: parent.token.child_token(),
            cause: Arc::new(OnceLock::new()),
            parent: Some(Arc::new(parent.clone())),
        }
    }

    /// Cancels with `cause`. Only the first cause sticks — including one
    /// inherited from an ancestor that already cancelled; returns whether
    /// this call was the one that settled it.
    pub fn cancel(&self, cause: TaskError) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let won = self.cause.set(cause).is_ok();
        self.token.cancel();
        won
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The settled cause, walking up to the ancestor that actually cancelled
    /// when this token was cancelled transitively. `None` while live.
    pub fn cause(&self) -> Option<TaskError> {
        if let Some(cause) = self.cause.get() {
            return Some(cause.clone());
        }
        if !self.token.is_cancelled() {
            return None;
        }
        self.parent.as_ref().and_then(|parent| parent.cause())
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}
