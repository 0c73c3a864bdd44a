mod call;
mod capacity;
mod hierarchy;
mod registry;
mod snapshot;
mod tick;

use std::time::Duration;

use crate::tasks::job::Job;
use crate::tasks::state::TaskKind;
use crate::tasks::work::detached;

/// A detached keepalive Work hosting the tasks under test, standing in for
/// the process root.
pub(crate) fn test_root() -> Job {
    detached("TestRoot", TaskKind::Work)
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
