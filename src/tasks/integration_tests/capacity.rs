use std::sync::mpsc as std_mpsc;

use crate::tasks::config::TaskSpec;
use crate::tasks::error::TaskError;
use crate::tasks::event_loop::CONTROL_QUEUE_CAPACITY;
use crate::tasks::integration_tests::test_root;
use crate::tasks::state::TaskState;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn control_queue_overflow_rejects_the_excess_child_unstarted() {
    let root = test_root();
    let job = root
        .add_task(TaskSpec::job("Crowded"))
        .as_job()
        .expect("job spec");

    // A gate child parks the reactor inside its blocking run hook so the
    // control queue backs up behind it.
    let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
    let (entered_tx, entered_rx) = std_mpsc::channel::<()>();
    let gate = job.add_task(TaskSpec::new("Gate").run(move |_| {
        let _ = entered_tx.send(());
        let _ = gate_rx.recv();
        Ok(())
    }));

    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .expect("join failed")
        .expect("gate never entered");

    let mut queued = Vec::new();
    for index in 0..CONTROL_QUEUE_CAPACITY {
        queued.push(job.add_task(TaskSpec::new("Queued").key(format!("q{index}"))));
    }

    let excess = job.add_task(TaskSpec::new("Excess"));
    assert_eq!(
        excess.wait_started().await,
        Err(TaskError::TooManyChildren)
    );
    assert_eq!(excess.state(), TaskState::Init, "never started");
    // The rejected child left no registry entry behind.
    assert_eq!(job.child_count(), 1 + CONTROL_QUEUE_CAPACITY);

    gate_tx.send(()).expect("gate already gone");
    assert_eq!(gate.wait_stopped().await, TaskError::Complete);
    for task in queued {
        task.wait_started().await.expect("queued child should start");
    }
}
