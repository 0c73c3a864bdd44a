use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;

use crate::tasks::config::TaskSpec;
use crate::tasks::error::TaskError;
use crate::tasks::integration_tests::test_root;

#[tokio::test]
async fn call_executes_inline_when_no_child_is_live() {
    let root = test_root();
    let job = root
        .add_task(TaskSpec::job("Quiet"))
        .as_job()
        .expect("job spec");

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    job.call(move || flag.store(true, Ordering::SeqCst))
        .await
        .expect("call failed");
    assert!(ran.load(Ordering::SeqCst));
    // The fast path never needed the reactor.
    assert!(!job.event_loop_running());
}

#[tokio::test]
async fn call_runs_on_the_reactor_when_children_are_live() {
    let root = test_root();
    let job = root
        .add_task(TaskSpec::job("Busy"))
        .as_job()
        .expect("job spec");
    let child = job.add_task(TaskSpec::new("Child"));
    child.wait_started().await.expect("child should start");

    let hits = Arc::new(AtomicU32::new(0));
    for _ in 0..3 {
        let counted = hits.clone();
        job.call(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("call failed");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn call_unblocks_with_the_jobs_reason_when_it_stops_first() {
    let root = test_root();
    let job = root
        .add_task(TaskSpec::job("Stalling"))
        .as_job()
        .expect("job spec");

    let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
    let (entered_tx, entered_rx) = std_mpsc::channel::<()>();
    let _gate = job.add_task(TaskSpec::new("Gate").run(move |_| {
        let _ = entered_tx.send(());
        let _ = gate_rx.recv();
        Ok(())
    }));
    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .expect("join failed")
        .expect("gate never entered");

    let pending = {
        let job = job.clone();
        tokio::spawn(async move { job.call(|| {}).await })
    };
    job.stop(TaskError::StopByUser);
    let result = pending.await.expect("call task panicked");
    assert_eq!(result, Err(TaskError::StopByUser));

    gate_tx.send(()).expect("gate already gone");
}
