use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::tasks::config::TaskSpec;
use crate::tasks::error::TaskError;
use crate::tasks::integration_tests::{test_root, wait_for};
use crate::tasks::promise::StopToken;
use crate::tasks::state::TaskState;

#[tokio::test]
async fn plain_job_auto_stops_once_its_children_are_gone() {
    let root = test_root();
    let job = root
        .add_task(TaskSpec::job("Owner"))
        .as_job()
        .expect("job spec");
    let child = job.add_task(TaskSpec::new("OnlyChild").run(|_| Ok(())));

    assert_eq!(child.wait_stopped().await, TaskError::Complete);
    let reason = job.wait_stopped().await;
    assert_eq!(
        reason,
        TaskError::AutoStop {
            source: Some(Box::new(TaskError::Complete)),
        }
    );
    wait_for(|| job.state() == TaskState::Disposed).await;
    assert_eq!(job.child_count(), 0);
}

#[tokio::test]
async fn work_outlives_its_finished_children() {
    let root = test_root();
    let work = root
        .add_task(TaskSpec::work("Keeper"))
        .as_job()
        .expect("work spec");
    let child = work.add_task(TaskSpec::new("Short").run(|_| Ok(())));

    child.wait_stopped().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(work.state(), TaskState::Started);
    assert!(!work.is_stopped());

    work.stop(TaskError::StopByUser);
    assert_eq!(work.wait_stopped().await, TaskError::StopByUser);
}

#[tokio::test]
async fn duplicate_key_rejects_the_second_child_and_keeps_the_first() {
    let root = test_root();
    let work = root
        .add_task(TaskSpec::work("Registry"))
        .as_job()
        .expect("work spec");

    let first = work.add_task(TaskSpec::new("A").key("dup"));
    first.wait_started().await.expect("first should start");

    let second = work.add_task(TaskSpec::new("B").key("dup"));
    match second.wait_started().await {
        Err(TaskError::AlreadyExists { existing }) => assert_eq!(existing, first),
        other => panic!("expected key collision, got {other:?}"),
    }

    assert_eq!(first.state(), TaskState::Started);
    assert!(!first.is_stopped());
    assert_eq!(work.child_count(), 1);
}

#[tokio::test]
async fn stopping_a_job_tears_children_down_before_the_job_itself() {
    let root = test_root();
    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let parent_events = events.clone();
    let job = root
        .add_task(TaskSpec::job("Parent").dispose(move |_| {
            parent_events.lock().unwrap().push("parent");
        }))
        .as_job()
        .expect("job spec");

    let first_events = events.clone();
    let first = job.add_task(TaskSpec::new("First").dispose(move |_| {
        first_events.lock().unwrap().push("child");
    }));
    let second_events = events.clone();
    let second = job.add_task(TaskSpec::new("Second").dispose(move |_| {
        second_events.lock().unwrap().push("child");
    }));
    first.wait_started().await.expect("first should start");
    second.wait_started().await.expect("second should start");

    job.stop(TaskError::StopByUser);
    assert_eq!(job.wait_stopped().await, TaskError::StopByUser);

    // Dispose hooks run bottom-up: both children strictly before the parent.
    assert_eq!(*events.lock().unwrap(), ["child", "child", "parent"]);
    wait_for(|| first.state() == TaskState::Disposed).await;
    wait_for(|| second.state() == TaskState::Disposed).await;
    wait_for(|| job.state() == TaskState::Disposed).await;
}

#[tokio::test]
async fn descendant_events_bubble_through_every_ancestor() {
    let root = test_root();
    let started: Arc<Mutex<HashSet<u32>>> = Arc::new(Mutex::new(HashSet::new()));
    let disposed: Arc<Mutex<HashSet<u32>>> = Arc::new(Mutex::new(HashSet::new()));

    let started_sink = started.clone();
    root.on_descendant_start(move |task| {
        started_sink.lock().unwrap().insert(task.id());
    });
    let disposed_sink = disposed.clone();
    root.on_descendant_dispose(move |task| {
        disposed_sink.lock().unwrap().insert(task.id());
    });

    let mid = root
        .add_task(TaskSpec::job("Mid"))
        .as_job()
        .expect("job spec");
    let leaf = mid.add_task(TaskSpec::new("Leaf").run(|_| Ok(())));

    leaf.wait_stopped().await;
    mid.wait_stopped().await;

    let leaf_id = leaf.id();
    let mid_id = mid.id();
    wait_for(|| {
        let started = started.lock().unwrap();
        started.contains(&leaf_id) && started.contains(&mid_id)
    })
    .await;
    wait_for(|| {
        let disposed = disposed.lock().unwrap();
        disposed.contains(&leaf_id) && disposed.contains(&mid_id)
    })
    .await;
}

#[tokio::test]
async fn adding_to_a_stopped_job_is_rejected_with_its_reason() {
    let root = test_root();
    let job = root
        .add_task(TaskSpec::job("Closing"))
        .as_job()
        .expect("job spec");
    let anchor = job.add_task(TaskSpec::new("Anchor"));
    anchor.wait_started().await.expect("anchor should start");

    job.stop(TaskError::StopByUser);
    let late = job.add_task(TaskSpec::new("Late"));
    assert_eq!(late.wait_started().await, Err(TaskError::StopByUser));
    assert!(late.state() < TaskState::Started);
}

#[tokio::test]
async fn linked_token_overrides_the_cancellation_parent() {
    let root = test_root();
    let external = StopToken::root();
    let task = root.add_task(TaskSpec::new("Linked").linked_token(external.clone()));
    task.wait_started().await.expect("should start");

    external.cancel(TaskError::Timeout);
    assert_eq!(task.wait_stopped().await, TaskError::Timeout);
}

#[tokio::test]
async fn depend_child_teardown_stops_the_owner() {
    let root = test_root();
    let job = root
        .add_task(TaskSpec::work("Dependent"))
        .as_job()
        .expect("work spec");
    let dependency = job.add_depend_task(TaskSpec::new("Backbone").run(|_| Ok(())));

    assert_eq!(dependency.wait_stopped().await, TaskError::Complete);
    // Even a keepalive owner stops once its dependency is gone.
    wait_for(|| job.is_stopped()).await;
    assert_eq!(job.stop_reason(), Some(TaskError::Complete));
}

#[tokio::test]
async fn run_task_drives_a_child_inline_to_its_stop_reason() {
    let root = test_root();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let reason = root
        .run_task(TaskSpec::new("Inline").run(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }))
        .await;

    assert_eq!(reason, TaskError::Complete);
    assert!(ran.load(Ordering::SeqCst));
}
