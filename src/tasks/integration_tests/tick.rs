use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::tasks::channel::{TickPayload, async_tick};
use crate::tasks::config::TaskSpec;
use crate::tasks::error::TaskError;
use crate::tasks::integration_tests::{test_root, wait_for};

#[tokio::test]
async fn interval_task_ticks_on_the_reactor_until_stopped() {
    let root = test_root();
    let ticks = Arc::new(AtomicU32::new(0));

    let counted = ticks.clone();
    let task = root.add_task(
        TaskSpec::new("Ticker")
            .interval(Duration::from_millis(10))
            .tick(move |task, _| {
                if counted.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    task.stop(TaskError::StopByUser);
                }
            }),
    );

    assert_eq!(task.wait_stopped().await, TaskError::StopByUser);
    assert!(ticks.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn channel_task_receives_each_value_and_closes_with_the_source() {
    let root = test_root();
    let (tx, rx) = mpsc::channel::<TickPayload>(4);
    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let task = root.add_task(TaskSpec::new("Sink").channel(rx).tick(move |_, payload| {
        if let Ok(value) = payload.downcast::<u32>() {
            sink.lock().unwrap().push(*value);
        }
    }));
    task.wait_started().await.expect("should start");

    tx.send(Box::new(1u32)).await.expect("send failed");
    tx.send(Box::new(2u32)).await.expect("send failed");
    drop(tx);

    // A closed source settles the child with the completion sentinel.
    assert_eq!(task.wait_stopped().await, TaskError::Complete);
    assert_eq!(*seen.lock().unwrap(), [1, 2]);
}

#[tokio::test]
async fn async_tick_loops_off_the_reactor_until_cancelled() {
    let root = test_root();
    let ticks = Arc::new(AtomicU32::new(0));

    let counted = ticks.clone();
    let task = root.add_task(async_tick(Duration::from_millis(10), move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
    }));
    task.wait_started().await.expect("should start");

    let observed = ticks.clone();
    wait_for(move || observed.load(Ordering::SeqCst) >= 3).await;
    task.stop(TaskError::StopByUser);
    assert_eq!(task.wait_stopped().await, TaskError::StopByUser);
}

#[tokio::test]
async fn channel_installed_by_the_start_hook_is_collected() {
    let root = test_root();
    let seen = Arc::new(AtomicU32::new(0));

    let sink = seen.clone();
    let task = root.add_task(
        TaskSpec::new("SelfWired")
            .start(|task| {
                let (tx, rx) = mpsc::channel::<TickPayload>(1);
                task.set_signal_channel(rx);
                tokio::spawn(async move {
                    for value in 0..2u32 {
                        if tx.send(Box::new(value)).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(())
            })
            .tick(move |_, _| {
                sink.fetch_add(1, Ordering::SeqCst);
            }),
    );

    assert_eq!(task.wait_stopped().await, TaskError::Complete);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
