use crate::tasks::config::TaskSpec;
use crate::tasks::info::{TaskInfo, TaskStats};
use crate::tasks::integration_tests::test_root;
use crate::tasks::state::{TaskKind, TaskState};

#[tokio::test]
async fn snapshot_materializes_the_tree_with_levels_and_metadata() {
    let root = test_root();
    let mid = root
        .add_task(TaskSpec::job("Mid").metadata("zone", "a"))
        .as_job()
        .expect("job spec");
    let leaf = mid.add_task(TaskSpec::new("Leaf"));
    leaf.wait_started().await.expect("leaf should start");
    mid.wait_started().await.expect("mid should start");

    let info = TaskInfo::snapshot(root.as_task());
    assert_eq!(info.kind, TaskKind::Work);
    assert_eq!(info.level, 0);
    assert_eq!(info.children.len(), 1);

    let mid_info = &info.children[0];
    assert_eq!(mid_info.id, mid.id());
    assert_eq!(mid_info.kind, TaskKind::Job);
    assert_eq!(mid_info.owner, "Mid");
    assert_eq!(mid_info.level, 1);
    assert_eq!(mid_info.state, TaskState::Started);
    assert_eq!(mid_info.metadata.get("zone").map(String::as_str), Some("a"));
    assert!(mid_info.event_loop_running);
    assert!(mid_info.start_reason.contains("snapshot.rs"));

    let leaf_info = &mid_info.children[0];
    assert_eq!(leaf_info.id, leaf.id());
    assert_eq!(leaf_info.kind, TaskKind::Task);
    assert_eq!(leaf_info.level, 2);
    assert!(leaf_info.stop_reason.is_none());

    let stats = TaskStats::collect(root.as_task());
    assert_eq!(stats.total, 3);
    assert_eq!(stats.running, 2);
    assert_eq!(stats.failed, 0);
}

#[cfg(feature = "serde")]
#[tokio::test]
async fn snapshot_serializes_to_json() {
    let root = test_root();
    let task = root.add_task(TaskSpec::new("Leaf").key("leaf"));
    task.wait_started().await.expect("should start");

    let info = TaskInfo::snapshot(root.as_task());
    let json = serde_json::to_string(&info).expect("serializable");
    assert!(json.contains("\"children\""));
    let back: TaskInfo = serde_json::from_str(&json).expect("deserializable");
    assert_eq!(back.children.len(), 1);
    assert_eq!(back.children[0].id, task.id());
}
