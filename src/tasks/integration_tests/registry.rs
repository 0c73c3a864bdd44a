use crate::tasks::config::TaskSpec;
use crate::tasks::error::TaskError;
use crate::tasks::integration_tests::wait_for;
use crate::tasks::work::Manager;

struct Session {
    user: &'static str,
}

#[tokio::test]
async fn manager_lookup_is_keyed_typed_and_live_filtered() {
    let sessions: Manager<Session> = Manager::new();

    let alice = sessions.job().add_task(
        TaskSpec::new("Session")
            .key("alice")
            .attach(Session { user: "alice" }),
    );
    alice.wait_started().await.expect("alice should start");

    // A child without the manager's payload type is invisible to lookups.
    let foreign = sessions.job().add_task(TaskSpec::new("Other").key("bob"));
    foreign.wait_started().await.expect("bob should start");

    assert!(sessions.has(&"alice".into()));
    assert!(!sessions.has(&"bob".into()));

    let found = sessions.get(&"alice".into()).expect("alice registered");
    assert_eq!(found, alice);
    assert_eq!(found.payload::<Session>().expect("typed").user, "alice");

    let by_user = sessions
        .find(|session, _| session.user == "alice")
        .expect("findable");
    assert_eq!(by_user, alice);
    assert!(sessions.find(|session, _| session.user == "carol").is_none());

    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions.to_list(), vec![alice.clone()]);

    let mut ranged = Vec::new();
    sessions.range(|session, _| {
        ranged.push(session.user);
        true
    });
    assert_eq!(ranged, ["alice"]);

    // Disposed entries drop out of every accessor.
    alice.stop(TaskError::StopByUser);
    alice.wait_stopped().await;
    wait_for(|| sessions.get(&"alice".into()).is_none()).await;
    assert_eq!(sessions.len(), 0);
    assert!(sessions.is_empty());
}
