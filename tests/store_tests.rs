//! File-backed session store, including recovery across process restarts.

use std::fs;
use std::sync::Arc;

use rcluster::adapter::outbound::store::FileSessionStore;
use rcluster::application::{ClusterOrchestrator, LaunchRequest};
use rcluster::domain::{AccountContext, SessionStatus};
use rcluster::error::Error;
use rcluster::port::SessionStore;
use rcluster::testkit::{self, ScriptedConfigurator, ScriptedProvider};

fn account() -> AccountContext {
    AccountContext::new("default", "us-east-1")
}

#[test]
fn sessions_are_kept_per_account() {
    let dir = tempfile::tempdir().unwrap();
    let east = FileSessionStore::new(dir.path(), account());
    let west = FileSessionStore::new(dir.path(), AccountContext::new("default", "us-west-2"));

    east.save(&testkit::active_session(account(), 2)).unwrap();

    assert!(east.load().unwrap().is_some());
    assert!(west.load().unwrap().is_none());
    assert_ne!(east.path(), west.path());
}

#[test]
fn profiles_differing_only_in_punctuation_do_not_share_a_record() {
    let dir = tempfile::tempdir().unwrap();
    let slash = AccountContext::new("team/research", "us-east-1");
    let underscore = AccountContext::new("team_research", "us-east-1");
    let first = FileSessionStore::new(dir.path(), slash.clone());
    let second = FileSessionStore::new(dir.path(), underscore.clone());

    first.save(&testkit::active_session(slash, 1)).unwrap();

    assert_ne!(first.path(), second.path());
    assert!(second.load().unwrap().is_none());
    second.save(&testkit::active_session(underscore, 2)).unwrap();
    assert_eq!(first.load().unwrap().unwrap().workers().count(), 1);
    assert_eq!(second.load().unwrap().unwrap().workers().count(), 2);
}

#[test]
fn a_truncated_record_is_reported_as_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path(), account());
    store.save(&testkit::active_session(account(), 1)).unwrap();

    let content = fs::read_to_string(store.path()).unwrap();
    fs::write(store.path(), &content[..content.len() / 2]).unwrap();

    assert!(matches!(store.load(), Err(Error::CorruptSession { .. })));
}

#[test]
fn a_record_for_another_account_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path(), account());
    let foreign = testkit::active_session(AccountContext::new("other", "eu-west-1"), 1);
    fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    fs::write(store.path(), serde_json::to_string(&foreign).unwrap()).unwrap();

    assert!(matches!(store.load(), Err(Error::CorruptSession { .. })));
}

#[test]
fn save_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path(), account());
    store.save(&testkit::active_session(account(), 1)).unwrap();

    let entries: Vec<_> = fs::read_dir(store.path().parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec!["default@us-east-1.json".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn a_new_process_can_open_and_terminate_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let configurator = Arc::new(ScriptedConfigurator::new());

    let first = ClusterOrchestrator::new(
        provider.clone(),
        configurator.clone(),
        Arc::new(FileSessionStore::new(dir.path(), account())),
        testkit::settings(),
    );
    let report = first
        .launch(LaunchRequest {
            workers: 2,
            image_id: "ami-test".into(),
        })
        .await
        .unwrap();
    drop(first);

    let second = ClusterOrchestrator::new(
        provider.clone(),
        configurator,
        Arc::new(FileSessionStore::new(dir.path(), account())),
        testkit::settings(),
    );
    let session = second.session().unwrap().unwrap();
    assert_eq!(session.id, report.session.id);
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(second.open().await.unwrap(), report.endpoint);

    let terminated = second.terminate().await.unwrap();
    assert_eq!(terminated.terminated.len(), 3);
    assert!(provider.alive().is_empty());
    assert!(second.session().unwrap().is_none());
}
