// End-to-end runs against real files: portal dump in, history store out.

use grade_watch::{
    open_fetcher, ChangeKind, HistoryStore, IdentityKey, MemoryNotifier, PolicyConfig,
    SnapshotFormat, SnapshotStore, Watcher,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_portal_dump(path: &Path, ma201_grade: &str) {
    let body = format!(
        r#"{{
            "success": true,
            "cjxx": [
                {{"xq": "2024S", "list": [
                    {{"bkcjbh": "CS101", "kcmc": "Intro to CS", "xqcj": "A", "xf": "3"}},
                    {{"bkcjbh": "MA201", "kcmc": "Linear Algebra", "xqcj": "{}", "xf": "4"}}
                ]}}
            ]
        }}"#,
        ma201_grade
    );
    fs::write(path, body).unwrap();
}

fn run(dir: &TempDir, notifier: &MemoryNotifier) -> grade_watch::RunReport {
    let snapshot = dir.path().join("current.json");
    let fetcher = open_fetcher(&snapshot, SnapshotFormat::Auto);
    let policy = PolicyConfig {
        notify_on_first_run: true,
        ..PolicyConfig::default()
    };
    Watcher::new(
        SnapshotStore::new(dir.path().join("course_data.json")),
        fetcher.as_ref(),
        notifier,
    )
    .with_policy(policy)
    .run()
    .unwrap()
}

#[test]
fn test_portal_dump_two_runs() {
    let dir = TempDir::new().unwrap();
    let notifier = MemoryNotifier::new();

    write_portal_dump(&dir.path().join("current.json"), "B+");
    let first = run(&dir, &notifier);
    assert_eq!(first.count(ChangeKind::Added), 2);
    assert_eq!(notifier.sent_count(), 2);

    write_portal_dump(&dir.path().join("current.json"), "A-");
    let second = run(&dir, &notifier);
    assert_eq!(second.changes.len(), 1);
    assert_eq!(second.changes[0].kind(), ChangeKind::Updated);
    assert_eq!(second.changes[0].key().course_id(), "MA201");
    assert_eq!(notifier.sent_count(), 3);
    assert!(notifier.sent()[2].body.contains("B+ → A-"));

    // Same dump again: nothing to report
    let third = run(&dir, &notifier);
    assert!(third.changes.is_empty());
    assert!(!third.persisted);

    let store: HistoryStore = SnapshotStore::new(dir.path().join("course_data.json"))
        .load()
        .unwrap();
    let key = IdentityKey::new("MA201", "2024S").unwrap();
    assert_eq!(store.log_for(&key).len(), 2);
    assert_eq!(store.get(&key).unwrap().credit(), Some(4.0));
}

#[test]
fn test_expired_session_dump_aborts_without_writing() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("current.json"),
        r#"{"success": false, "msg": "session expired"}"#,
    )
    .unwrap();

    let notifier = MemoryNotifier::new();
    let fetcher = open_fetcher(&dir.path().join("current.json"), SnapshotFormat::Auto);
    let result = Watcher::new(
        SnapshotStore::new(dir.path().join("course_data.json")),
        fetcher.as_ref(),
        &notifier,
    )
    .run();

    assert!(matches!(
        result,
        Err(grade_watch::WatchError::Fetch(grade_watch::FetchError::Auth(_)))
    ));
    assert!(!dir.path().join("course_data.json").exists());
}

#[test]
fn test_csv_retake_is_kept_separately() {
    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("grades.csv");
    fs::write(
        &csv_path,
        "course_id,semester,course_name,credit,grade,grade_point,course_type\n\
         CS101,2023F,Intro,3,D,1.0,\n\
         CS101,2024S,Intro,3,B,3.0,\n",
    )
    .unwrap();

    let notifier = MemoryNotifier::new();
    let fetcher = open_fetcher(&csv_path, SnapshotFormat::Auto);
    let store_path = dir.path().join("course_data.json");
    let report = Watcher::new(SnapshotStore::new(&store_path), fetcher.as_ref(), &notifier)
        .run()
        .unwrap();
    assert_eq!(report.count(ChangeKind::Added), 2);

    let store = SnapshotStore::new(&store_path).load().unwrap();
    let attempts = store.records_for_course("CS101");
    assert_eq!(attempts.len(), 2);
    assert_eq!(store.latest_for_course("CS101").unwrap().grade(), Some("B"));
}
