//! Integration tests for the progress store
//!
//! Exercise full flows against a disposable store: quiz answers feeding
//! mistakes and achievements, XP accrual, account deletion, and the
//! cross-device reconciliation bridge with a fake remote.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use paideia_storage::db::{
    achievements, answers, books, mistakes, progress, users, ProgressDb,
};
use paideia_storage::db::models::progress_status;
use paideia_storage::db::answers::RecordAnswerInput;
use paideia_storage::db::mistakes::{RecordMistakeInput, MASTERY_THRESHOLD};
use paideia_storage::db::progress::UpsertProgressInput;
use paideia_storage::db::users::CreateUserInput;
use paideia_storage::{
    load_achievement_defs, evaluator, ProgressSnapshot, RemoteStore, StorageError, SyncBridge,
    SNAPSHOT_KEY,
};

/// In-memory remote store for bridge tests
struct FakeRemote {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeRemote {
    fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    fn put_snapshot(&self, snapshot: &ProgressSnapshot) {
        self.data
            .lock()
            .unwrap()
            .insert(SNAPSHOT_KEY.to_string(), serde_json::to_vec(snapshot).unwrap());
    }
}

impl RemoteStore for FakeRemote {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// RUST_LOG-driven log output for failing tests; later calls are no-ops
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_user(db: &ProgressDb, name: &str) -> String {
    init_tracing();
    db.with_conn(|conn| {
        users::create_user(
            conn,
            CreateUserInput {
                id: None,
                display_name: name.to_string(),
                email: None,
            },
        )
    })
    .unwrap()
    .id
}

#[test]
fn test_schema_setup_survives_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let db = ProgressDb::open(temp.path()).unwrap();
        make_user(&db, "First");
    }

    // Second open re-runs table creation and every migration
    let db = ProgressDb::open(temp.path()).unwrap();
    let stats = db.stats().unwrap();
    assert_eq!(stats.user_count, 1);

    // And a third, for good measure
    drop(db);
    let db = ProgressDb::open(temp.path()).unwrap();
    assert_eq!(db.stats().unwrap().user_count, 1);
}

#[test]
fn test_xp_accumulation_matches_threshold_table() {
    let db = ProgressDb::open_in_memory().unwrap();
    let user_id = make_user(&db, "Climber");

    let add = |amount: i64| {
        db.with_conn_mut(|conn| users::add_xp(conn, &user_id, amount))
            .unwrap()
            .unwrap()
    };

    let user = add(0);
    assert_eq!(user.current_level, 1);

    let user = add(100);
    assert_eq!((user.total_xp, user.current_level), (100, 2));

    // A user who accumulates 250 XP ends at exactly level 3
    let user = add(150);
    assert_eq!((user.total_xp, user.current_level), (250, 3));

    let user = add(750);
    assert_eq!((user.total_xp, user.current_level), (1000, 10));
}

#[test]
fn test_mistake_lifecycle_through_mastery() {
    let db = ProgressDb::open_in_memory().unwrap();
    let user_id = make_user(&db, "Reviewer");
    let now = Utc::now();

    let input = RecordMistakeInput {
        user_id: user_id.clone(),
        belief_system_id: "norse".to_string(),
        lesson_id: None,
        question_id: "q-ragnarok".to_string(),
        incorrect_answer: "Helheim".to_string(),
        correct_answer: "Valhalla".to_string(),
    };

    // First incorrect answer creates exactly one row; a second does not
    let m = db.with_conn(|conn| mistakes::record_mistake(conn, &input, now)).unwrap();
    let again = db.with_conn(|conn| mistakes::record_mistake(conn, &input, now)).unwrap();
    assert_eq!(m.id, again.id);
    assert_eq!(db.with_conn(|conn| mistakes::due_count(conn, &user_id, now)).unwrap(), 1);

    // Four correct reviews: still active, scheduled out
    for _ in 0..(MASTERY_THRESHOLD - 1) {
        db.with_conn_mut(|conn| mistakes::record_review(conn, &m.id, true, now)).unwrap();
    }
    assert_eq!(db.with_conn(|conn| mistakes::due_count(conn, &user_id, now)).unwrap(), 0);

    // One incorrect review resets the streak and restores visibility
    let reset = db
        .with_conn_mut(|conn| mistakes::record_review(conn, &m.id, false, now))
        .unwrap()
        .unwrap();
    assert_eq!(reset.review_count, 0);
    assert_eq!(db.with_conn(|conn| mistakes::due_count(conn, &user_id, now)).unwrap(), 1);

    // Five consecutive correct reviews retire it
    for _ in 0..MASTERY_THRESHOLD {
        db.with_conn_mut(|conn| mistakes::record_review(conn, &m.id, true, now)).unwrap();
    }
    let done = db.with_conn(|conn| mistakes::get_mistake(conn, &m.id)).unwrap().unwrap();
    assert!(done.mastered);
    assert_eq!(
        db.with_conn(|conn| mistakes::due_count(conn, &user_id, now + Duration::days(400)))
            .unwrap(),
        0
    );
}

#[test]
fn test_cascade_delete_is_scoped_to_one_user() {
    let db = ProgressDb::open_in_memory().unwrap();
    let victim = make_user(&db, "Leaver");
    let bystander = make_user(&db, "Stayer");
    let now = Utc::now();

    for user_id in [&victim, &bystander] {
        db.with_conn_mut(|conn| {
            progress::upsert_progress(
                conn,
                &UpsertProgressInput {
                    user_id: user_id.clone(),
                    belief_system_id: "greek".to_string(),
                    lesson_id: None,
                    question_id: None,
                    status: progress_status::COMPLETED.to_string(),
                    score: Some(90),
                    earned_xp: 50,
                },
            )
        })
        .unwrap();

        db.with_conn(|conn| {
            answers::record_answer(
                conn,
                &RecordAnswerInput {
                    user_id: user_id.clone(),
                    question_id: "q1".to_string(),
                    answer_text: "Styx".to_string(),
                    is_correct: true,
                    belief_system_id: "greek".to_string(),
                    lesson_id: None,
                    is_mastery_test: false,
                    time_spent: 4,
                },
            )
        })
        .unwrap();

        db.with_conn(|conn| {
            mistakes::record_mistake(
                conn,
                &RecordMistakeInput {
                    user_id: user_id.clone(),
                    belief_system_id: "greek".to_string(),
                    lesson_id: None,
                    question_id: "q2".to_string(),
                    incorrect_answer: "Lethe".to_string(),
                    correct_answer: "Styx".to_string(),
                },
                now,
            )
        })
        .unwrap();

        db.with_conn(|conn| mistakes::start_session(conn, user_id, "greek", now)).unwrap();
        db.with_conn_mut(|conn| {
            achievements::upsert_achievement_progress(conn, user_id, "first-steps", 0.5)
        })
        .unwrap();
    }

    assert!(db.with_conn_mut(|conn| users::delete_user(conn, &victim)).unwrap());

    // Victim is gone everywhere
    assert!(db.with_conn(|conn| users::get_user(conn, &victim)).unwrap().is_none());
    assert!(db.with_conn(|conn| progress::list_progress(conn, &victim, None)).unwrap().is_empty());
    assert!(db.with_conn(|conn| answers::list_answers(conn, &victim, None)).unwrap().is_empty());
    assert!(db.with_conn(|conn| mistakes::list_unmastered(conn, &victim)).unwrap().is_empty());
    assert!(db.with_conn(|conn| achievements::list_achievements(conn, &victim)).unwrap().is_empty());

    // Bystander untouched
    assert!(db.with_conn(|conn| users::get_user(conn, &bystander)).unwrap().is_some());
    assert_eq!(db.with_conn(|conn| progress::list_progress(conn, &bystander, None)).unwrap().len(), 1);
    assert_eq!(db.with_conn(|conn| answers::list_answers(conn, &bystander, None)).unwrap().len(), 1);
    assert_eq!(db.with_conn(|conn| mistakes::list_unmastered(conn, &bystander)).unwrap().len(), 1);
    assert_eq!(db.with_conn(|conn| achievements::list_achievements(conn, &bystander)).unwrap().len(), 1);
}

#[test]
fn test_achievement_evaluation_end_to_end() {
    let db = ProgressDb::open_in_memory().unwrap();
    let user_id = make_user(&db, "Achiever");

    let defs = load_achievement_defs(
        r#"
        [
            { "id": "first-path", "title": "First Path",
              "criteria": { "kind": "complete_path_count", "value": 1 } },
            { "id": "xp-200", "title": "Getting Started",
              "criteria": { "kind": "reach_total_xp", "value": 200 } },
            { "id": "norse-done", "title": "Norse Scholar",
              "criteria": { "kind": "complete_path", "value": "norse" } }
        ]
        "#,
    );
    assert_eq!(defs.len(), 3);

    // Nothing accomplished yet
    let rows = evaluator::check_achievements(&db, &defs, &user_id, 5).unwrap();
    assert!(rows.iter().all(|r| !r.is_completed));

    // Complete the norse path and earn some XP
    db.with_conn_mut(|conn| progress::mark_path_completed(conn, &user_id, "norse")).unwrap();
    db.with_conn_mut(|conn| users::add_xp(conn, &user_id, 100)).unwrap();

    let rows = evaluator::check_achievements(&db, &defs, &user_id, 5).unwrap();
    let by_id = |id: &str| rows.iter().find(|r| r.achievement_id == id).unwrap();
    assert!(by_id("first-path").is_completed);
    assert!(by_id("norse-done").is_completed);
    assert_eq!(by_id("xp-200").progress, 0.5);
    assert!(!by_id("xp-200").is_completed);
}

#[test]
fn test_achievement_completion_is_monotonic() {
    let db = ProgressDb::open_in_memory().unwrap();
    let user_id = make_user(&db, "Keeper");

    let defs = load_achievement_defs(
        r#"
        [
            { "id": "one-path", "title": "One Path",
              "criteria": { "kind": "complete_path_count", "value": 1 } }
        ]
        "#,
    );

    let completed = db
        .with_conn_mut(|conn| progress::mark_path_completed(conn, &user_id, "norse"))
        .unwrap();
    let rows = evaluator::check_achievements(&db, &defs, &user_id, 5).unwrap();
    assert!(rows[0].is_completed);

    // Remove the underlying progress; a re-evaluation computes 0.0 but
    // must not revert completion
    db.with_conn(|conn| progress::delete_progress(conn, &completed.id)).unwrap();
    let rows = evaluator::check_achievements(&db, &defs, &user_id, 5).unwrap();
    assert!(rows[0].is_completed);
    assert_eq!(rows[0].progress, 1.0);
}

#[test]
fn test_reconciliation_applies_only_when_remote_is_ahead() {
    let db = ProgressDb::open_in_memory().unwrap();
    let user_id = make_user(&db, "Roamer");
    db.with_conn_mut(|conn| users::add_xp(conn, &user_id, 100)).unwrap();

    // Remote ahead: local takes the max per field and marks paths
    let remote = FakeRemote::new();
    remote.put_snapshot(&ProgressSnapshot {
        level: 3,
        xp: 250,
        completed_paths: vec!["greek".to_string()],
        synced_at: Utc::now(),
    });
    let bridge = SyncBridge::new(remote);

    assert!(bridge.apply_synced_progress_if_needed(&db, &user_id).unwrap());
    let user = db.with_conn(|conn| users::get_user(conn, &user_id)).unwrap().unwrap();
    assert_eq!((user.total_xp, user.current_level), (250, 3));
    assert_eq!(
        db.with_conn(|conn| progress::completed_paths(conn, &user_id)).unwrap(),
        vec!["greek".to_string()]
    );

    // Applying the same snapshot again changes nothing
    assert!(!bridge.apply_synced_progress_if_needed(&db, &user_id).unwrap());
}

#[test]
fn test_reconciliation_never_regresses_local_state() {
    let db = ProgressDb::open_in_memory().unwrap();
    let user_id = make_user(&db, "Veteran");
    db.with_conn_mut(|conn| users::add_xp(conn, &user_id, 450)).unwrap();

    let remote = FakeRemote::new();
    remote.put_snapshot(&ProgressSnapshot {
        level: 2,
        xp: 100,
        completed_paths: vec![],
        synced_at: Utc::now(),
    });
    let bridge = SyncBridge::new(remote);

    assert!(!bridge.apply_synced_progress_if_needed(&db, &user_id).unwrap());
    let user = db.with_conn(|conn| users::get_user(conn, &user_id)).unwrap().unwrap();
    assert_eq!((user.total_xp, user.current_level), (450, 4));
}

#[test]
fn test_sync_push_and_retrieve_round_trip() {
    let db = ProgressDb::open_in_memory().unwrap();
    let user_id = make_user(&db, "Pusher");
    db.with_conn_mut(|conn| users::add_xp(conn, &user_id, 250)).unwrap();
    db.with_conn_mut(|conn| progress::mark_path_completed(conn, &user_id, "norse")).unwrap();

    let user = db.with_conn(|conn| users::get_user(conn, &user_id)).unwrap().unwrap();
    let paths = db.with_conn(|conn| progress::completed_paths(conn, &user_id)).unwrap();

    let bridge = SyncBridge::new(FakeRemote::new());
    assert!(bridge.sync_progress(&user, &paths));

    let snapshot = bridge.retrieve_synced_progress().unwrap();
    assert_eq!(snapshot.xp, 250);
    assert_eq!(snapshot.level, 3);
    assert_eq!(snapshot.completed_paths, vec!["norse".to_string()]);
}

#[test]
fn test_reading_state_round_trip() {
    let db = ProgressDb::open_in_memory().unwrap();
    let user_id = make_user(&db, "Reader");

    let book = db
        .with_conn_mut(|conn| {
            books::save_book(
                conn,
                books::CreateBookInput {
                    id: None,
                    belief_system_id: "tibetan".to_string(),
                    title: "The Bardo".to_string(),
                    chapters: vec![books::CreateChapterInput {
                        chapter_number: 1,
                        title: "Chikhai".to_string(),
                        content: "At the moment of death...".to_string(),
                        word_count: 5,
                    }],
                },
            )
        })
        .unwrap();

    // Preferences upsert twice: one row, latest values
    db.with_conn_mut(|conn| {
        books::upsert_reading_preferences(conn, &user_id, &book.id, 16, 1.4, "sepia")
    })
    .unwrap();
    let prefs = db
        .with_conn_mut(|conn| {
            books::upsert_reading_preferences(conn, &user_id, &book.id, 18, 1.6, "dark")
        })
        .unwrap();
    assert_eq!((prefs.font_size, prefs.theme.as_str()), (18, "dark"));

    db.with_conn_mut(|conn| books::upsert_book_progress(conn, &user_id, &book.id, 1, 0.4, 40.0))
        .unwrap();
    let stored = db
        .with_conn(|conn| books::get_book_progress(conn, &user_id, &book.id))
        .unwrap()
        .unwrap();
    assert_eq!(stored.percent_complete, 40.0);
}
