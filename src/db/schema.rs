//! Database schema definitions and additive migrations
//!
//! `init_schema` runs on every startup: base table creation is idempotent
//! (`CREATE TABLE IF NOT EXISTS`) and fatal on failure; the additive
//! migration pass only ever ADDs columns with explicit defaults, each step
//! guarded by a column-existence check and isolated so one failing step
//! cannot block the rest.

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::StorageError;

/// One additive migration step: add a column with an explicit default,
/// then backfill NULLs left behind by rows that predate the column.
struct AddColumn {
    table: &'static str,
    column: &'static str,
    decl: &'static str,
    default: &'static str,
}

/// Columns added after the initial release. Fresh databases already carry
/// them in the base schema, so every step is a no-op there.
const MIGRATIONS: [AddColumn; 6] = [
    AddColumn {
        table: "users",
        column: "streak_days",
        decl: "INTEGER NOT NULL DEFAULT 0",
        default: "0",
    },
    AddColumn {
        table: "users",
        column: "last_active_date",
        decl: "TEXT",
        default: "NULL",
    },
    AddColumn {
        table: "progress",
        column: "total_attempts",
        decl: "INTEGER NOT NULL DEFAULT 0",
        default: "0",
    },
    AddColumn {
        table: "user_answers",
        column: "is_mastery_test",
        decl: "INTEGER NOT NULL DEFAULT 0",
        default: "0",
    },
    AddColumn {
        table: "user_answers",
        column: "time_spent",
        decl: "INTEGER NOT NULL DEFAULT 0",
        default: "0",
    },
    AddColumn {
        table: "book_progress",
        column: "percent_complete",
        decl: "REAL NOT NULL DEFAULT 0",
        default: "0",
    },
];

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    create_tables(conn)?;
    apply_migrations(conn);
    Ok(())
}

/// Create all tables and indexes. Failure here is fatal: the store is
/// unusable without its base schema.
fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(CORE_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create core tables: {}", e)))?;

    conn.execute_batch(REVIEW_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create review tables: {}", e)))?;

    conn.execute_batch(BOOKS_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create book tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| StorageError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Apply additive migrations. Each step runs in isolation: a failure is
/// logged and skipped so later steps still execute.
fn apply_migrations(conn: &Connection) {
    for step in &MIGRATIONS {
        match add_column_if_missing(conn, step) {
            Ok(true) => info!("Migrated: added {}.{}", step.table, step.column),
            Ok(false) => {}
            Err(e) => warn!("Migration {}.{} failed: {}", step.table, step.column, e),
        }
    }
}

/// Add a column if absent, backfilling NULLs with the declared default.
/// Returns true when the column was actually added.
fn add_column_if_missing(conn: &Connection, step: &AddColumn) -> Result<bool, StorageError> {
    if column_exists(conn, step.table, step.column)? {
        return Ok(false);
    }

    conn.execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        step.table, step.column, step.decl
    ))
    .map_err(|e| StorageError::Internal(format!("ALTER TABLE failed: {}", e)))?;

    // Backfill rows created before the column existed
    conn.execute_batch(&format!(
        "UPDATE {} SET {} = COALESCE({}, {})",
        step.table, step.column, step.column, step.default
    ))
    .map_err(|e| StorageError::Internal(format!("Backfill failed: {}", e)))?;

    Ok(true)
}

/// Check a table for a column via PRAGMA table_info
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StorageError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(names.iter().any(|n| n == column))
}

/// Users, progress, answers, achievements
///
/// Timestamp column defaults use the same `%Y-%m-%dT%H:%M:%SZ` shape
/// `models::current_timestamp` writes. SQLite's `datetime('now')` would
/// produce `YYYY-MM-DD HH:MM:SS` instead, and a column mixing the two
/// formats no longer sorts chronologically.
const CORE_SCHEMA: &str = r#"
-- User identity and gamification state
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    email TEXT UNIQUE,
    total_xp INTEGER NOT NULL DEFAULT 0,
    current_level INTEGER NOT NULL DEFAULT 1,
    streak_days INTEGER NOT NULL DEFAULT 0,
    last_active_date TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
);

-- Progress against a path, lesson, or question.
-- lesson_id NULL denotes path-level aggregate progress.
CREATE TABLE IF NOT EXISTS progress (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    belief_system_id TEXT NOT NULL,
    lesson_id TEXT,
    question_id TEXT,
    status TEXT NOT NULL DEFAULT 'not_started',
    score INTEGER,
    earned_xp INTEGER NOT NULL DEFAULT 0,
    total_attempts INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- Answer history, append-only
CREATE TABLE IF NOT EXISTS user_answers (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    question_id TEXT NOT NULL,
    answer_text TEXT NOT NULL,
    is_correct INTEGER NOT NULL DEFAULT 0,
    belief_system_id TEXT NOT NULL,
    lesson_id TEXT,
    is_mastery_test INTEGER NOT NULL DEFAULT 0,
    time_spent INTEGER NOT NULL DEFAULT 0,
    attempted_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- Per-user progress toward achievement criteria
CREATE TABLE IF NOT EXISTS user_achievements (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    achievement_id TEXT NOT NULL,
    progress REAL NOT NULL DEFAULT 0,
    is_completed INTEGER NOT NULL DEFAULT 0,
    unlocked_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    UNIQUE (user_id, achievement_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Spaced-repetition review state
const REVIEW_SCHEMA: &str = r#"
-- Questions answered incorrectly, tracked for review
CREATE TABLE IF NOT EXISTS mistakes (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    belief_system_id TEXT NOT NULL,
    lesson_id TEXT,
    question_id TEXT NOT NULL,
    incorrect_answer TEXT NOT NULL,
    correct_answer TEXT NOT NULL,
    review_count INTEGER NOT NULL DEFAULT 0,
    mastered INTEGER NOT NULL DEFAULT 0,
    next_review TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- One row per review session; open while completed_at is NULL
CREATE TABLE IF NOT EXISTS mistake_sessions (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    belief_system_id TEXT NOT NULL,
    mistake_count INTEGER NOT NULL DEFAULT 0,
    correct_count INTEGER,
    xp_earned INTEGER,
    started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    completed_at TEXT,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Long-form reading: generated books, per-user reading state
const BOOKS_SCHEMA: &str = r#"
-- Generated once per belief system, read-only thereafter
CREATE TABLE IF NOT EXISTS books (
    id TEXT PRIMARY KEY NOT NULL,
    belief_system_id TEXT NOT NULL,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
);

CREATE TABLE IF NOT EXISTS book_chapters (
    id TEXT PRIMARY KEY NOT NULL,
    book_id TEXT NOT NULL,
    chapter_number INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    word_count INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
);

-- At most one row per (user, book)
CREATE TABLE IF NOT EXISTS book_progress (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    book_id TEXT NOT NULL,
    current_chapter INTEGER NOT NULL DEFAULT 1,
    scroll_position REAL NOT NULL DEFAULT 0,
    percent_complete REAL NOT NULL DEFAULT 0,
    last_read_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    UNIQUE (user_id, book_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- At most one row per (user, book)
CREATE TABLE IF NOT EXISTS book_reading_preferences (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    book_id TEXT NOT NULL,
    font_size INTEGER NOT NULL DEFAULT 16,
    line_spacing REAL NOT NULL DEFAULT 1.4,
    theme TEXT NOT NULL DEFAULT 'light',
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    UNIQUE (user_id, book_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- Multi-row, ordered by (chapter, position); consultation_id links an
-- external consultation record when present
CREATE TABLE IF NOT EXISTS book_highlights (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    book_id TEXT NOT NULL,
    chapter_number INTEGER NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    highlighted_text TEXT NOT NULL,
    note TEXT,
    consultation_id TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
-- At most one progress row per (user, path, lesson, question).
-- COALESCE keeps NULL lesson/question slots colliding; plain UNIQUE
-- would treat NULLs as distinct.
CREATE UNIQUE INDEX IF NOT EXISTS idx_progress_unique
    ON progress(user_id, belief_system_id, COALESCE(lesson_id, ''), COALESCE(question_id, ''));

CREATE INDEX IF NOT EXISTS idx_progress_user ON progress(user_id);
CREATE INDEX IF NOT EXISTS idx_progress_user_path ON progress(user_id, belief_system_id);
CREATE INDEX IF NOT EXISTS idx_progress_status ON progress(status);

CREATE INDEX IF NOT EXISTS idx_answers_user ON user_answers(user_id);
CREATE INDEX IF NOT EXISTS idx_answers_user_question ON user_answers(user_id, question_id);

CREATE INDEX IF NOT EXISTS idx_achievements_user ON user_achievements(user_id);

CREATE INDEX IF NOT EXISTS idx_mistakes_user ON mistakes(user_id);
CREATE INDEX IF NOT EXISTS idx_mistakes_due ON mistakes(user_id, mastered, next_review);
CREATE INDEX IF NOT EXISTS idx_mistake_sessions_user ON mistake_sessions(user_id);

CREATE INDEX IF NOT EXISTS idx_books_belief_system ON books(belief_system_id);
CREATE INDEX IF NOT EXISTS idx_chapters_book ON book_chapters(book_id, chapter_number);
CREATE INDEX IF NOT EXISTS idx_highlights_user_book ON book_highlights(user_id, book_id, chapter_number, position);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='users'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_migration_adds_and_backfills_missing_column() {
        let conn = Connection::open_in_memory().unwrap();

        // Simulate a pre-migration users table without streak_days
        conn.execute_batch(
            r#"
            CREATE TABLE users (
                id TEXT PRIMARY KEY NOT NULL,
                display_name TEXT NOT NULL,
                email TEXT UNIQUE,
                total_xp INTEGER NOT NULL DEFAULT 0,
                current_level INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            INSERT INTO users (id, display_name) VALUES ('u1', 'Old Row');
            "#,
        )
        .unwrap();

        init_schema(&conn).unwrap();

        let streak: i64 = conn
            .query_row("SELECT streak_days FROM users WHERE id = 'u1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(streak, 0);
    }

    #[test]
    fn test_column_exists() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert!(column_exists(&conn, "users", "total_xp").unwrap());
        assert!(!column_exists(&conn, "users", "no_such_column").unwrap());
    }
}
