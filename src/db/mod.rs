//! SQLite database module for progress and mastery state
//!
//! One store handle per process. All writes go through a single
//! serialization point (the connection mutex), so upsert-style
//! read-then-branch operations cannot race; reads never observe a
//! partially committed write.
//!
//! ## Tables
//!
//! - `users` - identity, XP, level, streak
//! - `progress` - per path/lesson/question status and score
//! - `user_answers` - append-only answer history
//! - `user_achievements` - progress toward achievement criteria
//! - `mistakes`, `mistake_sessions` - spaced-repetition review state
//! - `books`, `book_chapters`, `book_progress`,
//!   `book_reading_preferences`, `book_highlights` - long-form reading

pub mod schema;
pub mod models;
pub mod users;
pub mod progress;
pub mod answers;
pub mod achievements;
pub mod mistakes;
pub mod books;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StorageError;

/// SQLite database for user progress and mastery
pub struct ProgressDb {
    conn: Mutex<Connection>,
}

impl ProgressDb {
    /// Open or create the progress database
    pub fn open(storage_dir: &Path) -> Result<Self, StorageError> {
        let db_path = storage_dir.join("paideia.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| StorageError::Internal(format!("Failed to open SQLite: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StorageError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(())
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, StorageError> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                user_count: count("users")?,
                progress_count: count("progress")?,
                answer_count: count("user_answers")?,
                mistake_count: count("mistakes")?,
                book_count: count("books")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub user_count: u64,
    pub progress_count: u64,
    pub answer_count: u64,
    pub mistake_count: u64,
    pub book_count: u64,
}

// Re-exports
pub use users::{UserRow, CreateUserInput};
pub use progress::{ProgressRow, UpsertProgressInput};
pub use answers::{AnswerRow, RecordAnswerInput};
pub use achievements::UserAchievementRow;
pub use mistakes::{MistakeRow, MistakeSessionRow, RecordMistakeInput};
pub use books::{
    AddHighlightInput, BookHighlightRow, BookProgressRow, BookReadingPreferencesRow, BookRow,
    ChapterRow, CreateBookInput, CreateChapterInput,
};
