//! Progress CRUD operations
//!
//! One row per (user, path, lesson, question) tuple. A NULL lesson_id
//! denotes path-level aggregate progress. Uniqueness over the tuple is
//! enforced by an expression index (see schema.rs), so `create_progress`
//! can surface a duplicate as a constraint violation while
//! `upsert_progress` avoids it with a read-then-branch inside one
//! transaction.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::models::{current_timestamp, new_id, progress_status};
use crate::error::StorageError;

/// Progress row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRow {
    pub id: String,
    pub user_id: String,
    pub belief_system_id: String,
    pub lesson_id: Option<String>,
    pub question_id: Option<String>,
    pub status: String,
    pub score: Option<i64>,
    pub earned_xp: i64,
    pub total_attempts: i64,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProgressRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            belief_system_id: row.get("belief_system_id")?,
            lesson_id: row.get("lesson_id")?,
            question_id: row.get("question_id")?,
            status: row.get("status")?,
            score: row.get("score")?,
            earned_xp: row.get("earned_xp")?,
            total_attempts: row.get("total_attempts")?,
            completed_at: row.get("completed_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Input for creating or upserting progress
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertProgressInput {
    pub user_id: String,
    pub belief_system_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub question_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub earned_xp: i64,
}

/// Insert a fresh progress row. A second row for the same tuple is a
/// constraint violation; callers wanting create-or-update semantics use
/// `upsert_progress` instead.
pub fn create_progress(conn: &Connection, input: &UpsertProgressInput) -> Result<ProgressRow, StorageError> {
    if !progress_status::is_valid(&input.status) {
        return Err(StorageError::InvalidInput(format!(
            "Invalid progress status: {}. Valid: {:?}",
            input.status,
            progress_status::ALL
        )));
    }

    let id = new_id();
    let completed_at = if progress_status::is_complete(&input.status) {
        Some(current_timestamp())
    } else {
        None
    };

    conn.execute(
        r#"
        INSERT INTO progress (
            id, user_id, belief_system_id, lesson_id, question_id,
            status, score, earned_xp, total_attempts, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
        "#,
        params![
            id,
            input.user_id,
            input.belief_system_id,
            input.lesson_id,
            input.question_id,
            input.status,
            input.score,
            input.earned_xp,
            completed_at,
        ],
    )
    .map_err(|e| StorageError::from_sql("Progress insert failed", e))?;

    get_progress(conn, &id)?
        .ok_or_else(|| StorageError::NotFound("Progress not found after insert".to_string()))
}

/// Create-or-update progress for a (user, path, lesson, question) tuple.
/// An existing row keeps its identifier; attempts accumulate and the
/// best score is retained.
pub fn upsert_progress(conn: &mut Connection, input: &UpsertProgressInput) -> Result<ProgressRow, StorageError> {
    if !progress_status::is_valid(&input.status) {
        return Err(StorageError::InvalidInput(format!(
            "Invalid progress status: {}. Valid: {:?}",
            input.status,
            progress_status::ALL
        )));
    }

    let tx = conn
        .transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    let existing = get_progress_for(
        &tx,
        &input.user_id,
        &input.belief_system_id,
        input.lesson_id.as_deref(),
        input.question_id.as_deref(),
    )?;

    let id = match existing {
        Some(row) => {
            let score = match (row.score, input.score) {
                (Some(old), Some(new)) => Some(old.max(new)),
                (old, new) => new.or(old),
            };
            let completed_at = if progress_status::is_complete(&input.status) {
                row.completed_at.clone().or_else(|| Some(current_timestamp()))
            } else {
                row.completed_at.clone()
            };

            tx.execute(
                r#"
                UPDATE progress SET
                    status = ?, score = ?, earned_xp = earned_xp + ?,
                    total_attempts = total_attempts + 1,
                    completed_at = ?, updated_at = ?
                WHERE id = ?
                "#,
                params![input.status, score, input.earned_xp, completed_at, current_timestamp(), row.id],
            )
            .map_err(|e| StorageError::Internal(format!("Progress update failed: {}", e)))?;

            row.id
        }
        None => create_progress(&tx, input)?.id,
    };

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    get_progress(conn, &id)?
        .ok_or_else(|| StorageError::NotFound("Progress not found after upsert".to_string()))
}

/// Get progress by ID
pub fn get_progress(conn: &Connection, id: &str) -> Result<Option<ProgressRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM progress WHERE id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            ProgressRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get the progress row for an exact (user, path, lesson, question) tuple
pub fn get_progress_for(
    conn: &Connection,
    user_id: &str,
    belief_system_id: &str,
    lesson_id: Option<&str>,
    question_id: Option<&str>,
) -> Result<Option<ProgressRow>, StorageError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT * FROM progress
            WHERE user_id = ? AND belief_system_id = ?
              AND COALESCE(lesson_id, '') = COALESCE(?, '')
              AND COALESCE(question_id, '') = COALESCE(?, '')
            "#,
        )
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, belief_system_id, lesson_id, question_id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            ProgressRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// List a user's progress, optionally scoped to one path
pub fn list_progress(
    conn: &Connection,
    user_id: &str,
    belief_system_id: Option<&str>,
) -> Result<Vec<ProgressRow>, StorageError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT * FROM progress
            WHERE user_id = ? AND (? IS NULL OR belief_system_id = ?)
            ORDER BY updated_at DESC
            "#,
        )
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<ProgressRow> = stmt
        .query_map(params![user_id, belief_system_id, belief_system_id], |row| {
            ProgressRow::from_row(row)
        })
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Update status/score of an existing row. Returns false when the key is
/// absent; callers detect that by re-reading, not via an error.
pub fn update_progress(
    conn: &Connection,
    id: &str,
    status: &str,
    score: Option<i64>,
) -> Result<bool, StorageError> {
    if !progress_status::is_valid(status) {
        return Err(StorageError::InvalidInput(format!(
            "Invalid progress status: {}. Valid: {:?}",
            status,
            progress_status::ALL
        )));
    }

    let completed_at = if progress_status::is_complete(status) {
        Some(current_timestamp())
    } else {
        None
    };

    let changes = conn
        .execute(
            r#"
            UPDATE progress SET
                status = ?, score = COALESCE(?, score),
                completed_at = COALESCE(completed_at, ?), updated_at = ?
            WHERE id = ?
            "#,
            params![status, score, completed_at, current_timestamp(), id],
        )
        .map_err(|e| StorageError::Internal(format!("Progress update failed: {}", e)))?;

    Ok(changes > 0)
}

/// Delete a progress row by ID
pub fn delete_progress(conn: &Connection, id: &str) -> Result<bool, StorageError> {
    let changes = conn
        .execute("DELETE FROM progress WHERE id = ?", params![id])
        .map_err(|e| StorageError::Internal(format!("Delete failed: {}", e)))?;

    Ok(changes > 0)
}

/// Mark path-level progress as completed, idempotently. Re-marking an
/// already-completed path changes nothing observable.
pub fn mark_path_completed(
    conn: &mut Connection,
    user_id: &str,
    belief_system_id: &str,
) -> Result<ProgressRow, StorageError> {
    let tx = conn
        .transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    let id = match get_progress_for(&tx, user_id, belief_system_id, None, None)? {
        Some(row) if progress_status::is_complete(&row.status) => row.id,
        Some(row) => {
            tx.execute(
                "UPDATE progress SET status = ?, completed_at = COALESCE(completed_at, ?), updated_at = ? WHERE id = ?",
                params![progress_status::COMPLETED, current_timestamp(), current_timestamp(), row.id],
            )
            .map_err(|e| StorageError::Internal(format!("Progress update failed: {}", e)))?;
            row.id
        }
        None => {
            create_progress(
                &tx,
                &UpsertProgressInput {
                    user_id: user_id.to_string(),
                    belief_system_id: belief_system_id.to_string(),
                    lesson_id: None,
                    question_id: None,
                    status: progress_status::COMPLETED.to_string(),
                    score: None,
                    earned_xp: 0,
                },
            )?
            .id
        }
    };

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    get_progress(conn, &id)?
        .ok_or_else(|| StorageError::NotFound("Progress not found after update".to_string()))
}

/// IDs of paths with completed path-level progress
pub fn completed_paths(conn: &Connection, user_id: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT belief_system_id FROM progress
            WHERE user_id = ? AND lesson_id IS NULL AND question_id IS NULL
              AND status IN ('completed', 'mastered')
            ORDER BY belief_system_id
            "#,
        )
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let ids: Vec<String> = stmt
        .query_map(params![user_id], |row| row.get(0))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(ids)
}

/// Count of completed path-level progress rows
pub fn completed_path_count(conn: &Connection, user_id: &str) -> Result<i64, StorageError> {
    conn.query_row(
        r#"
        SELECT COUNT(*) FROM progress
        WHERE user_id = ? AND lesson_id IS NULL AND question_id IS NULL
          AND status IN ('completed', 'mastered')
        "#,
        params![user_id],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

/// Count of completed lesson-level progress rows
pub fn completed_lesson_count(conn: &Connection, user_id: &str) -> Result<i64, StorageError> {
    conn.query_row(
        r#"
        SELECT COUNT(*) FROM progress
        WHERE user_id = ? AND lesson_id IS NOT NULL AND question_id IS NULL
          AND status IN ('completed', 'mastered')
        "#,
        params![user_id],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}
