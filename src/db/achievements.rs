//! Per-user achievement progress rows
//!
//! One row per (user, achievement). Completion is monotonic: once a row
//! reaches 1.0 it never regresses, even if a later evaluation computes a
//! lower fraction from changed data.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::models::{current_timestamp, new_id};
use crate::error::StorageError;

/// User achievement row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAchievementRow {
    pub id: String,
    pub user_id: String,
    pub achievement_id: String,
    pub progress: f64,
    pub is_completed: bool,
    pub unlocked_at: String,
}

impl UserAchievementRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            achievement_id: row.get("achievement_id")?,
            progress: row.get("progress")?,
            is_completed: row.get::<_, i64>("is_completed")? != 0,
            unlocked_at: row.get("unlocked_at")?,
        })
    }
}

/// Get the row for a (user, achievement) pair
pub fn get_achievement(
    conn: &Connection,
    user_id: &str,
    achievement_id: &str,
) -> Result<Option<UserAchievementRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM user_achievements WHERE user_id = ? AND achievement_id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, achievement_id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            UserAchievementRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// List a user's achievement rows, completed first
pub fn list_achievements(conn: &Connection, user_id: &str) -> Result<Vec<UserAchievementRow>, StorageError> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM user_achievements WHERE user_id = ? ORDER BY is_completed DESC, progress DESC",
        )
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<UserAchievementRow> = stmt
        .query_map(params![user_id], |row| UserAchievementRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Create or update progress toward one achievement. The fraction is
/// clamped to [0, 1]; a completed row is never regressed.
pub fn upsert_achievement_progress(
    conn: &mut Connection,
    user_id: &str,
    achievement_id: &str,
    fraction: f64,
) -> Result<UserAchievementRow, StorageError> {
    let fraction = fraction.clamp(0.0, 1.0);

    match get_achievement(conn, user_id, achievement_id)? {
        Some(existing) => {
            if existing.is_completed {
                return Ok(existing);
            }

            let completed = fraction >= 1.0;
            conn.execute(
                "UPDATE user_achievements SET progress = ?, is_completed = ? WHERE id = ?",
                params![fraction, completed as i64, existing.id],
            )
            .map_err(|e| StorageError::Internal(format!("Achievement update failed: {}", e)))?;

            get_achievement(conn, user_id, achievement_id)?
                .ok_or_else(|| StorageError::NotFound("Achievement not found after update".to_string()))
        }
        None => {
            let id = new_id();
            let completed = fraction >= 1.0;
            conn.execute(
                r#"
                INSERT INTO user_achievements (id, user_id, achievement_id, progress, is_completed, unlocked_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![id, user_id, achievement_id, fraction, completed as i64, current_timestamp()],
            )
            .map_err(|e| StorageError::from_sql("Achievement insert failed", e))?;

            get_achievement(conn, user_id, achievement_id)?
                .ok_or_else(|| StorageError::NotFound("Achievement not found after insert".to_string()))
        }
    }
}
