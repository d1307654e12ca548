//! Answer history, append-only
//!
//! Rows are never updated after insert; repeated attempts on the same
//! question produce multiple rows. The only delete is the account cascade.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::models::{current_timestamp, new_id};
use crate::error::StorageError;

/// Answer row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRow {
    pub id: String,
    pub user_id: String,
    pub question_id: String,
    pub answer_text: String,
    pub is_correct: bool,
    pub belief_system_id: String,
    pub lesson_id: Option<String>,
    pub is_mastery_test: bool,
    pub time_spent: i64,
    pub attempted_at: String,
}

impl AnswerRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            question_id: row.get("question_id")?,
            answer_text: row.get("answer_text")?,
            is_correct: row.get::<_, i64>("is_correct")? != 0,
            belief_system_id: row.get("belief_system_id")?,
            lesson_id: row.get("lesson_id")?,
            is_mastery_test: row.get::<_, i64>("is_mastery_test")? != 0,
            time_spent: row.get("time_spent")?,
            attempted_at: row.get("attempted_at")?,
        })
    }
}

/// Input for recording an answer
#[derive(Debug, Clone, Deserialize)]
pub struct RecordAnswerInput {
    pub user_id: String,
    pub question_id: String,
    pub answer_text: String,
    pub is_correct: bool,
    pub belief_system_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub is_mastery_test: bool,
    #[serde(default)]
    pub time_spent: i64,
}

/// Record an answer attempt
pub fn record_answer(conn: &Connection, input: &RecordAnswerInput) -> Result<AnswerRow, StorageError> {
    if input.time_spent < 0 {
        return Err(StorageError::InvalidInput(
            "time_spent must be non-negative".to_string(),
        ));
    }

    let id = new_id();

    conn.execute(
        r#"
        INSERT INTO user_answers (
            id, user_id, question_id, answer_text, is_correct,
            belief_system_id, lesson_id, is_mastery_test, time_spent, attempted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            input.user_id,
            input.question_id,
            input.answer_text,
            input.is_correct as i64,
            input.belief_system_id,
            input.lesson_id,
            input.is_mastery_test as i64,
            input.time_spent,
            current_timestamp(),
        ],
    )
    .map_err(|e| StorageError::from_sql("Answer insert failed", e))?;

    get_answer(conn, &id)?
        .ok_or_else(|| StorageError::NotFound("Answer not found after insert".to_string()))
}

/// Get answer by ID
pub fn get_answer(conn: &Connection, id: &str) -> Result<Option<AnswerRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM user_answers WHERE id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            AnswerRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Full attempt history for one question, oldest first
pub fn list_answers_for_question(
    conn: &Connection,
    user_id: &str,
    question_id: &str,
) -> Result<Vec<AnswerRow>, StorageError> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM user_answers WHERE user_id = ? AND question_id = ? ORDER BY attempted_at, rowid",
        )
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<AnswerRow> = stmt
        .query_map(params![user_id, question_id], |row| AnswerRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// A user's answers, newest first, optionally scoped to one path
pub fn list_answers(
    conn: &Connection,
    user_id: &str,
    belief_system_id: Option<&str>,
) -> Result<Vec<AnswerRow>, StorageError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT * FROM user_answers
            WHERE user_id = ? AND (? IS NULL OR belief_system_id = ?)
            ORDER BY attempted_at DESC
            "#,
        )
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<AnswerRow> = stmt
        .query_map(params![user_id, belief_system_id, belief_system_id], |row| {
            AnswerRow::from_row(row)
        })
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Count of correct answers for a user
pub fn correct_answer_count(conn: &Connection, user_id: &str) -> Result<i64, StorageError> {
    conn.query_row(
        "SELECT COUNT(*) FROM user_answers WHERE user_id = ? AND is_correct = 1",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}
