//! Mistake tracking and spaced-repetition review scheduling
//!
//! Each unmastered mistake is either due (`next_review <= now`) or
//! scheduled. A correct review pushes `next_review` out on an exponential
//! backoff and, at the mastery threshold, retires the record for good.
//! One incorrect review resets the streak entirely and makes the record
//! immediately reviewable again.
//!
//! Functions here take `now` explicitly so the schedule is reproducible
//! in tests.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{current_timestamp, format_timestamp, new_id};
use crate::error::StorageError;

/// Consecutive correct reviews required to retire a mistake
pub const MASTERY_THRESHOLD: i64 = 5;

/// Review interval after the nth consecutive correct review: 1d, 2d, 4d, 8d.
/// Exponential doubling from a one-day base.
pub fn review_backoff(review_count: i64) -> Duration {
    let n = review_count.max(1);
    Duration::days(1) * 2_i32.pow((n - 1).min(30) as u32)
}

/// Mistake row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MistakeRow {
    pub id: String,
    pub user_id: String,
    pub belief_system_id: String,
    pub lesson_id: Option<String>,
    pub question_id: String,
    pub incorrect_answer: String,
    pub correct_answer: String,
    pub review_count: i64,
    pub mastered: bool,
    pub next_review: String,
    pub created_at: String,
    pub updated_at: String,
}

impl MistakeRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            belief_system_id: row.get("belief_system_id")?,
            lesson_id: row.get("lesson_id")?,
            question_id: row.get("question_id")?,
            incorrect_answer: row.get("incorrect_answer")?,
            correct_answer: row.get("correct_answer")?,
            review_count: row.get("review_count")?,
            mastered: row.get::<_, i64>("mastered")? != 0,
            next_review: row.get("next_review")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Mistake session row from database; open while completed_at is NULL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MistakeSessionRow {
    pub id: String,
    pub user_id: String,
    pub belief_system_id: String,
    pub mistake_count: i64,
    pub correct_count: Option<i64>,
    pub xp_earned: Option<i64>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl MistakeSessionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            belief_system_id: row.get("belief_system_id")?,
            mistake_count: row.get("mistake_count")?,
            correct_count: row.get("correct_count")?,
            xp_earned: row.get("xp_earned")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Input for recording a mistake
#[derive(Debug, Clone, Deserialize)]
pub struct RecordMistakeInput {
    pub user_id: String,
    pub belief_system_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    pub question_id: String,
    pub incorrect_answer: String,
    pub correct_answer: String,
}

/// Record an incorrect answer as a mistake, immediately eligible for
/// review. If an unmastered mistake already exists for this
/// (user, question) pair the existing row is returned untouched.
pub fn record_mistake(
    conn: &Connection,
    input: &RecordMistakeInput,
    now: DateTime<Utc>,
) -> Result<MistakeRow, StorageError> {
    if let Some(existing) = get_active_mistake(conn, &input.user_id, &input.question_id)? {
        return Ok(existing);
    }

    let id = new_id();

    conn.execute(
        r#"
        INSERT INTO mistakes (
            id, user_id, belief_system_id, lesson_id, question_id,
            incorrect_answer, correct_answer, review_count, mastered, next_review
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
        "#,
        params![
            id,
            input.user_id,
            input.belief_system_id,
            input.lesson_id,
            input.question_id,
            input.incorrect_answer,
            input.correct_answer,
            format_timestamp(now),
        ],
    )
    .map_err(|e| StorageError::from_sql("Mistake insert failed", e))?;

    get_mistake(conn, &id)?
        .ok_or_else(|| StorageError::NotFound("Mistake not found after insert".to_string()))
}

/// Get mistake by ID
pub fn get_mistake(conn: &Connection, id: &str) -> Result<Option<MistakeRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM mistakes WHERE id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            MistakeRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get the unmastered mistake for a (user, question) pair, if any
pub fn get_active_mistake(
    conn: &Connection,
    user_id: &str,
    question_id: &str,
) -> Result<Option<MistakeRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM mistakes WHERE user_id = ? AND question_id = ? AND mastered = 0")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, question_id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            MistakeRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Apply a review outcome to a mistake.
///
/// Correct: increments the streak; at the mastery threshold the record is
/// retired permanently, otherwise the next review is pushed out on the
/// backoff curve. Incorrect: full streak reset, immediately due again.
///
/// Returns the refreshed row, or None when the mistake does not exist or
/// is already mastered.
pub fn record_review(
    conn: &mut Connection,
    id: &str,
    correct: bool,
    now: DateTime<Utc>,
) -> Result<Option<MistakeRow>, StorageError> {
    let mistake = match get_mistake(conn, id)? {
        Some(m) if !m.mastered => m,
        _ => return Ok(None),
    };

    if correct {
        let new_count = mistake.review_count + 1;
        if new_count >= MASTERY_THRESHOLD {
            conn.execute(
                "UPDATE mistakes SET review_count = ?, mastered = 1, updated_at = ? WHERE id = ?",
                params![new_count, current_timestamp(), id],
            )
            .map_err(|e| StorageError::Internal(format!("Review update failed: {}", e)))?;
            debug!("Mistake {} mastered after {} correct reviews", id, new_count);
        } else {
            let next = now + review_backoff(new_count);
            conn.execute(
                "UPDATE mistakes SET review_count = ?, next_review = ?, updated_at = ? WHERE id = ?",
                params![new_count, format_timestamp(next), current_timestamp(), id],
            )
            .map_err(|e| StorageError::Internal(format!("Review update failed: {}", e)))?;
        }
    } else {
        // Full reset: one incorrect answer always restores visibility
        conn.execute(
            "UPDATE mistakes SET review_count = 0, next_review = ?, updated_at = ? WHERE id = ?",
            params![format_timestamp(now), current_timestamp(), id],
        )
        .map_err(|e| StorageError::Internal(format!("Review update failed: {}", e)))?;
    }

    get_mistake(conn, id)
}

/// Unmastered mistakes due for review, soonest first
pub fn due_mistakes(
    conn: &Connection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<MistakeRow>, StorageError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT * FROM mistakes
            WHERE user_id = ? AND mastered = 0 AND next_review <= ?
            ORDER BY next_review
            "#,
        )
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<MistakeRow> = stmt
        .query_map(params![user_id, format_timestamp(now)], |row| MistakeRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Count of due mistakes
pub fn due_count(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<i64, StorageError> {
    conn.query_row(
        "SELECT COUNT(*) FROM mistakes WHERE user_id = ? AND mastered = 0 AND next_review <= ?",
        params![user_id, format_timestamp(now)],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

/// All unmastered mistakes for a user, soonest review first
pub fn list_unmastered(conn: &Connection, user_id: &str) -> Result<Vec<MistakeRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM mistakes WHERE user_id = ? AND mastered = 0 ORDER BY next_review")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<MistakeRow> = stmt
        .query_map(params![user_id], |row| MistakeRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Count of mistakes retired through mastery
pub fn mastered_count(conn: &Connection, user_id: &str) -> Result<i64, StorageError> {
    conn.query_row(
        "SELECT COUNT(*) FROM mistakes WHERE user_id = ? AND mastered = 1",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))
}

/// Open a review session, snapshotting the due count at start time.
/// Per-question outcomes go through `record_review`; the session row
/// itself never touches mistake rows.
pub fn start_session(
    conn: &Connection,
    user_id: &str,
    belief_system_id: &str,
    now: DateTime<Utc>,
) -> Result<MistakeSessionRow, StorageError> {
    let due = due_count(conn, user_id, now)?;
    let id = new_id();

    conn.execute(
        r#"
        INSERT INTO mistake_sessions (id, user_id, belief_system_id, mistake_count, started_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
        params![id, user_id, belief_system_id, due, format_timestamp(now)],
    )
    .map_err(|e| StorageError::from_sql("Session insert failed", e))?;

    get_session(conn, &id)?
        .ok_or_else(|| StorageError::NotFound("Session not found after insert".to_string()))
}

/// Close a session with its outcome counts. Returns false when the
/// session does not exist or is already closed.
pub fn complete_session(
    conn: &Connection,
    id: &str,
    correct_count: i64,
    xp_earned: i64,
    now: DateTime<Utc>,
) -> Result<bool, StorageError> {
    let changes = conn
        .execute(
            r#"
            UPDATE mistake_sessions SET correct_count = ?, xp_earned = ?, completed_at = ?
            WHERE id = ? AND completed_at IS NULL
            "#,
            params![correct_count, xp_earned, format_timestamp(now), id],
        )
        .map_err(|e| StorageError::Internal(format!("Session update failed: {}", e)))?;

    Ok(changes > 0)
}

/// Get session by ID
pub fn get_session(conn: &Connection, id: &str) -> Result<Option<MistakeSessionRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM mistake_sessions WHERE id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            MistakeSessionRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::db::users::{create_user, CreateUserInput};

    fn test_conn() -> (Connection, String) {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        let user = create_user(
            &conn,
            CreateUserInput {
                id: None,
                display_name: "Tester".to_string(),
                email: None,
            },
        )
        .unwrap();
        (conn, user.id)
    }

    fn mistake(user_id: &str, question_id: &str) -> RecordMistakeInput {
        RecordMistakeInput {
            user_id: user_id.to_string(),
            belief_system_id: "norse".to_string(),
            lesson_id: None,
            question_id: question_id.to_string(),
            incorrect_answer: "Folkvangr".to_string(),
            correct_answer: "Valhalla".to_string(),
        }
    }

    #[test]
    fn test_backoff_grows() {
        assert_eq!(review_backoff(1), Duration::days(1));
        assert_eq!(review_backoff(2), Duration::days(2));
        assert_eq!(review_backoff(3), Duration::days(4));
        assert_eq!(review_backoff(4), Duration::days(8));
        for n in 1..10 {
            assert!(review_backoff(n + 1) > review_backoff(n));
        }
    }

    #[test]
    fn test_record_mistake_does_not_duplicate() {
        let (conn, user_id) = test_conn();
        let now = Utc::now();

        let first = record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();
        let second = record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();
        assert_eq!(first.id, second.id);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM mistakes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_new_mistake_is_immediately_due() {
        let (conn, user_id) = test_conn();
        let now = Utc::now();
        record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();
        assert_eq!(due_count(&conn, &user_id, now).unwrap(), 1);
    }

    #[test]
    fn test_correct_review_schedules_out() {
        let (mut conn, user_id) = test_conn();
        let now = Utc::now();
        let m = record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();

        let after = record_review(&mut conn, &m.id, true, now).unwrap().unwrap();
        assert_eq!(after.review_count, 1);
        assert!(!after.mastered);
        assert_eq!(due_count(&conn, &user_id, now).unwrap(), 0);
        // Due again once the backoff elapses
        assert_eq!(due_count(&conn, &user_id, now + Duration::days(1)).unwrap(), 1);
    }

    #[test]
    fn test_five_correct_reviews_master() {
        let (mut conn, user_id) = test_conn();
        let now = Utc::now();
        let m = record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();

        for i in 1..=MASTERY_THRESHOLD {
            let after = record_review(&mut conn, &m.id, true, now).unwrap().unwrap();
            assert_eq!(after.review_count, i);
            assert_eq!(after.mastered, i == MASTERY_THRESHOLD);
        }

        // Retired records never come due, even far in the future
        assert_eq!(due_count(&conn, &user_id, now + Duration::days(365)).unwrap(), 0);
        assert_eq!(mastered_count(&conn, &user_id).unwrap(), 1);

        // Terminal: further reviews are rejected
        assert!(record_review(&mut conn, &m.id, false, now).unwrap().is_none());
    }

    #[test]
    fn test_incorrect_review_resets_streak() {
        let (mut conn, user_id) = test_conn();
        let now = Utc::now();
        let m = record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();

        for _ in 0..3 {
            record_review(&mut conn, &m.id, true, now).unwrap();
        }
        assert_eq!(due_count(&conn, &user_id, now).unwrap(), 0);

        let after = record_review(&mut conn, &m.id, false, now).unwrap().unwrap();
        assert_eq!(after.review_count, 0);
        assert!(!after.mastered);
        // Immediately visible again
        assert_eq!(due_count(&conn, &user_id, now).unwrap(), 1);
    }

    #[test]
    fn test_mastered_mistake_allows_new_record() {
        let (mut conn, user_id) = test_conn();
        let now = Utc::now();
        let m = record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();
        for _ in 0..MASTERY_THRESHOLD {
            record_review(&mut conn, &m.id, true, now).unwrap();
        }

        // Missing the question again creates a fresh active record
        let fresh = record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();
        assert_ne!(fresh.id, m.id);
        assert_eq!(fresh.review_count, 0);
    }

    #[test]
    fn test_due_ordering_is_ascending_by_next_review() {
        let (mut conn, user_id) = test_conn();
        let now = Utc::now();

        let a = record_mistake(&conn, &mistake(&user_id, "qa"), now).unwrap();
        let b = record_mistake(&conn, &mistake(&user_id, "qb"), now - Duration::hours(5)).unwrap();
        // Push a's review out, then look far enough ahead that both are due
        record_review(&mut conn, &a.id, true, now).unwrap();

        let due = due_mistakes(&conn, &user_id, now + Duration::days(2)).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, b.id);
        assert_eq!(due[1].id, a.id);
    }

    #[test]
    fn test_session_lifecycle() {
        let (conn, user_id) = test_conn();
        let now = Utc::now();
        record_mistake(&conn, &mistake(&user_id, "q1"), now).unwrap();
        record_mistake(&conn, &mistake(&user_id, "q2"), now).unwrap();

        let session = start_session(&conn, &user_id, "norse", now).unwrap();
        assert_eq!(session.mistake_count, 2);
        assert!(session.completed_at.is_none());

        assert!(complete_session(&conn, &session.id, 2, 20, now).unwrap());
        let closed = get_session(&conn, &session.id).unwrap().unwrap();
        assert_eq!(closed.correct_count, Some(2));
        assert_eq!(closed.xp_earned, Some(20));
        assert!(closed.completed_at.is_some());

        // Closing twice is a no-op
        assert!(!complete_session(&conn, &session.id, 1, 5, now).unwrap());
    }
}
