//! User CRUD operations, XP accrual, and account cascade delete

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{current_timestamp, new_id};
use crate::error::StorageError;
use crate::leveling;

/// User row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub total_xp: i64,
    pub current_level: i32,
    pub streak_days: i64,
    pub last_active_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            display_name: row.get("display_name")?,
            email: row.get("email")?,
            total_xp: row.get("total_xp")?,
            current_level: row.get("current_level")?,
            streak_days: row.get("streak_days")?,
            last_active_date: row.get("last_active_date")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Input for creating a user
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserInput {
    #[serde(default)]
    pub id: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Create a user. A duplicate email surfaces as a constraint violation.
pub fn create_user(conn: &Connection, input: CreateUserInput) -> Result<UserRow, StorageError> {
    let id = input.id.unwrap_or_else(new_id);

    conn.execute(
        r#"
        INSERT INTO users (id, display_name, email, total_xp, current_level, streak_days)
        VALUES (?, ?, ?, 0, 1, 0)
        "#,
        params![id, input.display_name, input.email],
    )
    .map_err(|e| StorageError::from_sql("User insert failed", e))?;

    get_user(conn, &id)?
        .ok_or_else(|| StorageError::NotFound("User not found after insert".to_string()))
}

/// Get user by ID
pub fn get_user(conn: &Connection, id: &str) -> Result<Option<UserRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM users WHERE id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            UserRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get user by email
pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM users WHERE email = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![email])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            UserRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// List all users ordered by creation time
pub fn list_users(conn: &Connection) -> Result<Vec<UserRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM users ORDER BY created_at")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let users: Vec<UserRow> = stmt
        .query_map([], |row| UserRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(users)
}

/// Update display name and email. Returns false when the user does not
/// exist; callers detect that by re-reading, not via an error.
pub fn update_profile(
    conn: &Connection,
    id: &str,
    display_name: &str,
    email: Option<&str>,
) -> Result<bool, StorageError> {
    let changes = conn
        .execute(
            "UPDATE users SET display_name = ?, email = ?, updated_at = ? WHERE id = ?",
            params![display_name, email, current_timestamp(), id],
        )
        .map_err(|e| StorageError::from_sql("User update failed", e))?;

    Ok(changes > 0)
}

/// Add XP to a user, recomputing the level in the same transaction.
/// Negative amounts clamp the total at zero. Returns the refreshed row,
/// or None when the user does not exist.
pub fn add_xp(
    conn: &mut Connection,
    user_id: &str,
    amount: i64,
) -> Result<Option<UserRow>, StorageError> {
    let tx = conn
        .transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    let total: Option<i64> = tx
        .query_row("SELECT total_xp FROM users WHERE id = ?", params![user_id], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StorageError::Internal(format!("Query failed: {}", other))),
        })?;

    let total = match total {
        Some(t) => t,
        None => return Ok(None),
    };

    let new_total = (total + amount).max(0);
    let new_level = leveling::level_for(new_total);

    tx.execute(
        "UPDATE users SET total_xp = ?, current_level = ?, updated_at = ? WHERE id = ?",
        params![new_total, new_level, current_timestamp(), user_id],
    )
    .map_err(|e| StorageError::Internal(format!("XP update failed: {}", e)))?;

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    debug!("User {} XP {} -> {} (level {})", user_id, total, new_total, new_level);

    get_user(conn, user_id)
}

/// Record activity for a day, maintaining the streak counter:
/// consecutive day extends the streak, a gap resets it to 1, and a repeat
/// call on the same day is a no-op. Returns the new streak length, or
/// None when the user does not exist.
pub fn touch_active(
    conn: &mut Connection,
    user_id: &str,
    today: NaiveDate,
) -> Result<Option<i64>, StorageError> {
    let tx = conn
        .transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    let user = match get_user(&tx, user_id)? {
        Some(u) => u,
        None => return Ok(None),
    };

    let today_str = today.format("%Y-%m-%d").to_string();
    let last = user
        .last_active_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

    let new_streak = match last {
        Some(d) if d == today => return Ok(Some(user.streak_days)),
        Some(d) if today.signed_duration_since(d).num_days() == 1 => user.streak_days + 1,
        _ => 1,
    };

    tx.execute(
        "UPDATE users SET streak_days = ?, last_active_date = ?, updated_at = ? WHERE id = ?",
        params![new_streak, today_str, current_timestamp(), user_id],
    )
    .map_err(|e| StorageError::Internal(format!("Streak update failed: {}", e)))?;

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    Ok(Some(new_streak))
}

/// Delete a user and all rows scoped to them in one transaction.
/// Books themselves are shared reference data and survive.
pub fn delete_user(conn: &mut Connection, id: &str) -> Result<bool, StorageError> {
    let tx = conn
        .transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    for table in [
        "progress",
        "user_answers",
        "user_achievements",
        "mistakes",
        "mistake_sessions",
        "book_progress",
        "book_reading_preferences",
        "book_highlights",
    ] {
        tx.execute(&format!("DELETE FROM {} WHERE user_id = ?", table), params![id])
            .map_err(|e| StorageError::Internal(format!("Cascade delete failed: {}", e)))?;
    }

    let changes = tx
        .execute("DELETE FROM users WHERE id = ?", params![id])
        .map_err(|e| StorageError::Internal(format!("User delete failed: {}", e)))?;

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        conn
    }

    fn make_user(conn: &Connection) -> UserRow {
        create_user(
            conn,
            CreateUserInput {
                id: None,
                display_name: "Tester".to_string(),
                email: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_get_user() {
        let conn = test_conn();
        let user = make_user(&conn);
        assert_eq!(user.total_xp, 0);
        assert_eq!(user.current_level, 1);

        let fetched = get_user(&conn, &user.id).unwrap().unwrap();
        assert_eq!(fetched.display_name, "Tester");
    }

    #[test]
    fn test_duplicate_email_is_constraint_error() {
        let conn = test_conn();
        let input = CreateUserInput {
            id: None,
            display_name: "A".to_string(),
            email: Some("a@example.com".to_string()),
        };
        create_user(&conn, input.clone()).unwrap();
        let err = create_user(&conn, input).unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)));
    }

    #[test]
    fn test_add_xp_keeps_level_invariant() {
        let mut conn = test_conn();
        let user = make_user(&conn);

        let after = add_xp(&mut conn, &user.id, 120).unwrap().unwrap();
        assert_eq!(after.total_xp, 120);
        assert_eq!(after.current_level, leveling::level_for(120));
        assert_eq!(after.current_level, 2);

        let after = add_xp(&mut conn, &user.id, 130).unwrap().unwrap();
        assert_eq!(after.total_xp, 250);
        assert_eq!(after.current_level, 3);
    }

    #[test]
    fn test_add_xp_clamps_at_zero() {
        let mut conn = test_conn();
        let user = make_user(&conn);
        add_xp(&mut conn, &user.id, 50).unwrap();

        let after = add_xp(&mut conn, &user.id, -200).unwrap().unwrap();
        assert_eq!(after.total_xp, 0);
        assert_eq!(after.current_level, 1);
    }

    #[test]
    fn test_add_xp_missing_user_is_none() {
        let mut conn = test_conn();
        assert!(add_xp(&mut conn, "ghost", 10).unwrap().is_none());
    }

    #[test]
    fn test_streak_transitions() {
        let mut conn = test_conn();
        let user = make_user(&conn);
        let day = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();

        assert_eq!(touch_active(&mut conn, &user.id, day("2026-03-01")).unwrap(), Some(1));
        // Same day again: no change
        assert_eq!(touch_active(&mut conn, &user.id, day("2026-03-01")).unwrap(), Some(1));
        // Next day: extends
        assert_eq!(touch_active(&mut conn, &user.id, day("2026-03-02")).unwrap(), Some(2));
        // Gap: resets
        assert_eq!(touch_active(&mut conn, &user.id, day("2026-03-05")).unwrap(), Some(1));
    }

    #[test]
    fn test_touch_active_missing_user_is_none() {
        let mut conn = test_conn();
        let day = NaiveDate::parse_from_str("2026-03-01", "%Y-%m-%d").unwrap();
        assert!(touch_active(&mut conn, "ghost", day).unwrap().is_none());
    }

    #[test]
    fn test_update_profile_missing_user_is_noop() {
        let conn = test_conn();
        assert!(!update_profile(&conn, "ghost", "Nobody", None).unwrap());
    }
}
