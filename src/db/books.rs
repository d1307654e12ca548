//! Generated books and per-user reading state
//!
//! A book is produced once per belief system by an external generator and
//! persisted read-only; chapters always come back sorted by chapter
//! number. BookProgress and BookReadingPreferences are at-most-one-per-
//! (user, book) rows maintained by read-then-branch upserts, each inside
//! one transaction.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::models::{current_timestamp, new_id};
use crate::error::StorageError;

/// Book row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRow {
    pub id: String,
    pub belief_system_id: String,
    pub title: String,
    pub created_at: String,
    #[serde(default)]
    pub chapters: Vec<ChapterRow>,
}

impl BookRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            belief_system_id: row.get("belief_system_id")?,
            title: row.get("title")?,
            created_at: row.get("created_at")?,
            chapters: vec![],
        })
    }
}

/// Chapter row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRow {
    pub id: String,
    pub book_id: String,
    pub chapter_number: i64,
    pub title: String,
    pub content: String,
    pub word_count: i64,
}

impl ChapterRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            book_id: row.get("book_id")?,
            chapter_number: row.get("chapter_number")?,
            title: row.get("title")?,
            content: row.get("content")?,
            word_count: row.get("word_count")?,
        })
    }
}

/// Input for persisting a generated book
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookInput {
    #[serde(default)]
    pub id: Option<String>,
    pub belief_system_id: String,
    pub title: String,
    #[serde(default)]
    pub chapters: Vec<CreateChapterInput>,
}

/// Input for one chapter of a generated book
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChapterInput {
    pub chapter_number: i64,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub word_count: i64,
}

/// Persist a generated book with its chapters in one transaction
pub fn save_book(conn: &mut Connection, input: CreateBookInput) -> Result<BookRow, StorageError> {
    let id = input.id.unwrap_or_else(new_id);

    let tx = conn
        .transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    tx.execute(
        "INSERT INTO books (id, belief_system_id, title) VALUES (?, ?, ?)",
        params![id, input.belief_system_id, input.title],
    )
    .map_err(|e| StorageError::from_sql("Book insert failed", e))?;

    for chapter in &input.chapters {
        tx.execute(
            r#"
            INSERT INTO book_chapters (id, book_id, chapter_number, title, content, word_count)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                new_id(),
                id,
                chapter.chapter_number,
                chapter.title,
                chapter.content,
                chapter.word_count,
            ],
        )
        .map_err(|e| StorageError::Internal(format!("Chapter insert failed: {}", e)))?;
    }

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    get_book(conn, &id)?
        .ok_or_else(|| StorageError::NotFound("Book not found after insert".to_string()))
}

/// Get book by ID with chapters sorted by chapter number
pub fn get_book(conn: &Connection, id: &str) -> Result<Option<BookRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM books WHERE id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => {
            let mut book = BookRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;
            book.chapters = get_chapters(conn, id)?;
            Ok(Some(book))
        }
        None => Ok(None),
    }
}

/// Get the book generated for a belief system, if any
pub fn get_book_by_belief_system(
    conn: &Connection,
    belief_system_id: &str,
) -> Result<Option<BookRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM books WHERE belief_system_id = ? ORDER BY created_at LIMIT 1")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![belief_system_id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => {
            let mut book = BookRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;
            book.chapters = get_chapters(conn, &book.id)?;
            Ok(Some(book))
        }
        None => Ok(None),
    }
}

/// List all books (without chapter bodies)
pub fn list_books(conn: &Connection) -> Result<Vec<BookRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM books ORDER BY created_at")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let books: Vec<BookRow> = stmt
        .query_map([], |row| BookRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(books)
}

/// Chapters for a book, sorted by chapter number
fn get_chapters(conn: &Connection, book_id: &str) -> Result<Vec<ChapterRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM book_chapters WHERE book_id = ? ORDER BY chapter_number")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let chapters: Vec<ChapterRow> = stmt
        .query_map(params![book_id], |row| ChapterRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(chapters)
}

// ============================================================================
// Reading progress
// ============================================================================

/// Book progress row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookProgressRow {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub current_chapter: i64,
    pub scroll_position: f64,
    pub percent_complete: f64,
    pub last_read_at: String,
    pub updated_at: String,
}

impl BookProgressRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            book_id: row.get("book_id")?,
            current_chapter: row.get("current_chapter")?,
            scroll_position: row.get("scroll_position")?,
            percent_complete: row.get("percent_complete")?,
            last_read_at: row.get("last_read_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Get reading progress for a (user, book) pair
pub fn get_book_progress(
    conn: &Connection,
    user_id: &str,
    book_id: &str,
) -> Result<Option<BookProgressRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM book_progress WHERE user_id = ? AND book_id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, book_id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            BookProgressRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Create or update reading progress for a (user, book) pair. An existing
/// row keeps its identifier.
pub fn upsert_book_progress(
    conn: &mut Connection,
    user_id: &str,
    book_id: &str,
    current_chapter: i64,
    scroll_position: f64,
    percent_complete: f64,
) -> Result<BookProgressRow, StorageError> {
    let percent = percent_complete.clamp(0.0, 100.0);

    let tx = conn
        .transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    match get_book_progress(&tx, user_id, book_id)? {
        Some(existing) => {
            tx.execute(
                r#"
                UPDATE book_progress SET
                    current_chapter = ?, scroll_position = ?, percent_complete = ?,
                    last_read_at = ?, updated_at = ?
                WHERE id = ?
                "#,
                params![
                    current_chapter,
                    scroll_position,
                    percent,
                    current_timestamp(),
                    current_timestamp(),
                    existing.id,
                ],
            )
            .map_err(|e| StorageError::Internal(format!("Progress update failed: {}", e)))?;
        }
        None => {
            tx.execute(
                r#"
                INSERT INTO book_progress (id, user_id, book_id, current_chapter, scroll_position, percent_complete)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![new_id(), user_id, book_id, current_chapter, scroll_position, percent],
            )
            .map_err(|e| StorageError::from_sql("Progress insert failed", e))?;
        }
    }

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    get_book_progress(conn, user_id, book_id)?
        .ok_or_else(|| StorageError::NotFound("Book progress not found after upsert".to_string()))
}

// ============================================================================
// Reading preferences
// ============================================================================

/// Reading preferences row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookReadingPreferencesRow {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub font_size: i64,
    pub line_spacing: f64,
    pub theme: String,
    pub updated_at: String,
}

impl BookReadingPreferencesRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            book_id: row.get("book_id")?,
            font_size: row.get("font_size")?,
            line_spacing: row.get("line_spacing")?,
            theme: row.get("theme")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Get reading preferences for a (user, book) pair
pub fn get_reading_preferences(
    conn: &Connection,
    user_id: &str,
    book_id: &str,
) -> Result<Option<BookReadingPreferencesRow>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT * FROM book_reading_preferences WHERE user_id = ? AND book_id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, book_id])
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| StorageError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            BookReadingPreferencesRow::from_row(row)
                .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Create or update reading preferences for a (user, book) pair
pub fn upsert_reading_preferences(
    conn: &mut Connection,
    user_id: &str,
    book_id: &str,
    font_size: i64,
    line_spacing: f64,
    theme: &str,
) -> Result<BookReadingPreferencesRow, StorageError> {
    let tx = conn
        .transaction()
        .map_err(|e| StorageError::Internal(format!("Transaction failed: {}", e)))?;

    match get_reading_preferences(&tx, user_id, book_id)? {
        Some(existing) => {
            tx.execute(
                r#"
                UPDATE book_reading_preferences SET font_size = ?, line_spacing = ?, theme = ?, updated_at = ?
                WHERE id = ?
                "#,
                params![font_size, line_spacing, theme, current_timestamp(), existing.id],
            )
            .map_err(|e| StorageError::Internal(format!("Preferences update failed: {}", e)))?;
        }
        None => {
            tx.execute(
                r#"
                INSERT INTO book_reading_preferences (id, user_id, book_id, font_size, line_spacing, theme)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![new_id(), user_id, book_id, font_size, line_spacing, theme],
            )
            .map_err(|e| StorageError::from_sql("Preferences insert failed", e))?;
        }
    }

    tx.commit()
        .map_err(|e| StorageError::Internal(format!("Commit failed: {}", e)))?;

    get_reading_preferences(conn, user_id, book_id)?
        .ok_or_else(|| StorageError::NotFound("Preferences not found after upsert".to_string()))
}

// ============================================================================
// Highlights
// ============================================================================

/// Highlight row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookHighlightRow {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub chapter_number: i64,
    pub position: i64,
    pub highlighted_text: String,
    pub note: Option<String>,
    pub consultation_id: Option<String>,
    pub created_at: String,
}

impl BookHighlightRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            book_id: row.get("book_id")?,
            chapter_number: row.get("chapter_number")?,
            position: row.get("position")?,
            highlighted_text: row.get("highlighted_text")?,
            note: row.get("note")?,
            consultation_id: row.get("consultation_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Input for adding a highlight
#[derive(Debug, Clone, Deserialize)]
pub struct AddHighlightInput {
    pub user_id: String,
    pub book_id: String,
    pub chapter_number: i64,
    #[serde(default)]
    pub position: i64,
    pub highlighted_text: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub consultation_id: Option<String>,
}

/// Add a highlight
pub fn add_highlight(conn: &Connection, input: &AddHighlightInput) -> Result<BookHighlightRow, StorageError> {
    let id = new_id();

    conn.execute(
        r#"
        INSERT INTO book_highlights (
            id, user_id, book_id, chapter_number, position,
            highlighted_text, note, consultation_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            input.user_id,
            input.book_id,
            input.chapter_number,
            input.position,
            input.highlighted_text,
            input.note,
            input.consultation_id,
        ],
    )
    .map_err(|e| StorageError::from_sql("Highlight insert failed", e))?;

    let mut stmt = conn
        .prepare("SELECT * FROM book_highlights WHERE id = ?")
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    stmt.query_row(params![id], |row| BookHighlightRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Highlight not found after insert: {}", e)))
}

/// Highlights for a (user, book) pair, ordered by (chapter, position)
pub fn list_highlights(
    conn: &Connection,
    user_id: &str,
    book_id: &str,
) -> Result<Vec<BookHighlightRow>, StorageError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT * FROM book_highlights
            WHERE user_id = ? AND book_id = ?
            ORDER BY chapter_number, position
            "#,
        )
        .map_err(|e| StorageError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<BookHighlightRow> = stmt
        .query_map(params![user_id, book_id], |row| BookHighlightRow::from_row(row))
        .map_err(|e| StorageError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Delete a highlight by ID
pub fn delete_highlight(conn: &Connection, id: &str) -> Result<bool, StorageError> {
    let changes = conn
        .execute("DELETE FROM book_highlights WHERE id = ?", params![id])
        .map_err(|e| StorageError::Internal(format!("Delete failed: {}", e)))?;

    Ok(changes > 0)
}
