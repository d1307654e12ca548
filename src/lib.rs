//! Paideia Storage - progress and mastery persistence engine
//!
//! Local, single-writer persistence for a learning application: user
//! identity, path/lesson progress, quiz answer history, spaced-repetition
//! mistake review, XP/leveling, achievements, and long-form reading
//! state, plus a best-effort cross-device reconciliation bridge.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      ProgressDb (SQLite)                    │
//! ├────────────────────────────────────────────────────────────┤
//! │  db::schema     - tables + additive, idempotent migrations  │
//! │  db::*          - per-entity CRUD, one transaction per write│
//! │  leveling       - pure XP -> level threshold table          │
//! │  db::mistakes   - spaced-repetition review scheduler        │
//! │  evaluator      - achievement progress recomputation        │
//! │  sync           - throttled max-merge with a remote KV store│
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! One store handle per process; tests use a disposable in-memory
//! instance constructed the same way. Callers receive owned row copies
//! and route every mutation back through the store.

pub mod content;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod leveling;
pub mod sync;

pub use content::{load_achievement_defs, AchievementCriteria, AchievementDef};
pub use db::{DbStats, ProgressDb};
pub use error::StorageError;
pub use sync::{ProgressSnapshot, RemoteStore, SyncBridge, SNAPSHOT_KEY};
