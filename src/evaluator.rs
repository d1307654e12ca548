//! Achievement evaluator
//!
//! Recomputes per-user progress toward every achievement definition from
//! current aggregates and upserts the results. Evaluation only reads
//! shared state; all writes go through the user_achievements upsert,
//! which enforces completion monotonicity.

use tracing::debug;

use crate::content::{AchievementCriteria, AchievementDef};
use crate::db::{achievements, answers, progress, users, ProgressDb, UserAchievementRow};
use crate::error::StorageError;

/// Aggregates an evaluation pass reads once up front
struct UserAggregates {
    total_xp: i64,
    completed_paths: Vec<String>,
    completed_lessons: i64,
    correct_answers: i64,
}

/// Evaluate every definition for a user and persist the resulting
/// progress fractions. `total_path_count` is the number of paths the
/// Content Provider currently ships (needed for complete-all-paths).
/// Returns the refreshed rows in definition order; an unknown user has
/// nothing to evaluate and yields no rows.
pub fn check_achievements(
    db: &ProgressDb,
    defs: &[AchievementDef],
    user_id: &str,
    total_path_count: usize,
) -> Result<Vec<UserAchievementRow>, StorageError> {
    let aggregates = db.with_conn(|conn| {
        let user = match users::get_user(conn, user_id)? {
            Some(u) => u,
            None => return Ok(None),
        };

        Ok(Some(UserAggregates {
            total_xp: user.total_xp,
            completed_paths: progress::completed_paths(conn, user_id)?,
            completed_lessons: progress::completed_lesson_count(conn, user_id)?,
            correct_answers: answers::correct_answer_count(conn, user_id)?,
        }))
    })?;

    let aggregates = match aggregates {
        Some(a) => a,
        None => {
            debug!("No user {}, skipping achievement evaluation", user_id);
            return Ok(Vec::new());
        }
    };

    let mut results = Vec::with_capacity(defs.len());

    for def in defs {
        let fraction = criteria_fraction(&def.criteria, &aggregates, total_path_count);
        debug!("Achievement {} for {}: {:.2}", def.id, user_id, fraction);

        let row = db.with_conn_mut(|conn| {
            achievements::upsert_achievement_progress(conn, user_id, &def.id, fraction)
        })?;
        results.push(row);
    }

    Ok(results)
}

/// Progress fraction toward one criteria, clamped to [0, 1]. A threshold
/// of zero (or an empty catalog for complete-all-paths) counts as
/// satisfied.
fn criteria_fraction(
    criteria: &AchievementCriteria,
    aggregates: &UserAggregates,
    total_path_count: usize,
) -> f64 {
    let ratio = |have: i64, need: i64| -> f64 {
        if need <= 0 {
            1.0
        } else {
            (have as f64 / need as f64).clamp(0.0, 1.0)
        }
    };

    match criteria {
        AchievementCriteria::CompletePath(path_id) => {
            if aggregates.completed_paths.iter().any(|p| p == path_id) {
                1.0
            } else {
                0.0
            }
        }
        AchievementCriteria::CompletePathCount(n) => {
            ratio(aggregates.completed_paths.len() as i64, *n)
        }
        AchievementCriteria::CompleteAllPaths(_) => {
            ratio(aggregates.completed_paths.len() as i64, total_path_count as i64)
        }
        AchievementCriteria::ReachTotalXp(n) => ratio(aggregates.total_xp, *n),
        AchievementCriteria::CorrectAnswerCount(n) => ratio(aggregates.correct_answers, *n),
        AchievementCriteria::CompleteLessonCount(n) => ratio(aggregates.completed_lessons, *n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregates() -> UserAggregates {
        UserAggregates {
            total_xp: 300,
            completed_paths: vec!["norse".to_string(), "greek".to_string()],
            completed_lessons: 7,
            correct_answers: 40,
        }
    }

    #[test]
    fn test_specific_path_is_all_or_nothing() {
        let agg = aggregates();
        let hit = AchievementCriteria::CompletePath("norse".to_string());
        let miss = AchievementCriteria::CompletePath("egyptian".to_string());
        assert_eq!(criteria_fraction(&hit, &agg, 5), 1.0);
        assert_eq!(criteria_fraction(&miss, &agg, 5), 0.0);
    }

    #[test]
    fn test_count_criteria_are_proportional() {
        let agg = aggregates();
        assert_eq!(
            criteria_fraction(&AchievementCriteria::CompletePathCount(4), &agg, 5),
            0.5
        );
        assert_eq!(
            criteria_fraction(&AchievementCriteria::ReachTotalXp(600), &agg, 5),
            0.5
        );
        assert_eq!(
            criteria_fraction(&AchievementCriteria::CorrectAnswerCount(40), &agg, 5),
            1.0
        );
    }

    #[test]
    fn test_fraction_clamped_above_one() {
        let agg = aggregates();
        assert_eq!(
            criteria_fraction(&AchievementCriteria::CompleteLessonCount(5), &agg, 5),
            1.0
        );
    }

    #[test]
    fn test_zero_threshold_counts_as_satisfied() {
        let agg = aggregates();
        assert_eq!(
            criteria_fraction(&AchievementCriteria::ReachTotalXp(0), &agg, 5),
            1.0
        );
        assert_eq!(
            criteria_fraction(&AchievementCriteria::CompleteAllPaths(true), &agg, 0),
            1.0
        );
    }

    #[test]
    fn test_missing_user_yields_no_rows() {
        let db = ProgressDb::open_in_memory().unwrap();
        let defs = vec![AchievementDef {
            id: "one-path".to_string(),
            title: "One Path".to_string(),
            description: None,
            criteria: AchievementCriteria::CompletePathCount(1),
        }];
        let rows = check_achievements(&db, &defs, "ghost", 5).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_all_paths_uses_catalog_size() {
        let agg = aggregates();
        assert_eq!(
            criteria_fraction(&AchievementCriteria::CompleteAllPaths(true), &agg, 4),
            0.5
        );
        assert_eq!(
            criteria_fraction(&AchievementCriteria::CompleteAllPaths(true), &agg, 2),
            1.0
        );
    }
}
