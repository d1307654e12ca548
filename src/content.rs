//! Read-only reference content from the Content Provider
//!
//! Achievement definitions arrive as bundled JSON. The criteria threshold
//! is a tagged union validated at decode time: exactly one value shape is
//! legal per criteria kind. A decode failure indicates a packaging
//! defect, so it is logged and an empty set returned rather than
//! propagated.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Completion criteria for an achievement. The threshold type is fixed by
/// the kind: a path identifier, a count, or a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AchievementCriteria {
    /// Complete one specific path
    CompletePath(String),
    /// Complete at least N paths
    CompletePathCount(i64),
    /// Complete every available path
    CompleteAllPaths(bool),
    /// Accumulate a total XP threshold
    ReachTotalXp(i64),
    /// Answer N questions correctly (lifetime)
    CorrectAnswerCount(i64),
    /// Complete at least N lessons
    CompleteLessonCount(i64),
}

/// One achievement definition from the Content Provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub criteria: AchievementCriteria,
}

/// Decode achievement definitions from bundled JSON. Malformed content is
/// a packaging defect: log it and return an empty set.
pub fn load_achievement_defs(json: &str) -> Vec<AchievementDef> {
    match serde_json::from_str::<Vec<AchievementDef>>(json) {
        Ok(defs) => defs,
        Err(e) => {
            warn!("Failed to decode achievement definitions: {}", e);
            Vec::new()
        }
    }
}
