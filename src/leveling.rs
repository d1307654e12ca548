//! Leveling engine
//!
//! Pure mapping from cumulative experience points to a level number.
//! The curve is a fixed, hand-tuned threshold table for levels 1-10,
//! then a flat cost per level beyond the table.

/// Cumulative XP required to reach each level (index 0 = level 1).
const LEVEL_THRESHOLDS: [i64; 10] = [0, 100, 250, 400, 550, 700, 800, 875, 940, 1000];

/// Flat cost per level once past the threshold table.
const XP_PER_LEVEL_BEYOND_TABLE: i64 = 500;

/// Level for a cumulative XP total. Monotonically non-decreasing in XP,
/// level 1 at XP 0 (and for any negative input).
pub fn level_for(total_xp: i64) -> i32 {
    if total_xp <= 0 {
        return 1;
    }

    let mut level = 1;
    for (i, threshold) in LEVEL_THRESHOLDS.iter().enumerate() {
        if total_xp >= *threshold {
            level = (i + 1) as i32;
        } else {
            return level;
        }
    }

    // Past the table: 500 XP per additional level
    let last = LEVEL_THRESHOLDS[LEVEL_THRESHOLDS.len() - 1];
    let extra = (total_xp - last) / XP_PER_LEVEL_BEYOND_TABLE;
    level + extra as i32
}

/// Cumulative XP required to reach `level` (level 1 costs nothing).
pub fn xp_for_level(level: i32) -> i64 {
    if level <= 1 {
        return 0;
    }

    let idx = (level - 1) as usize;
    if idx < LEVEL_THRESHOLDS.len() {
        LEVEL_THRESHOLDS[idx]
    } else {
        let last = LEVEL_THRESHOLDS[LEVEL_THRESHOLDS.len() - 1];
        let beyond = (level as i64) - (LEVEL_THRESHOLDS.len() as i64);
        last + beyond * XP_PER_LEVEL_BEYOND_TABLE
    }
}

/// XP still needed to reach the next level from a cumulative total.
pub fn xp_to_next_level(total_xp: i64) -> i64 {
    let current = level_for(total_xp);
    let next_threshold = xp_for_level(current + 1);
    (next_threshold - total_xp.max(0)).max(0)
}
