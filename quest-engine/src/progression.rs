//! XP and level progression.
//!
//! `level = xp / 100 + 1`. Neither XP nor level ever decreases.

use chrono::Utc;

use crate::error::ProgressionError;
use crate::types::User;

pub const XP_PER_LEVEL: u64 = 100;

pub fn level_for_xp(xp: u64) -> u32 {
    u32::try_from(xp / XP_PER_LEVEL + 1).unwrap_or(u32::MAX)
}

/// Effect of one XP application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub new_xp: u64,
    pub new_level: u32,
    pub leveled_up: bool,
}

/// Add `delta` XP to `user` and recompute the level.
///
/// The user is left untouched when the delta is rejected.
pub fn apply_xp(user: &mut User, delta: i64) -> Result<LevelChange, ProgressionError> {
    let delta = u64::try_from(delta).map_err(|_| ProgressionError::NegativeXp(delta))?;
    let new_xp = user
        .xp
        .checked_add(delta)
        .ok_or(ProgressionError::XpOverflow { xp: user.xp, delta })?;
    let new_level = level_for_xp(new_xp).max(user.level);
    let leveled_up = new_level > user.level;

    user.xp = new_xp;
    user.level = new_level;
    user.updated_at = Utc::now();

    Ok(LevelChange {
        new_xp,
        new_level,
        leveled_up,
    })
}
