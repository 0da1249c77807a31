//! XP curve and per-user progress.
//!
//! Level 1 starts at 0 XP. Reaching level `n` (n ≥ 2) costs an extra
//! `floor(base_xp * multiplier^(n-2))` on top of the previous threshold, so
//! with the defaults (100, 1.5) the thresholds run 0, 100, 250, 475, ...
//! Level is never stored independently of XP: every mutation recomputes it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelCurve {
    pub base_xp: u64,
    pub multiplier: f64,
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self {
            base_xp: 100,
            multiplier: 1.5,
        }
    }
}

impl LevelCurve {
    pub fn new(base_xp: u64, multiplier: f64) -> Self {
        Self {
            base_xp,
            multiplier,
        }
    }

    /// XP needed to go from `level - 1` to `level`.
    fn step(&self, level: u32) -> u64 {
        if level < 2 {
            return 0;
        }
        (self.base_xp as f64 * self.multiplier.powi(level as i32 - 2)) as u64
    }

    /// Total XP at which `level` starts.
    pub fn xp_for_level(&self, level: u32) -> u64 {
        (2..=level).fold(0u64, |total, lvl| total.saturating_add(self.step(lvl)))
    }

    /// Largest level whose threshold does not exceed `xp`.
    pub fn calculate_level(&self, xp: u64) -> u32 {
        let mut level = 1;
        let mut floor = 0u64;
        loop {
            let next = floor.saturating_add(self.step(level + 1));
            // a zero step or saturation means the curve stopped growing
            if next > xp || next == floor {
                return level;
            }
            floor = next;
            level += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: u64,
    pub xp: u64,
    pub level: u32,
}

impl UserProgress {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            xp: 0,
            level: 1,
        }
    }

    pub fn add_xp(&mut self, amount: u64, curve: &LevelCurve) {
        self.xp = self.xp.saturating_add(amount);
        self.level = curve.calculate_level(self.xp);
    }

    pub fn current_xp_in_level(&self, curve: &LevelCurve) -> u64 {
        self.xp.saturating_sub(curve.xp_for_level(self.level))
    }

    pub fn xp_to_next_level(&self, curve: &LevelCurve) -> u64 {
        curve.xp_for_level(self.level + 1).saturating_sub(self.xp)
    }

    pub fn report(&self, curve: &LevelCurve) -> ProgressReport {
        ProgressReport {
            user_id: self.user_id,
            xp: self.xp,
            level: self.level,
            current_xp_in_level: self.current_xp_in_level(curve),
            xp_to_next_level: self.xp_to_next_level(curve),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub user_id: u64,
    pub xp: u64,
    pub level: u32,
    pub current_xp_in_level: u64,
    pub xp_to_next_level: u64,
}

/// Progress rows keyed by user id. Updates run under the write lock, so
/// concurrent credits for the same user never lose an increment.
#[derive(Debug, Clone)]
pub struct ProgressLedger {
    rows: Arc<RwLock<HashMap<u64, UserProgress>>>,
    curve: LevelCurve,
}

impl ProgressLedger {
    pub fn new(curve: LevelCurve) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            curve,
        }
    }

    pub fn curve(&self) -> &LevelCurve {
        &self.curve
    }

    /// Create the row for a new user; existing rows are left alone.
    pub async fn open(&self, user_id: u64) -> UserProgress {
        self.rows
            .write()
            .await
            .entry(user_id)
            .or_insert_with(|| UserProgress::new(user_id))
            .clone()
    }

    pub async fn get(&self, user_id: u64) -> Option<UserProgress> {
        self.rows.read().await.get(&user_id).cloned()
    }

    /// Drop the row of a removed account.
    pub async fn close(&self, user_id: u64) -> Option<UserProgress> {
        self.rows.write().await.remove(&user_id)
    }

    pub async fn credit(&self, user_id: u64, amount: u64) -> UserProgress {
        let mut rows = self.rows.write().await;
        let progress = rows
            .entry(user_id)
            .or_insert_with(|| UserProgress::new(user_id));
        let before = progress.level;
        progress.add_xp(amount, &self.curve);
        if progress.level > before {
            info!(user_id, level = progress.level, xp = progress.xp, "User levelled up");
        }
        progress.clone()
    }
}
