use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::progress::{ProgressLedger, UserProgress};
use crate::store::Table;

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Habit {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HabitLog {
    pub id: u64,
    pub habit_id: u64,
    pub user_id: u64,
    pub date: NaiveDate,
    pub completed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHabit {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Result of saving a log's completion flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionOutcome {
    pub log: HabitLog,
    /// Progress after the credit, present only when the save crossed the
    /// not-completed → completed edge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<UserProgress>,
}

/// Habits and the per-day logs users record against them.
#[derive(Debug, Clone)]
pub struct HabitBook {
    habits: Table<Habit>,
    logs: Table<HabitLog>,
    progress: ProgressLedger,
    xp_per_completion: u64,
}

impl HabitBook {
    pub fn new(progress: ProgressLedger, xp_per_completion: u64) -> Self {
        Self {
            habits: Table::new(),
            logs: Table::new(),
            progress,
            xp_per_completion,
        }
    }

    pub async fn create_habit(&self, name: &str, description: &str) -> Result<Habit, ApiError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ApiError::Validation(format!(
                "Habit name must be between 1 and {MAX_NAME_LEN} characters."
            )));
        }
        let habit = self
            .habits
            .insert_with(|id| Habit {
                id,
                name: name.to_string(),
                description: description.to_string(),
                created_at: Utc::now(),
            })
            .await;
        debug!(habit_id = habit.id, "Created habit");
        Ok(habit)
    }

    pub async fn list_habits(&self) -> Vec<Habit> {
        self.habits.list().await
    }

    pub async fn get_habit(&self, id: u64) -> Option<Habit> {
        self.habits.get(id).await
    }

    pub async fn existing_ids(&self, ids: &[u64]) -> BTreeSet<u64> {
        let rows = self.habits.read().await;
        ids.iter().copied().filter(|id| rows.contains_key(id)).collect()
    }

    /// Record today's entry for a habit. At most one log per habit, user and
    /// day. Creating a log never credits XP, even when created completed.
    pub async fn log_habit(
        &self,
        user_id: u64,
        habit_id: u64,
        completed: bool,
        date: NaiveDate,
    ) -> Result<HabitLog, ApiError> {
        if self.habits.get(habit_id).await.is_none() {
            return Err(ApiError::NotFound("Habit"));
        }

        let mut rows = self.logs.write().await;
        if rows
            .values()
            .any(|l| l.habit_id == habit_id && l.user_id == user_id && l.date == date)
        {
            return Err(ApiError::Validation(
                "This habit is already logged for that day.".to_string(),
            ));
        }
        let id = self.logs.allocate_id();
        let log = HabitLog {
            id,
            habit_id,
            user_id,
            date,
            completed,
        };
        rows.insert(id, log.clone());
        Ok(log)
    }

    /// The user's logs, newest day first.
    pub async fn logs_for(&self, user_id: u64) -> Vec<HabitLog> {
        let mut logs = self.logs.filter(|l| l.user_id == user_id).await;
        logs.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        logs
    }

    /// Save a new completion flag for one of the user's logs.
    ///
    /// The persisted value is read and replaced under the log table's write
    /// lock, and the XP credit happens inside that same critical section, so
    /// only a genuine false → true transition ever credits.
    pub async fn set_completed(
        &self,
        user_id: u64,
        log_id: u64,
        completed: bool,
    ) -> Result<CompletionOutcome, ApiError> {
        let mut rows = self.logs.write().await;
        let log = rows
            .get_mut(&log_id)
            .filter(|l| l.user_id == user_id)
            .ok_or(ApiError::NotFound("Habit log"))?;

        let was_completed = log.completed;
        log.completed = completed;
        let log = log.clone();

        let progress = if !was_completed && completed {
            let progress = self.progress.credit(user_id, self.xp_per_completion).await;
            info!(
                user_id,
                log_id,
                xp = progress.xp,
                level = progress.level,
                "Credited habit completion"
            );
            Some(progress)
        } else {
            None
        };
        drop(rows);

        Ok(CompletionOutcome { log, progress })
    }
}
