//! Time-boxed leagues and their participants.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::habits::HabitBook;
use crate::store::Table;
use crate::users::plans::Plan;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct League {
    pub id: u64,
    pub created_by: u64,
    pub title: String,
    pub description: Option<String>,
    pub habit_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rules: Option<String>,
    pub rewards: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub habit_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub rules: Option<String>,
    #[serde(default)]
    pub rewards: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeagueParticipant {
    pub id: u64,
    pub league_id: u64,
    pub user_id: u64,
    pub score: i64,
}

impl LeagueDraft {
    fn validate(&self, today: NaiveDate) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::Validation("League title may not be blank.".to_string()));
        }
        if self.end_date <= self.start_date {
            return Err(ApiError::Validation(
                "End date must be after start date.".to_string(),
            ));
        }
        if self.start_date < today {
            return Err(ApiError::Validation(
                "Start date cannot be in the past.".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeagueBoard {
    leagues: Table<League>,
    participants: Table<LeagueParticipant>,
}

impl LeagueBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a league on behalf of `creator`, gated by their plan.
    pub async fn create(
        &self,
        creator: u64,
        plan: Option<&Plan>,
        draft: LeagueDraft,
        habits: &HabitBook,
        today: NaiveDate,
    ) -> Result<League, ApiError> {
        if let Some(plan) = plan {
            if !plan.allows_league_creation() {
                return Err(ApiError::PlanRestricted);
            }
        }
        draft.validate(today)?;
        if habits.get_habit(draft.habit_id).await.is_none() {
            return Err(ApiError::Validation(format!(
                "Habit {} does not exist.",
                draft.habit_id
            )));
        }

        let mut rows = self.leagues.write().await;
        if let Some(plan) = plan {
            let owned = rows.values().filter(|l| l.created_by == creator).count();
            if owned >= plan.max_leagues {
                return Err(ApiError::LimitExceeded(format!(
                    "You can only create {} leagues with your current plan.",
                    plan.max_leagues
                )));
            }
        }
        let id = self.leagues.allocate_id();
        let league = League {
            id,
            created_by: creator,
            title: draft.title.trim().to_string(),
            description: draft.description,
            habit_id: draft.habit_id,
            start_date: draft.start_date,
            end_date: draft.end_date,
            rules: draft.rules,
            rewards: draft.rewards,
            created_at: Utc::now(),
        };
        rows.insert(id, league.clone());
        info!(league_id = id, created_by = creator, "Created league");
        Ok(league)
    }

    pub async fn list(&self) -> Vec<League> {
        self.leagues.list().await
    }

    pub async fn get(&self, id: u64) -> Option<League> {
        self.leagues.get(id).await
    }

    /// Add `user_id` to the league with a zero score. Joining twice fails and
    /// leaves the existing participant untouched.
    pub async fn join(&self, league_id: u64, user_id: u64) -> Result<LeagueParticipant, ApiError> {
        if self.leagues.get(league_id).await.is_none() {
            return Err(ApiError::NotFound("League"));
        }

        let mut rows = self.participants.write().await;
        if rows
            .values()
            .any(|p| p.league_id == league_id && p.user_id == user_id)
        {
            return Err(ApiError::AlreadyJoined);
        }
        let id = self.participants.allocate_id();
        let participant = LeagueParticipant {
            id,
            league_id,
            user_id,
            score: 0,
        };
        rows.insert(id, participant.clone());
        info!(league_id, user_id, "User joined league");
        Ok(participant)
    }

    #[cfg(test)]
    pub(crate) async fn add_score(
        &self,
        league_id: u64,
        user_id: u64,
        delta: i64,
    ) -> Result<LeagueParticipant, ApiError> {
        let mut rows = self.participants.write().await;
        let participant = rows
            .values_mut()
            .find(|p| p.league_id == league_id && p.user_id == user_id)
            .ok_or(ApiError::NotFound("League participant"))?;
        participant.score = participant.score.saturating_add(delta);
        Ok(participant.clone())
    }

    /// Participants ranked by score, highest first; ties keep join order.
    pub async fn leaderboard(&self, league_id: u64) -> Result<Vec<LeagueParticipant>, ApiError> {
        if self.leagues.get(league_id).await.is_none() {
            return Err(ApiError::NotFound("League"));
        }
        let mut ranked = self.participants.filter(|p| p.league_id == league_id).await;
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        Ok(ranked)
    }

    pub async fn participant_count(&self, league_id: u64, user_id: u64) -> usize {
        self.participants
            .count(|p| p.league_id == league_id && p.user_id == user_id)
            .await
    }
}
