pub mod plans;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::habits::HabitBook;
use crate::progress::ProgressLedger;
use crate::security::auth::{IdentityVerifier, PasswordDigest};
use crate::store::Table;
use plans::{Plan, PlanCatalog};

#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: PasswordDigest,
    pub plan_id: Option<u64>,
    pub habits: BTreeSet<u64>,
    pub date_joined: DateTime<Utc>,
}

/// Public shape of a user; never carries the password digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserView {
    pub id: u64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub plan: Option<String>,
    pub habits: Vec<u64>,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Plan name; defaults to the free tier.
    #[serde(default)]
    pub plan: Option<String>,
}

/// Partial profile edit; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// User accounts plus the plan catalog they reference.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    users: Table<User>,
    plans: PlanCatalog,
    progress: ProgressLedger,
}

impl UserDirectory {
    pub fn new(plans: PlanCatalog, progress: ProgressLedger) -> Self {
        Self {
            users: Table::new(),
            plans,
            progress,
        }
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    pub async fn register(&self, new_user: NewUser) -> Result<User, ApiError> {
        let email = normalize_email(&new_user.email);
        if email.is_empty() || !email.contains('@') {
            return Err(ApiError::Validation("Enter a valid email address.".to_string()));
        }
        if new_user.password.is_empty() {
            return Err(ApiError::Validation("Password may not be blank.".to_string()));
        }
        let plan_id = match new_user.plan.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(
                self.plans
                    .by_name(name)
                    .map(|p| p.id)
                    .ok_or_else(|| ApiError::Validation(format!("Unknown plan \"{name}\".")))?,
            ),
            _ => self.plans.default_plan().map(|p| p.id),
        };
        let password = PasswordDigest::create(&new_user.password)?;

        let user = {
            let mut rows = self.users.write().await;
            if rows.values().any(|u| u.email == email) {
                return Err(ApiError::Validation(
                    "A user with this email already exists.".to_string(),
                ));
            }
            let id = self.users.allocate_id();
            let user = User {
                id,
                email,
                first_name: new_user.first_name,
                last_name: new_user.last_name,
                password,
                plan_id,
                habits: BTreeSet::new(),
                date_joined: Utc::now(),
            };
            rows.insert(id, user.clone());
            user
        };

        self.progress.open(user.id).await;
        info!(user_id = user.id, "Registered user");
        Ok(user)
    }

    pub async fn get(&self, id: u64) -> Option<User> {
        self.users.get(id).await
    }

    pub async fn require(&self, id: u64) -> Result<User, ApiError> {
        self.get(id).await.ok_or(ApiError::NotFound("User"))
    }

    pub async fn update_profile(&self, id: u64, update: ProfileUpdate) -> Result<User, ApiError> {
        self.users
            .update(id, move |u| {
                if let Some(first_name) = update.first_name {
                    u.first_name = first_name;
                }
                if let Some(last_name) = update.last_name {
                    u.last_name = last_name;
                }
                u.clone()
            })
            .await
            .ok_or(ApiError::NotFound("User"))
    }

    /// Remove the account and its progress row. Outstanding tokens for it
    /// stop authenticating because their subject no longer resolves.
    pub async fn delete(&self, id: u64) -> Result<(), ApiError> {
        self.users.remove(id).await.ok_or(ApiError::NotFound("User"))?;
        self.progress.close(id).await;
        info!(user_id = id, "Deleted user");
        Ok(())
    }

    pub fn plan_of(&self, user: &User) -> Option<&Plan> {
        user.plan_id.and_then(|id| self.plans.get(id))
    }

    pub fn view(&self, user: &User) -> UserView {
        UserView {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            plan: self.plan_of(user).map(|p| p.name.clone()),
            habits: user.habits.iter().copied().collect(),
            date_joined: user.date_joined,
        }
    }

    /// Replace the user's habit set, bounded by the plan's `max_habits`.
    ///
    /// The limit applies to the submitted list as given. Ids that do not name
    /// an existing habit are dropped from the stored set.
    pub async fn set_habits(
        &self,
        user_id: u64,
        habit_ids: &[u64],
        habits: &HabitBook,
    ) -> Result<User, ApiError> {
        let user = self.require(user_id).await?;
        if let Some(plan) = self.plan_of(&user) {
            if habit_ids.len() > plan.max_habits {
                debug!(user_id, requested = habit_ids.len(), max = plan.max_habits, "Habit limit exceeded");
                return Err(ApiError::LimitExceeded(format!(
                    "You can only have {} habits with your current plan.",
                    plan.max_habits
                )));
            }
        }

        let known = habits.existing_ids(habit_ids).await;
        self.users
            .update(user_id, move |u| {
                u.habits = known;
                u.clone()
            })
            .await
            .ok_or(ApiError::NotFound("User"))
    }
}

#[async_trait]
impl IdentityVerifier for UserDirectory {
    async fn verify_credentials(&self, email: &str, password: &str) -> Option<u64> {
        let email = normalize_email(email);
        let user = self.users.find(|u| u.email == email).await?;
        user.password.verify(password).then_some(user.id)
    }
}
