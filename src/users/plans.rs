use serde::Serialize;
use std::sync::Arc;

pub const FREE_PLAN: &str = "Free";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: u64,
    pub name: String,
    pub price_monthly_cents: u32,
    pub price_annually_cents: u32,
    pub features: String,
    pub max_habits: usize,
    pub max_leagues: usize,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.name.eq_ignore_ascii_case(FREE_PLAN)
    }

    pub fn allows_league_creation(&self) -> bool {
        !self.is_free()
    }
}

/// Read-only plan table, seeded with the three default tiers.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Arc<Vec<Plan>>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(vec![
            Plan {
                id: 1,
                name: FREE_PLAN.to_string(),
                price_monthly_cents: 0,
                price_annually_cents: 0,
                features: "Basic tracking with limited features".to_string(),
                max_habits: 3,
                max_leagues: 1,
            },
            Plan {
                id: 2,
                name: "Plus".to_string(),
                price_monthly_cents: 999,
                price_annually_cents: 9_999,
                features: "More habits and leagues, better analytics".to_string(),
                max_habits: 10,
                max_leagues: 3,
            },
            Plan {
                id: 3,
                name: "Premium".to_string(),
                price_monthly_cents: 1_999,
                price_annually_cents: 19_999,
                features: "Unlimited habits, unlimited leagues, full analytics".to_string(),
                max_habits: 999,
                max_leagues: 999,
            },
        ])
    }
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self {
            plans: Arc::new(plans),
        }
    }

    pub fn list(&self) -> &[Plan] {
        &self.plans
    }

    pub fn get(&self, id: u64) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Plan assigned to users who do not pick one.
    pub fn default_plan(&self) -> Option<&Plan> {
        self.by_name(FREE_PLAN)
    }
}
