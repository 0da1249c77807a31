use tracing::{info, warn};

/// Structured security events, emitted under the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn login_success(&self, user_id: u64) {
        info!(target: "audit", event = "login_success", user_id);
    }

    pub fn login_failure(&self, email: &str) {
        warn!(target: "audit", event = "login_failure", email);
    }

    pub fn token_rotated(&self, user_id: u64) {
        info!(target: "audit", event = "token_rotated", user_id);
    }

    pub fn refresh_rejected(&self, reason: &str) {
        warn!(target: "audit", event = "refresh_rejected", reason);
    }

    pub fn rotation_lost_race(&self, user_id: u64) {
        warn!(target: "audit", event = "rotation_lost_race", user_id);
    }

    pub fn bearer_rejected(&self, reason: &str) {
        warn!(target: "audit", event = "bearer_rejected", reason);
    }

    pub fn raw_bearer_passthrough(&self) {
        info!(target: "audit", event = "raw_bearer_passthrough");
    }
}
