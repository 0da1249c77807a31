use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::progress::LevelCurve;

/// Environment variable that overrides `auth.signing_key`.
pub const SIGNING_KEY_ENV: &str = "HABITS_SIGNING_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC key for signed tokens. Empty means "generate one at startup".
    #[serde(default)]
    pub signing_key: String,
    #[serde(default = "default_access_lifetime")]
    pub access_lifetime_secs: u64,
    #[serde(default = "default_refresh_lifetime")]
    pub refresh_lifetime_secs: u64,
    /// Let bearer values that are not known opaque handles fall through to
    /// signed-token verification.
    #[serde(default = "default_true")]
    pub accept_raw_tokens: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionConfig {
    #[serde(default = "default_base_xp")]
    pub base_xp: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_xp_per_completion")]
    pub xp_per_completion: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub progression: ProgressionConfig,
}

fn default_access_lifetime() -> u64 {
    300
}
fn default_refresh_lifetime() -> u64 {
    86_400
}
fn default_true() -> bool {
    true
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_base_xp() -> u64 {
    100
}
fn default_multiplier() -> f64 {
    1.5
}
fn default_xp_per_completion() -> u64 {
    10
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_key: String::new(),
            access_lifetime_secs: default_access_lifetime(),
            refresh_lifetime_secs: default_refresh_lifetime(),
            accept_raw_tokens: true,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            base_xp: default_base_xp(),
            multiplier: default_multiplier(),
            xp_per_completion: default_xp_per_completion(),
        }
    }
}

impl AuthConfig {
    pub fn access_lifetime(&self) -> Duration {
        Duration::from_secs(self.access_lifetime_secs)
    }

    pub fn refresh_lifetime(&self) -> Duration {
        Duration::from_secs(self.refresh_lifetime_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl ProgressionConfig {
    pub fn curve(&self) -> LevelCurve {
        LevelCurve::new(self.base_xp, self.multiplier)
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let mut cfg: Config = serde_json::from_str(&raw).context("parsing JSON")?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(SIGNING_KEY_ENV) {
            if !key.trim().is_empty() {
                self.auth.signing_key = key;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.access_lifetime_secs == 0 || self.auth.refresh_lifetime_secs == 0 {
            bail!("token lifetimes must be positive");
        }
        if self.progression.base_xp == 0 {
            bail!("progression.base_xp must be positive");
        }
        if !(self.progression.multiplier > 1.0) {
            bail!("progression.multiplier must be greater than 1.0");
        }
        Ok(())
    }
}
