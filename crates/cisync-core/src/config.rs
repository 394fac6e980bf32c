//! Engine configuration.
//!
//! Every field has a default, so an empty TOML document (or a partial one)
//! yields a usable [`EngineConfig`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, FixOptions, Result};

/// How the wait between polls evolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStrategy {
    /// Always `initial_interval`.
    Fixed,
    /// Multiply by `backoff_multiplier` each poll, capped at `max_interval`.
    Exponential,
    /// Exponential, but back toward `initial_interval` while checks are
    /// completing.
    #[default]
    Adaptive,
}

impl std::str::FromStr for PollStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!("unknown poll strategy: {other}")),
        }
    }
}

/// Options for one `wait_for_checks` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollOptions {
    /// Overall deadline for the call.
    pub timeout_ms: u64,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub strategy: PollStrategy,
    pub backoff_multiplier: f64,
    /// Return as soon as a critical failure is observed.
    pub fail_fast: bool,
    /// Bound on a single fetch, distinct from the overall deadline.
    pub request_timeout_ms: u64,
    /// Consecutive transient fetch errors tolerated before giving up.
    pub max_fetch_retries: u32,
    /// How long `total == 0` may persist before it is reported as
    /// "no checks configured".
    pub no_checks_grace_ms: u64,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30 * 60 * 1000,
            initial_interval_ms: 10_000,
            max_interval_ms: 60_000,
            strategy: PollStrategy::Adaptive,
            backoff_multiplier: 2.0,
            fail_fast: true,
            request_timeout_ms: 30_000,
            max_fetch_retries: 3,
            no_checks_grace_ms: 60_000,
        }
    }
}

impl PollOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn no_checks_grace(&self) -> Duration {
        Duration::from_millis(self.no_checks_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EngineError::Config(msg));
        if self.timeout_ms == 0 {
            return invalid("poll.timeout_ms must be greater than zero".into());
        }
        if self.initial_interval_ms == 0 || self.max_interval_ms == 0 {
            return invalid("poll intervals must be greater than zero".into());
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return invalid(format!(
                "poll.max_interval_ms ({}) is below poll.initial_interval_ms ({})",
                self.max_interval_ms, self.initial_interval_ms
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return invalid(format!(
                "poll.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.request_timeout_ms == 0 {
            return invalid("poll.request_timeout_ms must be greater than zero".into());
        }
        Ok(())
    }
}

/// Remediation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    pub enabled: bool,
    pub dry_run: bool,
    pub interactive: bool,
    pub allow_unsafe: bool,
    pub max_attempts: u32,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: false,
            interactive: false,
            allow_unsafe: false,
            max_attempts: 2,
        }
    }
}

impl RemediationConfig {
    pub fn fix_options(&self) -> FixOptions {
        FixOptions {
            dry_run: self.dry_run,
            interactive: self.interactive,
            allow_unsafe: self.allow_unsafe,
            max_attempts: self.max_attempts,
        }
    }
}

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll: PollOptions,
    pub remediation: RemediationConfig,
}

impl EngineConfig {
    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        self.poll.validate()
    }
}
