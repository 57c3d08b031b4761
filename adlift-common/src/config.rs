//! Engine configuration
//!
//! Every tuned constant in the engine lives here: batch sizes, thresholds,
//! timeouts, and retry bounds. Components receive their sub-struct at
//! construction and never read ambient globals. All values have defaults
//! suitable for a typical page; hosts may override any subset via TOML.

use crate::{Error, Result};
use serde::Deserialize;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gateway: GatewayConfig,
    pub scorer: ScorerConfig,
    pub visibility: VisibilityConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
    pub monitor: MonitorConfig,
}

impl EngineConfig {
    /// Parse configuration from a TOML document, falling back to defaults
    /// for any omitted keys
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break engine invariants
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_wave_size == 0 {
            return Err(Error::Config(
                "dispatch.max_wave_size must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.jitter_low > self.retry.jitter_high {
            return Err(Error::Config(
                "retry.jitter_low must not exceed retry.jitter_high".to_string(),
            ));
        }
        if self.retry.growth < 1.0 {
            return Err(Error::Config(
                "retry.growth must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.visibility.threshold) {
            return Err(Error::Config(
                "visibility.threshold must be within [0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bridge gateway tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Maximum time to wait for the bridge readiness signal (ms)
    pub bootstrap_timeout_ms: u64,

    /// Consecutive bootstrap failures before the circuit opens
    pub circuit_failure_threshold: u32,

    /// How long an open circuit fails fast before a half-open probe (ms)
    pub circuit_cooldown_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bootstrap_timeout_ms: 5_000,
            circuit_failure_threshold: 3,
            circuit_cooldown_ms: 30_000,
        }
    }
}

/// Priority scorer weights
///
/// The score is ordering-only; these weights tune urgency, never correctness.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Weight of the viewport-overlap fraction (score points per full overlap)
    pub overlap_weight: f64,

    /// Flat bonus for regions starting above the fold
    pub fold_bonus: f64,

    /// Cap on the area contribution
    pub area_bonus_cap: f64,

    /// Weight of the aggregate engagement signal, when available
    pub engagement_weight: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            overlap_weight: 35.0,
            fold_bonus: 20.0,
            area_bonus_cap: 15.0,
            engagement_weight: 10.0,
        }
    }
}

/// Visibility scheduler tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Overlap fraction at which a slot counts as visible
    pub threshold: f64,

    /// Minimum interval between dispatch decisions; visibility-event bursts
    /// inside this window collapse into one (last-call-wins) decision (ms)
    pub min_decision_interval_ms: u64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_decision_interval_ms: 100,
        }
    }
}

/// Retry policy tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay before the first retry (ms)
    pub base_delay_ms: u64,

    /// Exponential growth factor per attempt
    pub growth: f64,

    /// Jitter multiplier bounds applied to each computed delay
    pub jitter_low: f64,
    pub jitter_high: f64,

    /// Ceiling on any single retry delay (ms)
    pub max_delay_ms: u64,

    /// Attempt budget for an ordinary slot
    pub max_attempts: u32,

    /// Extra attempts granted to slots at or above the priority cutoff
    pub high_priority_bonus: u32,

    /// Priority score at which the bonus applies
    pub high_priority_cutoff: u8,

    /// How long a terminally failed slot blocks rediscovery of its id (ms)
    pub terminal_cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 250,
            growth: 1.5,
            jitter_low: 0.85,
            jitter_high: 1.15,
            max_delay_ms: 10_000,
            max_attempts: 5,
            high_priority_bonus: 2,
            high_priority_cutoff: 75,
            terminal_cooldown_ms: 60_000,
        }
    }
}

/// Batch dispatcher tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum concurrent fulfillment attempts per wave
    pub max_wave_size: usize,

    /// Inter-wave delay when recent success is poor (ms)
    pub wave_delay_ms: u64,

    /// Inter-wave delay floor on a healthy bridge (ms)
    pub min_wave_delay_ms: u64,

    /// Maximum time to wait for a rendered result after a push (ms)
    pub verification_timeout_ms: u64,

    /// Poll interval while waiting for the rendered result (ms)
    pub verification_poll_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_wave_size: 3,
            wave_delay_ms: 500,
            min_wave_delay_ms: 150,
            verification_timeout_ms: 4_000,
            verification_poll_ms: 250,
        }
    }
}

/// Reconciliation monitor tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sweep interval (ms)
    pub interval_ms: u64,

    /// Idle time after which a non-terminal, non-in-flight slot is forced
    /// forward regardless of visibility (ms)
    pub staleness_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            staleness_ms: 8_000,
        }
    }
}
