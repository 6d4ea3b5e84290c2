//! Advertisement optimization strategies
//!
//! Strategies are stateless: they map the current configuration, the sampled
//! environment and the caller's goals to a proposed configuration.

use serde::{Deserialize, Serialize};

use super::config::{AdvertisementConfig, MAX_INTERVAL_MS, MIN_INTERVAL_MS};
use super::environment::EnvironmentSnapshot;

/// What the caller wants from an optimization pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationGoals {
    pub prioritize_power: bool,
    pub prioritize_latency: bool,
    /// Proposals below this confidence are reported but not applied
    pub min_confidence: f64,
}

impl Default for OptimizationGoals {
    fn default() -> Self {
        Self {
            prioritize_power: false,
            prioritize_latency: false,
            min_confidence: 0.6,
        }
    }
}

impl OptimizationGoals {
    pub fn power() -> Self {
        Self {
            prioritize_power: true,
            ..Self::default()
        }
    }

    pub fn latency() -> Self {
        Self {
            prioritize_latency: true,
            ..Self::default()
        }
    }
}

/// A proposed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub strategy: String,
    pub config: AdvertisementConfig,
    /// 0.0..=1.0
    pub confidence: f64,
    pub rationale: String,
}

pub trait AdvertisementStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn optimize(
        &self,
        current: &AdvertisementConfig,
        environment: &EnvironmentSnapshot,
        goals: &OptimizationGoals,
    ) -> StrategyOutcome;
}

// ----------------------------------------------------------------------------
// Power Saver
// ----------------------------------------------------------------------------

/// Wider interval, lower transmit power
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerSaver;

impl AdvertisementStrategy for PowerSaver {
    fn name(&self) -> &'static str {
        "power_saver"
    }

    fn optimize(
        &self,
        current: &AdvertisementConfig,
        _environment: &EnvironmentSnapshot,
        goals: &OptimizationGoals,
    ) -> StrategyOutcome {
        let mut config = current.clone();
        config.interval_ms = current.interval_ms.saturating_mul(2).clamp(1_000, MAX_INTERVAL_MS);
        config.tx_power_dbm = current.tx_power_dbm.saturating_sub(6).max(-20);

        StrategyOutcome {
            strategy: self.name().to_string(),
            confidence: if goals.prioritize_power { 0.85 } else { 0.6 },
            rationale: format!(
                "interval {} -> {} ms, power {} -> {} dBm",
                current.interval_ms, config.interval_ms, current.tx_power_dbm, config.tx_power_dbm
            ),
            config,
        }
    }
}

// ----------------------------------------------------------------------------
// Performance Optimized
// ----------------------------------------------------------------------------

/// Narrower interval, higher transmit power
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceOptimized;

impl AdvertisementStrategy for PerformanceOptimized {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn optimize(
        &self,
        current: &AdvertisementConfig,
        environment: &EnvironmentSnapshot,
        goals: &OptimizationGoals,
    ) -> StrategyOutcome {
        let mut config = current.clone();
        config.interval_ms = (current.interval_ms / 2).clamp(MIN_INTERVAL_MS, 50);
        let boost = if environment.is_congested() { 8 } else { 4 };
        config.tx_power_dbm = current.tx_power_dbm.saturating_add(boost).min(8);

        let mut confidence: f64 = if goals.prioritize_latency { 0.85 } else { 0.6 };
        if environment.is_congested() {
            // Short intervals collide more under heavy interference
            confidence -= 0.2;
        }

        StrategyOutcome {
            strategy: self.name().to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            rationale: format!(
                "interval {} -> {} ms, power {} -> {} dBm",
                current.interval_ms, config.interval_ms, current.tx_power_dbm, config.tx_power_dbm
            ),
            config,
        }
    }
}

// ----------------------------------------------------------------------------
// Balanced
// ----------------------------------------------------------------------------

/// Fixed 250 ms interval at 0 dBm
#[derive(Debug, Clone, Copy, Default)]
pub struct Balanced;

impl Balanced {
    pub const INTERVAL_MS: u64 = 250;
    pub const TX_POWER_DBM: i16 = 0;
}

impl AdvertisementStrategy for Balanced {
    fn name(&self) -> &'static str {
        "balanced"
    }

    fn optimize(
        &self,
        current: &AdvertisementConfig,
        _environment: &EnvironmentSnapshot,
        _goals: &OptimizationGoals,
    ) -> StrategyOutcome {
        let mut config = current.clone();
        config.interval_ms = Self::INTERVAL_MS;
        config.tx_power_dbm = Self::TX_POWER_DBM;

        StrategyOutcome {
            strategy: self.name().to_string(),
            config,
            confidence: 0.7,
            rationale: format!("fixed {} ms / {} dBm", Self::INTERVAL_MS, Self::TX_POWER_DBM),
        }
    }
}

// ----------------------------------------------------------------------------
// Adaptive
// ----------------------------------------------------------------------------

/// Picks one of the other strategies from the environment and goals
#[derive(Debug, Clone, Copy, Default)]
pub struct Adaptive;

impl AdvertisementStrategy for Adaptive {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn optimize(
        &self,
        current: &AdvertisementConfig,
        environment: &EnvironmentSnapshot,
        goals: &OptimizationGoals,
    ) -> StrategyOutcome {
        let (delegate, reason): (&dyn AdvertisementStrategy, &str) = if environment.is_congested() {
            (&Balanced, "congested environment")
        } else if goals.prioritize_latency {
            (&PerformanceOptimized, "latency goal")
        } else if goals.prioritize_power {
            (&PowerSaver, "power goal")
        } else {
            (&Balanced, "no explicit goal")
        };

        let outcome = delegate.optimize(current, environment, goals);
        StrategyOutcome {
            strategy: self.name().to_string(),
            rationale: format!("{} via {}: {}", reason, outcome.strategy, outcome.rationale),
            ..outcome
        }
    }
}

/// Strategy for a configured name
pub fn strategy_by_name(name: &str) -> Option<Box<dyn AdvertisementStrategy>> {
    match name {
        "power_saver" => Some(Box::new(PowerSaver)),
        "performance" => Some(Box::new(PerformanceOptimized)),
        "balanced" => Some(Box::new(Balanced)),
        "adaptive" => Some(Box::new(Adaptive)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_saver_widens_and_lowers() {
        let outcome = PowerSaver.optimize(
            &AdvertisementConfig::default(),
            &EnvironmentSnapshot::quiet(),
            &OptimizationGoals::power(),
        );
        assert_eq!(outcome.config.interval_ms, 1_000);
        assert_eq!(outcome.config.tx_power_dbm, -6);
        assert!(outcome.confidence > 0.8);
    }

    #[test]
    fn test_performance_narrows_and_raises() {
        let outcome = PerformanceOptimized.optimize(
            &AdvertisementConfig::default(),
            &EnvironmentSnapshot::quiet(),
            &OptimizationGoals::latency(),
        );
        assert_eq!(outcome.config.interval_ms, 50);
        assert_eq!(outcome.config.tx_power_dbm, 4);
    }

    #[test]
    fn test_balanced_is_fixed() {
        let current = AdvertisementConfig::default()
            .with_interval(std::time::Duration::from_millis(20))
            .with_tx_power(12);
        let outcome = Balanced.optimize(
            &current,
            &EnvironmentSnapshot::quiet(),
            &OptimizationGoals::default(),
        );
        assert_eq!(outcome.config.interval_ms, 250);
        assert_eq!(outcome.config.tx_power_dbm, 0);
    }

    #[test]
    fn test_adaptive_prefers_balanced_under_interference() {
        let noisy = EnvironmentSnapshot::quiet().with_interference(0.9);
        let outcome = Adaptive.optimize(
            &AdvertisementConfig::default(),
            &noisy,
            &OptimizationGoals::latency(),
        );
        assert_eq!(outcome.strategy, "adaptive");
        assert_eq!(outcome.config.interval_ms, Balanced::INTERVAL_MS);

        let outcome = Adaptive.optimize(
            &AdvertisementConfig::default(),
            &EnvironmentSnapshot::quiet(),
            &OptimizationGoals::power(),
        );
        assert!(outcome.rationale.contains("power_saver"));
    }

    #[test]
    fn test_proposals_stay_in_range() {
        let (extreme, _) = AdvertisementConfig::default()
            .with_interval(std::time::Duration::from_millis(MAX_INTERVAL_MS))
            .with_tx_power(20)
            .normalized();
        let env = EnvironmentSnapshot::quiet();
        for strategy in ["power_saver", "performance", "balanced", "adaptive"] {
            let strategy = strategy_by_name(strategy).unwrap();
            let outcome = strategy.optimize(&extreme, &env, &OptimizationGoals::default());
            let (_, issues) = outcome.config.normalized();
            assert!(issues.is_empty(), "{} produced {:?}", strategy.name(), issues);
        }
    }
}
