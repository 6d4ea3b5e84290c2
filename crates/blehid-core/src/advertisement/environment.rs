//! Radio environment sampling

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BlehidResult;
use crate::types::Timestamp;

/// Above this interference level short advertising intervals are discouraged
pub const HIGH_INTERFERENCE: f64 = 0.7;

/// Another advertiser observed nearby
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearbyAdvertiser {
    pub name: Option<String>,
    pub address: Option<String>,
    pub rssi: Option<i16>,
}

/// Radio conditions at sampling time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Fraction of airtime in use on the advertising channels (0.0..=1.0)
    pub channel_utilization: f64,
    /// Estimated interference (0.0..=1.0)
    pub interference_level: f64,
    pub nearby_advertisers: Vec<NearbyAdvertiser>,
    pub sampled_at: Timestamp,
}

impl EnvironmentSnapshot {
    /// An empty, idle environment
    pub fn quiet() -> Self {
        Self {
            channel_utilization: 0.1,
            interference_level: 0.1,
            nearby_advertisers: Vec::new(),
            sampled_at: Timestamp::now(),
        }
    }

    pub fn with_interference(mut self, level: f64) -> Self {
        self.interference_level = level.clamp(0.0, 1.0);
        self
    }

    pub fn with_channel_utilization(mut self, utilization: f64) -> Self {
        self.channel_utilization = utilization.clamp(0.0, 1.0);
        self
    }

    pub fn with_advertiser(mut self, name: impl Into<String>) -> Self {
        self.nearby_advertisers.push(NearbyAdvertiser {
            name: Some(name.into()),
            address: None,
            rssi: None,
        });
        self
    }

    pub fn is_congested(&self) -> bool {
        self.interference_level > HIGH_INTERFERENCE || self.channel_utilization > HIGH_INTERFERENCE
    }
}

/// Source of radio environment snapshots
#[async_trait]
pub trait EnvironmentSampler: Send + Sync {
    async fn sample(&self) -> BlehidResult<EnvironmentSnapshot>;
}

/// Sampler returning a fixed snapshot
#[derive(Debug, Clone)]
pub struct StaticEnvironment {
    snapshot: EnvironmentSnapshot,
}

impl StaticEnvironment {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self { snapshot }
    }
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self::new(EnvironmentSnapshot::quiet())
    }
}

#[async_trait]
impl EnvironmentSampler for StaticEnvironment {
    async fn sample(&self) -> BlehidResult<EnvironmentSnapshot> {
        let mut snapshot = self.snapshot.clone();
        snapshot.sampled_at = Timestamp::now();
        Ok(snapshot)
    }
}
