//! Advertisement configuration, strategies and management

pub mod config;
pub mod environment;
pub mod manager;
pub mod strategy;

pub use config::{AdvertisementConfig, ValidationIssue};
pub use environment::{EnvironmentSampler, EnvironmentSnapshot, NearbyAdvertiser, StaticEnvironment};
pub use manager::{
    AdvertisementBackend, AdvertisementConflict, AdvertisementManager, AdvertisementManagerEvent,
    AdvertisementState, OptimizationReport, ScheduleId, ScheduleWindow,
};
pub use strategy::{
    strategy_by_name, Adaptive, AdvertisementStrategy, Balanced, OptimizationGoals,
    PerformanceOptimized, PowerSaver, StrategyOutcome,
};
