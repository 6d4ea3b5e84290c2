//! Transport health monitoring
//!
//! Operation outcomes, breaker state, adapter state and process resources are
//! folded into a periodic [`HealthReport`].

pub mod checks;
pub mod metrics;
pub mod monitor;
pub mod status;
pub mod system;

pub use checks::{AdapterHealthCheck, CircuitBreakerHealthCheck, HealthCheck, MemoryHealthCheck};
pub use metrics::{
    NoopRecorder, OperationLog, OperationRecord, OperationRecorder, PerformanceMetrics,
    ResourceUsage,
};
pub use monitor::HealthMonitor;
pub use status::{ComponentHealthResult, HealthEvent, HealthReport, HealthStatus};
pub use system::{ProcessSampler, ResourceSampler, StaticResourceSampler};
