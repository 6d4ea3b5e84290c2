//! Health status and per-component check results

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::metrics::PerformanceMetrics;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Health Status
// ----------------------------------------------------------------------------

/// Overall or per-component health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Offline,
}

impl HealthStatus {
    /// Fold a set of statuses into the worst one; an empty set is healthy
    pub fn worst<I>(statuses: I) -> HealthStatus
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        statuses
            .into_iter()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Critical => "Critical",
            HealthStatus::Offline => "Offline",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Component Results
// ----------------------------------------------------------------------------

/// Outcome of a single component health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealthResult {
    pub component: String,
    pub status: HealthStatus,
    pub description: String,
    /// Filled in by the monitor after the check returns
    pub duration: Duration,
    pub error: Option<String>,
    pub diagnostics: BTreeMap<String, String>,
    pub recommended_actions: Vec<String>,
}

impl ComponentHealthResult {
    pub fn new(component: impl Into<String>, status: HealthStatus, description: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status,
            description: description.into(),
            duration: Duration::ZERO,
            error: None,
            diagnostics: BTreeMap::new(),
            recommended_actions: Vec::new(),
        }
    }

    pub fn healthy(component: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy, description)
    }

    pub fn degraded(component: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Degraded, description)
    }

    pub fn critical(component: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Critical, description)
    }

    pub fn offline(component: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Offline, description)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_diagnostic(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.diagnostics.insert(key.into(), value.to_string());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.recommended_actions.push(action.into());
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recommended_actions
            .extend(actions.into_iter().map(Into::into));
        self
    }
}

// ----------------------------------------------------------------------------
// Reports and Events
// ----------------------------------------------------------------------------

/// Result of one monitoring tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub components: Vec<ComponentHealthResult>,
    pub metrics: PerformanceMetrics,
    pub generated_at: Timestamp,
}

impl HealthReport {
    /// Components that are not healthy
    pub fn unhealthy_components(&self) -> impl Iterator<Item = &ComponentHealthResult> {
        self.components
            .iter()
            .filter(|c| c.status != HealthStatus::Healthy)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealthResult> {
        self.components.iter().find(|c| c.component == name)
    }
}

/// Events emitted by the health monitor
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// Overall status differs from the previous tick
    StatusChanged {
        previous: Option<HealthStatus>,
        current: HealthStatus,
        report: Box<HealthReport>,
    },
    /// Emitted on every tick
    MetricsUpdated(Box<PerformanceMetrics>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status() {
        assert_eq!(HealthStatus::worst(Vec::new()), HealthStatus::Healthy);
        assert_eq!(
            HealthStatus::worst([HealthStatus::Healthy, HealthStatus::Critical, HealthStatus::Degraded]),
            HealthStatus::Critical
        );
        assert_eq!(
            HealthStatus::worst([HealthStatus::Offline, HealthStatus::Critical]),
            HealthStatus::Offline
        );
    }

    #[test]
    fn test_result_builder() {
        let result = ComponentHealthResult::degraded("memory", "high usage")
            .with_diagnostic("rss_bytes", 42)
            .with_action("Restart the bridge");
        assert_eq!(result.status, HealthStatus::Degraded);
        assert_eq!(result.diagnostics.get("rss_bytes").map(String::as_str), Some("42"));
        assert_eq!(result.recommended_actions.len(), 1);
    }
}
