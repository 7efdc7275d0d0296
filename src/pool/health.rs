//! Heartbeat-staleness detection for the health tick.
//!
//! Detection lives here; the scheduler performs the actual terminate-and-
//! replace so registry mutation stays in one place.

use std::time::Duration;

use uuid::Uuid;

use super::registry::UnitRegistry;
use super::unit::UnitState;
use crate::config::HealthConfig;

/// Decides which units are past their staleness window
#[derive(Debug)]
pub struct HealthMonitor {
    staleness: Duration,
}

impl HealthMonitor {
    /// Build a monitor from health configuration
    #[must_use]
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            staleness: Duration::from_millis(
                config.heartbeat_interval_ms * u64::from(config.staleness_multiplier),
            ),
        }
    }

    /// The age past which a unit is declared unhealthy
    #[must_use]
    pub const fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Units to terminate and replace: heartbeat older than the staleness
    /// window, or stuck busy on a timed-out task for at least as long
    #[must_use]
    pub fn unhealthy_units(&self, registry: &UnitRegistry) -> Vec<Uuid> {
        registry
            .iter()
            .filter(|u| !matches!(u.state, UnitState::Terminated))
            .filter(|u| {
                u.last_heartbeat.elapsed() > self.staleness
                    || u.suspect_since
                        .is_some_and(|since| since.elapsed() > self.staleness)
            })
            .map(|u| u.id)
            .collect()
    }
}
