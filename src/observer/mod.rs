//! Health Observer
//!
//! Discovers the labeled units and samples each one's health under its own
//! timeout. A slow or failing read turns into an `Unknown` snapshot for that
//! unit only.

mod table;

pub use table::{Reconciled, ServiceRecord, UnitRecord, UnitTable};

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::runtime::{self, RuntimeError, RuntimeGateway, RuntimeOperation, UnitFilter};
use crate::types::{HealthSnapshot, HealthState, MonitoredUnit};

/// Samples the runtime on behalf of the engine.
#[derive(Clone)]
pub struct HealthObserver {
    gateway: Arc<dyn RuntimeGateway>,
    filter: UnitFilter,
    list_timeout: Duration,
    health_timeout: Duration,
}

impl HealthObserver {
    pub fn new(
        gateway: Arc<dyn RuntimeGateway>,
        filter: UnitFilter,
        list_timeout: Duration,
        health_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            filter,
            list_timeout,
            health_timeout,
        }
    }

    pub fn filter(&self) -> &UnitFilter {
        &self.filter
    }

    /// Units currently bearing the monitoring label.
    pub async fn discover(&self) -> runtime::Result<Vec<MonitoredUnit>> {
        match tokio::time::timeout(self.list_timeout, self.gateway.list_monitored_units(&self.filter)).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::timeout(
                RuntimeOperation::List,
                self.list_timeout.as_millis() as u64,
            )),
        }
    }

    /// One health read, bounded by the health timeout.
    pub async fn sample(&self, unit: &MonitoredUnit) -> HealthSnapshot {
        match tokio::time::timeout(self.health_timeout, self.gateway.get_health(unit)).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                debug!(unit = %unit.name, id = %unit.display_id, "Health read timed out");
                let err = RuntimeError::timeout(RuntimeOperation::Health, self.health_timeout.as_millis() as u64);
                HealthSnapshot::unknown(&unit.id, err.to_string())
            }
        }
    }
}

/// The state a unit left, if `current` differs from `prior`.
///
/// A unit seen for the first time is treated as coming from `Unknown`.
pub fn detect_transition(prior: Option<&HealthSnapshot>, current: &HealthSnapshot) -> Option<HealthState> {
    let from = prior.map_or(HealthState::Unknown, |p| p.health_state);
    (from != current.health_state).then_some(from)
}
