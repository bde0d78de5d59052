//! Runtime Gateway: narrow capability interface over the container runtime
//!
//! Everything the engine does to containers goes through [`RuntimeGateway`].
//! Two implementations ship with the crate:
//!
//! - [`DockerGateway`]: Docker Engine API via `bollard` (local socket or remote endpoint)
//! - [`InMemoryRuntime`]: simulated runtime with failure injection, used by
//!   tests and by the `memory` backend demo mode
//!
//! All calls return once the runtime acknowledges the request, not once the
//! unit reaches a steady state.

mod docker;
pub mod error;
mod memory;

pub use docker::DockerGateway;
pub use error::{Result, RuntimeError, RuntimeOperation};
pub use memory::{InMemoryRuntime, RuntimeCall};

use async_trait::async_trait;

use crate::types::{HealthSnapshot, MonitoredUnit, ServiceState, UnitDetail, UnitSpec};

/// Docker swarm stamps task containers with their owning service.
pub const SWARM_SERVICE_LABEL: &str = "com.docker.swarm.service.name";

/// Selector for the units under watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFilter {
    /// `key=value` label every monitored unit carries
    pub label: String,
    /// Label naming the scalable service a container belongs to
    pub service_label: String,
    /// Also list swarm services carrying the label
    pub include_services: bool,
}

impl Default for UnitFilter {
    fn default() -> Self {
        Self {
            label: crate::config::defaults::MONITOR_LABEL.to_string(),
            service_label: crate::config::defaults::SERVICE_LABEL.to_string(),
            include_services: true,
        }
    }
}

impl UnitFilter {
    /// Split `key=value` (a bare `key` matches any value).
    pub fn label_pair(&self) -> (&str, Option<&str>) {
        match self.label.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (self.label.as_str(), None),
        }
    }

    /// Whether a label set satisfies the selector.
    pub fn matches<'a, I>(&self, labels: I) -> bool
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let (key, value) = self.label_pair();
        labels
            .into_iter()
            .any(|(k, v)| k == key && value.map_or(true, |want| v == want))
    }
}

/// Capability interface over the container runtime.
#[async_trait]
pub trait RuntimeGateway: Send + Sync {
    /// Name of the backend for logs.
    fn backend_name(&self) -> &str;

    /// Units bearing the monitoring label. An empty result is not an error.
    async fn list_monitored_units(&self, filter: &UnitFilter) -> Result<Vec<MonitoredUnit>>;

    /// Full detail needed to rebuild a unit.
    async fn inspect_unit(&self, id: &str) -> Result<UnitDetail>;

    /// Current health. Query failures come back as an `Unknown` snapshot
    /// so one unit cannot stall the observation of the others. Services
    /// have no check of their own and report on their tasks instead.
    async fn get_health(&self, unit: &MonitoredUnit) -> HealthSnapshot;

    async fn restart(&self, id: &str, grace_period_secs: u64) -> Result<()>;

    async fn stop(&self, id: &str, grace_period_secs: u64) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Create a unit from a captured spec, returning its new id.
    async fn create(&self, name: &str, spec: &UnitSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn rename(&self, id: &str, name: &str) -> Result<()>;

    /// Read the replica count together with the version token for updates.
    async fn inspect_service(&self, name: &str) -> Result<ServiceState>;

    /// Write a replica count. Fails with a retryable `CommandFailed` when
    /// `version` is stale.
    async fn update_service_replicas(&self, name: &str, version: u64, replicas: u64) -> Result<()>;

    /// Read-merge-write of the replica count.
    async fn scale_service(&self, name: &str, replicas: u64) -> Result<()> {
        let current = self.inspect_service(name).await?;
        self.update_service_replicas(name, current.version, replicas).await
    }
}
