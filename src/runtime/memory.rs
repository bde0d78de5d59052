//! In-memory simulated runtime.
//!
//! Behaves like a small Docker daemon: containers have names, run state and
//! a health check; services carry a replica count and a version token.
//! Failures, latency, unreachability and concurrent service updates can be
//! injected per operation, and every call is recorded for assertions.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{Result, RuntimeError, RuntimeGateway, RuntimeOperation, UnitFilter, SWARM_SERVICE_LABEL};
use crate::config::defaults::{MONITOR_LABEL, SERVICE_LABEL};
use crate::types::{
    HealthCheckEntry, HealthSnapshot, HealthState, MonitoredUnit, RunState, ServiceState, UnitDetail,
    UnitKind, UnitSpec,
};

/// A call received by the simulated runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    List,
    Inspect(String),
    Health(String),
    Restart(String),
    Stop { id: String, grace_period_secs: u64 },
    Remove(String),
    Create(String),
    Start(String),
    Rename { id: String, name: String },
    InspectService(String),
    UpdateService { name: String, version: u64, replicas: u64 },
}

impl RuntimeCall {
    pub fn operation(&self) -> RuntimeOperation {
        match self {
            RuntimeCall::List => RuntimeOperation::List,
            RuntimeCall::Inspect(_) => RuntimeOperation::Inspect,
            RuntimeCall::Health(_) => RuntimeOperation::Health,
            RuntimeCall::Restart(_) => RuntimeOperation::Restart,
            RuntimeCall::Stop { .. } => RuntimeOperation::Stop,
            RuntimeCall::Remove(_) => RuntimeOperation::Remove,
            RuntimeCall::Create(_) => RuntimeOperation::Create,
            RuntimeCall::Start(_) => RuntimeOperation::Start,
            RuntimeCall::Rename { .. } => RuntimeOperation::Rename,
            RuntimeCall::InspectService(_) => RuntimeOperation::InspectService,
            RuntimeCall::UpdateService { .. } => RuntimeOperation::UpdateService,
        }
    }
}

#[derive(Debug, Clone)]
struct SimUnit {
    unit: MonitoredUnit,
    running: bool,
    health: HealthState,
    failing_streak: u32,
    log: Vec<HealthCheckEntry>,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct SimService {
    id: String,
    version: u64,
    replicas: u64,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct SimState {
    units: BTreeMap<String, SimUnit>,
    services: BTreeMap<String, SimService>,
    next_id: u64,
    unreachable: bool,
    failures: HashMap<RuntimeOperation, VecDeque<RuntimeError>>,
    latency: HashMap<RuntimeOperation, Duration>,
    race_next_update: bool,
    calls: Vec<RuntimeCall>,
}

impl SimState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        let n = self.next_id;
        format!("{:012x}{:052x}", n.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 16, n)
    }

    fn resolve(&self, id_or_name: &str) -> Option<String> {
        if self.units.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.units
            .values()
            .find(|u| u.unit.name == id_or_name || u.unit.display_id == id_or_name)
            .map(|u| u.unit.id.clone())
    }

    fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        self.units
            .values()
            .any(|u| u.unit.name == name && Some(u.unit.id.as_str()) != except)
    }

    fn unit_mut(&mut self, id: &str) -> Result<&mut SimUnit> {
        self.units.get_mut(id).ok_or_else(|| RuntimeError::not_found(id))
    }
}

/// Simulated container runtime.
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<SimState>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small fleet for demo runs: two plain containers, a worker that
    /// belongs to a scalable service, and the service itself.
    pub fn demo() -> Self {
        let runtime = Self::new();
        runtime.add_container("auth-service", "sentinel/auth-service:latest");
        runtime.add_container("notification-service", "sentinel/notification-service:latest");
        runtime.add_scalable_container("payments-worker", "sentinel/payments:latest", "payments");
        runtime.add_service("payments", 2);
        for name in ["auth-service", "notification-service", "payments-worker"] {
            runtime.set_health(name, HealthState::Healthy, 0);
        }
        runtime
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn monitored_labels() -> BTreeMap<String, String> {
        let (key, value) = MONITOR_LABEL.split_once('=').unwrap_or((MONITOR_LABEL, "true"));
        BTreeMap::from([(key.to_string(), value.to_string())])
    }

    fn insert_container(&self, name: &str, image: &str, labels: BTreeMap<String, String>) -> String {
        let mut state = self.lock();
        let id = state.allocate_id();
        let mut unit = MonitoredUnit::new(id.clone(), name, image, UnitKind::Container);
        unit.service_name = labels
            .get(SERVICE_LABEL)
            .or_else(|| labels.get(SWARM_SERVICE_LABEL))
            .cloned();
        state.units.insert(
            id.clone(),
            SimUnit {
                unit,
                running: true,
                health: HealthState::None,
                failing_streak: 0,
                log: Vec::new(),
                labels,
            },
        );
        id
    }

    /// Add a running, monitored container without a health check.
    pub fn add_container(&self, name: &str, image: &str) -> String {
        self.insert_container(name, image, Self::monitored_labels())
    }

    /// Add a running container that does not carry the monitoring label.
    pub fn add_unmonitored_container(&self, name: &str, image: &str) -> String {
        self.insert_container(name, image, BTreeMap::new())
    }

    /// Add a monitored container that scales with `service`.
    pub fn add_scalable_container(&self, name: &str, image: &str, service: &str) -> String {
        let mut labels = Self::monitored_labels();
        labels.insert(SERVICE_LABEL.to_string(), service.to_string());
        self.insert_container(name, image, labels)
    }

    /// Add a monitored replicated service.
    pub fn add_service(&self, name: &str, replicas: u64) {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.services.insert(
            name.to_string(),
            SimService {
                id,
                version: 1,
                replicas,
                labels: Self::monitored_labels(),
            },
        );
    }

    /// Set the health the runtime will report for a unit (id or name).
    pub fn set_health(&self, id_or_name: &str, health: HealthState, failing_streak: u32) {
        let mut state = self.lock();
        if let Some(id) = state.resolve(id_or_name) {
            if let Some(unit) = state.units.get_mut(&id) {
                unit.health = health;
                unit.failing_streak = failing_streak;
                let exit_code = i64::from(health == HealthState::Unhealthy);
                unit.log.push(HealthCheckEntry {
                    exit_code,
                    output: format!("simulated {health}"),
                    ended_at: None,
                });
            }
        }
    }

    pub fn set_running(&self, id_or_name: &str, running: bool) {
        let mut state = self.lock();
        if let Some(id) = state.resolve(id_or_name) {
            if let Some(unit) = state.units.get_mut(&id) {
                unit.running = running;
            }
        }
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: RuntimeOperation, error: RuntimeError) {
        self.lock().failures.entry(operation).or_default().push_back(error);
    }

    /// Simulate the runtime socket going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Delay every call of `operation` by `latency`.
    pub fn set_latency(&self, operation: RuntimeOperation, latency: Duration) {
        self.lock().latency.insert(operation, latency);
    }

    /// Another writer bumps the service version between our read and write.
    pub fn race_next_service_update(&self) {
        self.lock().race_next_update = true;
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: RuntimeOperation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Current record for a unit name, with its run state.
    pub fn unit_by_name(&self, name: &str) -> Option<(MonitoredUnit, bool)> {
        self.lock()
            .units
            .values()
            .find(|u| u.unit.name == name)
            .map(|u| (u.unit.clone(), u.running))
    }

    pub fn unit_count(&self) -> usize {
        self.lock().units.len()
    }

    pub fn service_replicas(&self, name: &str) -> Option<u64> {
        self.lock().services.get(name).map(|s| s.replicas)
    }

    async fn delay(&self, operation: RuntimeOperation) {
        let latency = self.lock().latency.get(&operation).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Record the call and apply injected unreachability or failures.
    fn enter(&self, call: RuntimeCall) -> Result<MutexGuard<'_, SimState>> {
        let operation = call.operation();
        let mut state = self.lock();
        state.calls.push(call);
        if state.unreachable {
            return Err(RuntimeError::unavailable("simulated runtime unreachable"));
        }
        if let Some(err) = state.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl RuntimeGateway for InMemoryRuntime {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn list_monitored_units(&self, filter: &UnitFilter) -> Result<Vec<MonitoredUnit>> {
        self.delay(RuntimeOperation::List).await;
        let state = self.enter(RuntimeCall::List)?;

        let mut units: Vec<MonitoredUnit> = state
            .units
            .values()
            .filter(|u| filter.matches(&u.labels))
            .map(|u| u.unit.clone())
            .collect();

        if filter.include_services {
            units.extend(
                state
                    .services
                    .iter()
                    .filter(|(_, s)| filter.matches(&s.labels))
                    .map(|(name, s)| MonitoredUnit::new(s.id.clone(), name.clone(), "service", UnitKind::Service)),
            );
        }
        Ok(units)
    }

    async fn inspect_unit(&self, id: &str) -> Result<UnitDetail> {
        self.delay(RuntimeOperation::Inspect).await;
        let state = self.enter(RuntimeCall::Inspect(id.to_string()))?;
        let sim = state.units.get(id).ok_or_else(|| RuntimeError::not_found(id))?;
        Ok(UnitDetail {
            unit: sim.unit.clone(),
            running: sim.running,
            spec: UnitSpec {
                image: sim.unit.image.clone(),
                labels: sim.labels.clone(),
                container_config: serde_json::json!({ "Image": sim.unit.image }),
                host_config: serde_json::json!({}),
                network_config: serde_json::json!({}),
            },
        })
    }

    async fn get_health(&self, unit: &MonitoredUnit) -> HealthSnapshot {
        let id = unit.id.as_str();
        self.delay(RuntimeOperation::Health).await;
        let state = match self.enter(RuntimeCall::Health(id.to_string())) {
            Ok(state) => state,
            Err(e) => return HealthSnapshot::unknown(id, e.to_string()),
        };

        if let Some(sim) = state.units.get(id) {
            let run_state = if sim.running { RunState::Running } else { RunState::Exited };
            return HealthSnapshot::new(id, run_state, sim.health, sim.failing_streak, sim.log.clone());
        }
        if state.services.values().any(|s| s.id == id) {
            return HealthSnapshot::new(id, RunState::Running, HealthState::None, 0, Vec::new());
        }
        HealthSnapshot::unknown(id, RuntimeError::not_found(id).to_string())
    }

    async fn restart(&self, id: &str, _grace_period_secs: u64) -> Result<()> {
        self.delay(RuntimeOperation::Restart).await;
        let mut state = self.enter(RuntimeCall::Restart(id.to_string()))?;
        state.unit_mut(id)?.running = true;
        Ok(())
    }

    async fn stop(&self, id: &str, grace_period_secs: u64) -> Result<()> {
        self.delay(RuntimeOperation::Stop).await;
        let mut state = self.enter(RuntimeCall::Stop {
            id: id.to_string(),
            grace_period_secs,
        })?;
        state.unit_mut(id)?.running = false;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.delay(RuntimeOperation::Remove).await;
        let mut state = self.enter(RuntimeCall::Remove(id.to_string()))?;
        let running = state.units.get(id).ok_or_else(|| RuntimeError::not_found(id))?.running;
        if running {
            return Err(RuntimeError::command_failed(
                RuntimeOperation::Remove,
                format!("cannot remove running container {id}"),
            ));
        }
        state.units.remove(id);
        Ok(())
    }

    async fn create(&self, name: &str, spec: &UnitSpec) -> Result<String> {
        self.delay(RuntimeOperation::Create).await;
        let mut state = self.enter(RuntimeCall::Create(name.to_string()))?;
        if state.name_taken(name, None) {
            return Err(RuntimeError::command_failed(
                RuntimeOperation::Create,
                format!("name {name} is already in use"),
            ));
        }
        let id = state.allocate_id();
        let mut unit = MonitoredUnit::new(id.clone(), name, spec.image.clone(), UnitKind::Container);
        unit.service_name = spec
            .labels
            .get(SERVICE_LABEL)
            .or_else(|| spec.labels.get(SWARM_SERVICE_LABEL))
            .cloned();
        state.units.insert(
            id.clone(),
            SimUnit {
                unit,
                running: false,
                health: HealthState::Starting,
                failing_streak: 0,
                log: Vec::new(),
                labels: spec.labels.clone(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.delay(RuntimeOperation::Start).await;
        let mut state = self.enter(RuntimeCall::Start(id.to_string()))?;
        state.unit_mut(id)?.running = true;
        Ok(())
    }

    async fn rename(&self, id: &str, name: &str) -> Result<()> {
        self.delay(RuntimeOperation::Rename).await;
        let mut state = self.enter(RuntimeCall::Rename {
            id: id.to_string(),
            name: name.to_string(),
        })?;
        if state.name_taken(name, Some(id)) {
            return Err(RuntimeError::command_failed(
                RuntimeOperation::Rename,
                format!("name {name} is already in use"),
            ));
        }
        state.unit_mut(id)?.unit.name = name.to_string();
        Ok(())
    }

    async fn inspect_service(&self, name: &str) -> Result<ServiceState> {
        self.delay(RuntimeOperation::InspectService).await;
        let state = self.enter(RuntimeCall::InspectService(name.to_string()))?;
        let service = state.services.get(name).ok_or_else(|| RuntimeError::not_found(name))?;
        Ok(ServiceState {
            version: service.version,
            replicas: service.replicas,
        })
    }

    async fn update_service_replicas(&self, name: &str, version: u64, replicas: u64) -> Result<()> {
        self.delay(RuntimeOperation::UpdateService).await;
        let mut state = self.enter(RuntimeCall::UpdateService {
            name: name.to_string(),
            version,
            replicas,
        })?;
        let race = std::mem::take(&mut state.race_next_update);
        let service = state
            .services
            .get_mut(name)
            .ok_or_else(|| RuntimeError::not_found(name))?;
        if race {
            service.version += 1;
        }
        if service.version != version {
            return Err(RuntimeError::conflict(
                RuntimeOperation::UpdateService,
                format!(
                    "update out of sequence (have version {}, got {})",
                    service.version, version
                ),
            ));
        }
        service.replicas = replicas;
        service.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_only_returns_labeled_units() {
        let rt = InMemoryRuntime::new();
        rt.add_container("auth-service", "auth:1");
        rt.add_unmonitored_container("postgres", "postgres:16");

        let filter = UnitFilter {
            include_services: false,
            ..UnitFilter::default()
        };
        let units = rt.list_monitored_units(&filter).await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "auth-service");
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_an_error() {
        let rt = InMemoryRuntime::new();
        let units = rt.list_monitored_units(&UnitFilter::default()).await.unwrap();
        assert!(units.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_list_fails() {
        let rt = InMemoryRuntime::new();
        rt.set_reachable(false);
        let err = rt.list_monitored_units(&UnitFilter::default()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_health_failure_is_unknown_snapshot() {
        let rt = InMemoryRuntime::new();
        rt.add_container("auth-service", "auth:1");
        let (unit, _) = rt.unit_by_name("auth-service").unwrap();
        rt.fail_next(RuntimeOperation::Health, RuntimeError::unavailable("socket closed"));
        let snap = rt.get_health(&unit).await;
        assert_eq!(snap.health_state, HealthState::Unknown);
        assert!(snap.probe_failed());
    }

    #[tokio::test]
    async fn test_remove_refuses_running_container() {
        let rt = InMemoryRuntime::new();
        let id = rt.add_container("auth-service", "auth:1");
        assert!(rt.remove(&id).await.is_err());
        rt.stop(&id, 0).await.unwrap();
        rt.remove(&id).await.unwrap();
        assert_eq!(rt.unit_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_service_version_conflicts() {
        let rt = InMemoryRuntime::new();
        rt.add_service("payments", 2);
        let state = rt.inspect_service("payments").await.unwrap();
        rt.race_next_service_update();
        let err = rt
            .update_service_replicas("payments", state.version, 5)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(rt.service_replicas("payments"), Some(2));

        rt.scale_service("payments", 5).await.unwrap();
        assert_eq!(rt.service_replicas("payments"), Some(5));
    }
}
