//! Docker Engine adapter.
//!
//! Talks to the daemon through `bollard`. Every request carries its own
//! timeout so a wedged daemon cannot hold up the poll cycle.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, NetworkingConfig,
    RemoveContainerOptions, RenameContainerOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerInspectResponse, EndpointSettings, HostConfig, Service, ServiceSpec};
use bollard::service::{InspectServiceOptions, ListServicesOptions, UpdateServiceOptions};
use bollard::Docker;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::{Result, RuntimeError, RuntimeGateway, RuntimeOperation, UnitFilter, SWARM_SERVICE_LABEL};
use crate::types::{
    HealthCheckEntry, HealthSnapshot, HealthState, MonitoredUnit, RunState, ServiceState, UnitDetail,
    UnitKind, UnitSpec,
};

/// Seconds the daemon waits on connection setup.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Runtime gateway backed by the Docker Engine API.
pub struct DockerGateway {
    docker: Docker,
    service_label: String,
    request_timeout: Duration,
}

impl DockerGateway {
    /// Connect to `host`, or the local default socket when `host` is empty.
    ///
    /// Accepts `unix:///path/docker.sock`, `tcp://host:port` and
    /// `http://host:port`.
    pub fn connect(host: &str, service_label: &str, request_timeout: Duration) -> Result<Self> {
        let docker = if host.is_empty() {
            Docker::connect_with_local_defaults()
        } else if let Some(path) = host.strip_prefix("unix://") {
            Docker::connect_with_unix(path, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        } else {
            let addr = host.replacen("tcp://", "http://", 1);
            Docker::connect_with_http(&addr, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| RuntimeError::unavailable(e.to_string()))?;

        Ok(Self {
            docker,
            service_label: service_label.to_string(),
            request_timeout,
        })
    }

    /// Run one daemon request under the per-request timeout.
    async fn call<T, F>(&self, operation: RuntimeOperation, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, BollardError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(|e| map_error(operation, e)),
            Err(_) => Err(RuntimeError::timeout(
                operation,
                self.request_timeout.as_millis() as u64,
            )),
        }
    }

    async fn inspect_raw(&self, id: &str) -> Result<ContainerInspectResponse> {
        self.call(
            RuntimeOperation::Inspect,
            self.docker
                .inspect_container(id, None::<InspectContainerOptions>),
        )
        .await
    }

    fn service_of(&self, labels: &HashMap<String, String>) -> Option<String> {
        labels
            .get(&self.service_label)
            .or_else(|| labels.get(SWARM_SERVICE_LABEL))
            .cloned()
    }

    /// Task counts of one service, read through the service listing since
    /// inspect does not carry them.
    async fn service_health(&self, id: &str) -> HealthSnapshot {
        let filters = HashMap::from([("id".to_string(), vec![id.to_string()])]);
        let listed = self
            .call(
                RuntimeOperation::Health,
                self.docker.list_services(Some(ListServicesOptions {
                    filters,
                    status: true,
                    ..Default::default()
                })),
            )
            .await;

        match listed {
            Ok(services) => match services.iter().find(|s| s.id.as_deref() == Some(id)) {
                Some(service) => service_snapshot(id, service),
                None => HealthSnapshot::unknown(id, RuntimeError::not_found(id).to_string()),
            },
            Err(e) => HealthSnapshot::unknown(id, e.to_string()),
        }
    }

    async fn list_services(&self, filter: &UnitFilter) -> Result<Vec<MonitoredUnit>> {
        let filters = HashMap::from([("label".to_string(), vec![filter.label.clone()])]);
        let services = self
            .call(
                RuntimeOperation::List,
                self.docker.list_services(Some(ListServicesOptions {
                    filters,
                    ..Default::default()
                })),
            )
            .await?;

        Ok(services
            .into_iter()
            .filter_map(|service| {
                let id = service.id?;
                let spec = service.spec?;
                let name = spec.name?;
                let image = spec
                    .task_template
                    .and_then(|t| t.container_spec)
                    .and_then(|c| c.image)
                    .unwrap_or_default();
                Some(MonitoredUnit::new(id, name, image, UnitKind::Service))
            })
            .collect())
    }
}

/// Docker answers 404 for vanished objects and 409 (or "update out of
/// sequence") for stale service versions.
fn map_error(operation: RuntimeOperation, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::not_found(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } if status_code == 409 || message.contains("out of sequence") => {
            RuntimeError::conflict(operation, message)
        }
        BollardError::DockerResponseServerError { message, .. } => {
            RuntimeError::command_failed(operation, message)
        }
        other => RuntimeError::unavailable(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Keep only the endpoint settings a fresh container can be created with;
/// runtime-assigned addresses and ids would be rejected.
fn portable_endpoints(networks: HashMap<String, EndpointSettings>) -> HashMap<String, EndpointSettings> {
    networks
        .into_iter()
        .map(|(network, settings)| {
            let portable = EndpointSettings {
                aliases: settings.aliases,
                links: settings.links,
                ipam_config: settings.ipam_config,
                ..Default::default()
            };
            (network, portable)
        })
        .collect()
}

fn snapshot_from(id: &str, info: &ContainerInspectResponse) -> HealthSnapshot {
    let state = info.state.as_ref();
    let run_state = state
        .and_then(|s| s.status)
        .map_or(RunState::Other, |s| RunState::from_runtime(&s.to_string()));

    let health = state.and_then(|s| s.health.as_ref());
    let health_state = health
        .and_then(|h| h.status)
        .map_or(HealthState::None, |s| HealthState::from_runtime(&s.to_string()));
    let failing_streak = health
        .and_then(|h| h.failing_streak)
        .map_or(0, |n| u32::try_from(n.max(0)).unwrap_or(u32::MAX));
    let recent_log = health
        .and_then(|h| h.log.as_ref())
        .map(|log| {
            log.iter()
                .map(|entry| HealthCheckEntry {
                    exit_code: entry.exit_code.unwrap_or_default(),
                    output: entry.output.clone().unwrap_or_default(),
                    ended_at: entry.end.as_ref().map(|e| e.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    HealthSnapshot::new(id, run_state, health_state, failing_streak, recent_log)
}

/// A service is `None` (no check, nothing wrong) once every desired task
/// runs and `Starting` while it converges.
fn service_snapshot(id: &str, service: &Service) -> HealthSnapshot {
    let status = service.service_status.as_ref();
    let running = status.and_then(|s| s.running_tasks).unwrap_or(0);
    let desired = status.and_then(|s| s.desired_tasks).unwrap_or(0);

    let run_state = if running > 0 || desired == 0 {
        RunState::Running
    } else {
        RunState::Other
    };
    let health_state = if running >= desired {
        HealthState::None
    } else {
        HealthState::Starting
    };
    HealthSnapshot::new(id, run_state, health_state, 0, Vec::new())
}

#[async_trait]
impl RuntimeGateway for DockerGateway {
    fn backend_name(&self) -> &str {
        "docker"
    }

    async fn list_monitored_units(&self, filter: &UnitFilter) -> Result<Vec<MonitoredUnit>> {
        let filters = HashMap::from([("label".to_string(), vec![filter.label.clone()])]);
        let containers = self
            .call(
                RuntimeOperation::List,
                self.docker.list_containers(Some(ListContainersOptions::<String> {
                    all: true,
                    filters,
                    ..Default::default()
                })),
            )
            .await?;

        let mut units: Vec<MonitoredUnit> = containers
            .into_iter()
            .filter_map(|c| {
                let labels = c.labels.unwrap_or_default();
                if !filter.matches(&labels) {
                    return None;
                }
                let name = c.names.and_then(|n| n.into_iter().next()).unwrap_or_default();
                let mut unit = MonitoredUnit::new(c.id?, name, c.image.unwrap_or_default(), UnitKind::Container);
                unit.service_name = self.service_of(&labels);
                Some(unit)
            })
            .collect();

        if filter.include_services {
            match self.list_services(filter).await {
                Ok(services) => units.extend(services),
                // Not a swarm manager: services simply do not exist here.
                Err(RuntimeError::CommandFailed { cause, .. }) => {
                    debug!(cause = %cause, "Service listing unavailable");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(units)
    }

    async fn inspect_unit(&self, id: &str) -> Result<UnitDetail> {
        let info = self.inspect_raw(id).await?;

        let config = info.config.clone().unwrap_or_default();
        let raw_labels = config.labels.clone().unwrap_or_default();
        let image = config.image.clone().unwrap_or_default();
        let name = info.name.clone().unwrap_or_else(|| id.to_string());
        let unit_id = info.id.clone().unwrap_or_else(|| id.to_string());
        let mut unit = MonitoredUnit::new(unit_id, name, image.clone(), UnitKind::Container);
        unit.service_name = self.service_of(&raw_labels);
        let labels: BTreeMap<String, String> = raw_labels.into_iter().collect();

        let running = info.state.as_ref().and_then(|s| s.running).unwrap_or(false);
        let networks = info
            .network_settings
            .clone()
            .and_then(|n| n.networks)
            .unwrap_or_default();

        Ok(UnitDetail {
            unit,
            running,
            spec: UnitSpec {
                image,
                labels,
                container_config: to_json(&config),
                host_config: to_json(&info.host_config.clone().unwrap_or_default()),
                network_config: to_json(&portable_endpoints(networks)),
            },
        })
    }

    async fn get_health(&self, unit: &MonitoredUnit) -> HealthSnapshot {
        let id = unit.id.as_str();
        if unit.kind == UnitKind::Service {
            return self.service_health(id).await;
        }
        match self.inspect_raw(id).await {
            Ok(info) => snapshot_from(id, &info),
            Err(e) => HealthSnapshot::unknown(id, e.to_string()),
        }
    }

    async fn restart(&self, id: &str, grace_period_secs: u64) -> Result<()> {
        let t = isize::try_from(grace_period_secs).unwrap_or(isize::MAX);
        self.call(
            RuntimeOperation::Restart,
            self.docker.restart_container(id, Some(RestartContainerOptions { t })),
        )
        .await
    }

    async fn stop(&self, id: &str, grace_period_secs: u64) -> Result<()> {
        let t = i64::try_from(grace_period_secs).unwrap_or(i64::MAX);
        self.call(
            RuntimeOperation::Stop,
            self.docker.stop_container(id, Some(StopContainerOptions { t })),
        )
        .await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.call(
            RuntimeOperation::Remove,
            self.docker.remove_container(id, Some(RemoveContainerOptions::default())),
        )
        .await
    }

    async fn create(&self, name: &str, spec: &UnitSpec) -> Result<String> {
        let invalid = |e: serde_json::Error| RuntimeError::command_failed(RuntimeOperation::Create, e.to_string());

        let mut config: Config<String> = if spec.container_config.is_null() {
            Config::default()
        } else {
            serde_json::from_value(spec.container_config.clone()).map_err(invalid)?
        };
        if config.image.is_none() {
            config.image = Some(spec.image.clone());
        }
        if !spec.host_config.is_null() {
            let host: HostConfig = serde_json::from_value(spec.host_config.clone()).map_err(invalid)?;
            config.host_config = Some(host);
        }
        if !spec.network_config.is_null() {
            let endpoints: HashMap<String, EndpointSettings> =
                serde_json::from_value(spec.network_config.clone()).map_err(invalid)?;
            config.networking_config = Some(NetworkingConfig {
                endpoints_config: endpoints,
            });
        }

        let created = self
            .call(
                RuntimeOperation::Create,
                self.docker.create_container(
                    Some(CreateContainerOptions {
                        name: name.to_string(),
                        platform: None,
                    }),
                    config,
                ),
            )
            .await?;
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.call(
            RuntimeOperation::Start,
            self.docker.start_container(id, None::<StartContainerOptions<String>>),
        )
        .await
    }

    async fn rename(&self, id: &str, name: &str) -> Result<()> {
        self.call(
            RuntimeOperation::Rename,
            self.docker.rename_container(
                id,
                RenameContainerOptions {
                    name: name.to_string(),
                },
            ),
        )
        .await
    }

    async fn inspect_service(&self, name: &str) -> Result<ServiceState> {
        let service = self
            .call(
                RuntimeOperation::InspectService,
                self.docker.inspect_service(name, None::<InspectServiceOptions>),
            )
            .await?;

        let version = service.version.and_then(|v| v.index).unwrap_or_default();
        let replicas = service
            .spec
            .and_then(|s| s.mode)
            .and_then(|m| m.replicated)
            .and_then(|r| r.replicas)
            .map_or(0, |r| u64::try_from(r).unwrap_or(0));
        Ok(ServiceState { version, replicas })
    }

    async fn update_service_replicas(&self, name: &str, version: u64, replicas: u64) -> Result<()> {
        // The update replaces the whole spec, so merge into the current one.
        let service = self
            .call(
                RuntimeOperation::InspectService,
                self.docker.inspect_service(name, None::<InspectServiceOptions>),
            )
            .await?;

        let mut spec: ServiceSpec = service.spec.unwrap_or_default();
        let mut mode = spec.mode.take().unwrap_or_default();
        let mut replicated = mode.replicated.take().unwrap_or_default();
        replicated.replicas = Some(i64::try_from(replicas).unwrap_or(i64::MAX));
        mode.replicated = Some(replicated);
        spec.mode = Some(mode);

        self.call(
            RuntimeOperation::UpdateService,
            self.docker.update_service(
                name,
                spec,
                UpdateServiceOptions {
                    version,
                    ..Default::default()
                },
                None,
            ),
        )
        .await
        .map(|_| ())
    }
}
