//! Monitored units and the captured spec needed to rebuild them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Length of the short identifier shown in logs and the dashboard.
pub const DISPLAY_ID_LEN: usize = 12;

/// Kind of runtime object under watch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Container,
    Service,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitKind::Container => write!(f, "container"),
            UnitKind::Service => write!(f, "service"),
        }
    }
}

/// One container or service explicitly labeled for health observation.
///
/// `id` is unique within a runtime snapshot. `name` survives a recreate
/// (same logical unit) while `id` does not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredUnit {
    pub id: String,
    pub display_id: String,
    pub name: String,
    pub image: String,
    pub kind: UnitKind,
    /// Horizontally scalable service this unit belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

impl MonitoredUnit {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
        kind: UnitKind,
    ) -> Self {
        let id = id.into();
        Self {
            display_id: short_id(&id),
            id,
            name: normalize_name(&name.into()),
            image: image.into(),
            kind,
            service_name: None,
        }
    }

    /// Attach the scalable service this unit belongs to.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service_name = Some(service.into());
        self
    }

    /// Service to scale when load stays elevated, if any.
    pub fn scale_target(&self) -> Option<&str> {
        match self.kind {
            UnitKind::Service => Some(self.service_name.as_deref().unwrap_or(&self.name)),
            UnitKind::Container => self.service_name.as_deref(),
        }
    }

    pub fn is_scalable(&self) -> bool {
        self.scale_target().is_some()
    }

    /// Point this record at a replacement instance (after recreate).
    pub fn rekey(&mut self, new_id: &str) {
        self.id = new_id.to_string();
        self.display_id = short_id(new_id);
    }
}

/// First twelve characters of a runtime identifier.
pub fn short_id(id: &str) -> String {
    id.chars().take(DISPLAY_ID_LEN).collect()
}

/// Docker reports names with a leading `/`.
pub fn normalize_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

/// Everything the executor needs to rebuild a unit elsewhere.
///
/// The container/host/network sections are kept as opaque JSON so any
/// runtime adapter can round-trip its own representation through them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    pub image: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub container_config: serde_json::Value,
    #[serde(default)]
    pub host_config: serde_json::Value,
    #[serde(default)]
    pub network_config: serde_json::Value,
}

/// Full inspection result for one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitDetail {
    pub unit: MonitoredUnit,
    pub running: bool,
    pub spec: UnitSpec,
}

/// Replica state of a scalable service as read from the runtime.
///
/// `version` is the optimistic-concurrency token that must accompany
/// the next update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceState {
    pub version: u64,
    pub replicas: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_id_is_truncated() {
        let unit = MonitoredUnit::new("0123456789abcdef0123", "/auth-service", "auth:1", UnitKind::Container);
        assert_eq!(unit.display_id, "0123456789ab");
        assert_eq!(unit.name, "auth-service");
    }

    #[test]
    fn test_scale_target() {
        let plain = MonitoredUnit::new("a", "auth", "img", UnitKind::Container);
        assert!(!plain.is_scalable());

        let task = MonitoredUnit::new("b", "payments.1", "img", UnitKind::Container).with_service("payments");
        assert_eq!(task.scale_target(), Some("payments"));

        let service = MonitoredUnit::new("c", "payments", "img", UnitKind::Service);
        assert_eq!(service.scale_target(), Some("payments"));
    }

    #[test]
    fn test_rekey_keeps_name() {
        let mut unit = MonitoredUnit::new("old-id-0000000", "payments-worker", "img", UnitKind::Container);
        unit.rekey("new-id-1111111");
        assert_eq!(unit.name, "payments-worker");
        assert_eq!(unit.id, "new-id-1111111");
        assert_eq!(unit.display_id, "new-id-11111");
    }
}
