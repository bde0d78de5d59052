//! Per-unit state table.

use std::collections::HashMap;

use crate::activity::UnitStatus;
use crate::config::PolicyConfig;
use crate::policy::{FaultOverride, RemediationHistory};
use crate::types::{ActionOutcome, HealthSnapshot, MonitoredUnit};

/// Everything tracked about one monitored unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub unit: MonitoredUnit,
    /// Latest effective snapshot (fault override applied)
    pub snapshot: Option<HealthSnapshot>,
    pub fault: Option<FaultOverride>,
    pub history: RemediationHistory,
    pub last_outcome: Option<ActionOutcome>,
    /// Latest sampled load
    pub load: Option<f64>,
}

impl UnitRecord {
    pub fn new(unit: MonitoredUnit) -> Self {
        Self {
            unit,
            snapshot: None,
            fault: None,
            history: RemediationHistory::default(),
            last_outcome: None,
            load: None,
        }
    }

    /// `service` is the scaling state of the unit's scale target, if any.
    pub fn to_status(&self, policy: &PolicyConfig, service: Option<&ServiceRecord>) -> UnitStatus {
        UnitStatus {
            unit: self.unit.clone(),
            snapshot: self.snapshot.clone(),
            last_outcome: self.last_outcome.clone(),
            fault_override: self.fault,
            last_action_at: self.history.last_action_at,
            cooldown_until: self.history.cooldown_until(policy),
            history: self.history.clone(),
            load: self.load,
            elevated_polls: service.map_or(0, |s| s.elevated_polls),
        }
    }
}

/// Scaling state shared by every replica of one service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRecord {
    /// Scale attempts; drives the service's cooldown
    pub history: RemediationHistory,
    /// Mean load of the members that reported one last poll
    pub load: Option<f64>,
    pub elevated_polls: u32,
}

/// Result of merging a fresh listing into the table
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciled {
    pub added: Vec<MonitoredUnit>,
    pub removed: Vec<MonitoredUnit>,
}

/// Units under watch, keyed by runtime id.
#[derive(Debug, Default)]
pub struct UnitTable {
    records: HashMap<String, UnitRecord>,
    services: HashMap<String, ServiceRecord>,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a listing: add new units, refresh metadata, drop absent ones.
    pub fn reconcile(&mut self, listed: &[MonitoredUnit]) -> Reconciled {
        self.reconcile_with(listed, |_| false)
    }

    /// Like [`UnitTable::reconcile`], but absent records for which `pinned`
    /// holds are kept. A unit mid-recreate is briefly missing from listings
    /// and its record must survive until the outcome re-keys it.
    pub fn reconcile_with(&mut self, listed: &[MonitoredUnit], pinned: impl Fn(&UnitRecord) -> bool) -> Reconciled {
        let mut result = Reconciled::default();

        let present: std::collections::HashSet<&str> = listed.iter().map(|u| u.id.as_str()).collect();
        let absent: Vec<String> = self
            .records
            .iter()
            .filter(|(id, record)| !present.contains(id.as_str()) && !pinned(record))
            .map(|(id, _)| id.clone())
            .collect();
        for id in absent {
            if let Some(record) = self.records.remove(&id) {
                result.removed.push(record.unit);
            }
        }

        for unit in listed {
            match self.records.get_mut(&unit.id) {
                Some(record) => record.unit = unit.clone(),
                None => {
                    self.records.insert(unit.id.clone(), UnitRecord::new(unit.clone()));
                    result.added.push(unit.clone());
                }
            }
        }

        let records = &self.records;
        self.services
            .retain(|name, _| records.values().any(|r| r.unit.scale_target() == Some(name.as_str())));
        result
    }

    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.get(name)
    }

    /// Scaling state for `name`, created on first use.
    pub fn service_mut(&mut self, name: &str) -> &mut ServiceRecord {
        self.services.entry(name.to_string()).or_default()
    }

    pub fn get(&self, id: &str) -> Option<&UnitRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut UnitRecord> {
        self.records.get_mut(id)
    }

    /// Resolve a name, full id or display id to the unit's id.
    pub fn resolve(&self, key: &str) -> Option<String> {
        if self.records.contains_key(key) {
            return Some(key.to_string());
        }
        self.records
            .values()
            .find(|r| r.unit.name == key)
            .or_else(|| self.records.values().find(|r| r.unit.display_id == key))
            .map(|r| r.unit.id.clone())
    }

    /// Move a record to the id of its replacement. A record a listing
    /// already added under `new_id` is replaced.
    pub fn rekey(&mut self, old_id: &str, new_id: &str) -> bool {
        match self.records.remove(old_id) {
            Some(mut record) => {
                record.unit.rekey(new_id);
                if let Some(snapshot) = record.snapshot.as_mut() {
                    snapshot.unit_id = new_id.to_string();
                }
                self.records.insert(new_id.to_string(), record);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<UnitRecord> {
        self.records.remove(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &UnitRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn statuses(&self, policy: &PolicyConfig) -> Vec<UnitStatus> {
        self.records
            .values()
            .map(|r| {
                let service = r.unit.scale_target().and_then(|s| self.services.get(s));
                r.to_status(policy, service)
            })
            .collect()
    }
}
