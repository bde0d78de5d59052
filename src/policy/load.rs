//! Load signals feeding the scale rule.
//!
//! The engine samples a [`LoadSignal`] once per poll for every scalable
//! unit and counts consecutive polls at or above the high watermark.

use dashmap::DashMap;

use crate::types::MonitoredUnit;

/// Source of a per-unit load figure (0.0 idle, 1.0 saturated).
pub trait LoadSignal: Send + Sync {
    /// Current load of `unit`, or `None` when nothing is known.
    fn load(&self, unit: &MonitoredUnit) -> Option<f64>;
}

/// No load information; the scale rule never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoadSignal;

impl LoadSignal for NoLoadSignal {
    fn load(&self, _unit: &MonitoredUnit) -> Option<f64> {
        None
    }
}

/// Load values pushed in from outside (API or tests), keyed by unit name.
///
/// A reported value stays in force until replaced or cleared.
#[derive(Debug, Default)]
pub struct ReportedLoad {
    values: DashMap<String, f64>,
}

impl ReportedLoad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, unit_name: &str, value: f64) {
        self.values.insert(unit_name.to_string(), value);
    }

    pub fn clear(&self, unit_name: &str) {
        self.values.remove(unit_name);
    }
}

impl LoadSignal for ReportedLoad {
    fn load(&self, unit: &MonitoredUnit) -> Option<f64> {
        self.values.get(&unit.name).map(|entry| *entry.value())
    }
}

/// Consecutive elevated polls after one more sample.
pub fn track_elevated(previous: u32, value: Option<f64>, high_watermark: f64) -> u32 {
    match value {
        Some(v) if v.is_finite() && v >= high_watermark => previous.saturating_add(1),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitKind;

    #[test]
    fn test_elevated_streak_resets_below_watermark() {
        let mut streak = 0;
        for v in [0.9, 0.85, 0.95] {
            streak = track_elevated(streak, Some(v), 0.8);
        }
        assert_eq!(streak, 3);
        assert_eq!(track_elevated(streak, Some(0.5), 0.8), 0);
        assert_eq!(track_elevated(streak, None, 0.8), 0);
        assert_eq!(track_elevated(streak, Some(f64::NAN), 0.8), 0);
    }

    #[test]
    fn test_reported_load_by_name() {
        let signal = ReportedLoad::new();
        let unit = MonitoredUnit::new("abc", "payments-worker", "img", UnitKind::Container);
        assert_eq!(signal.load(&unit), None);
        signal.report("payments-worker", 0.92);
        assert_eq!(signal.load(&unit), Some(0.92));
        signal.clear("payments-worker");
        assert_eq!(signal.load(&unit), None);
    }
}
