//! Shared data structures for container health observation and remediation
//!
//! This module defines the core types flowing through the healing loop:
//! - Discovery: MonitoredUnit (container or service bearing the monitor label)
//! - Observation: HealthSnapshot (point-in-time health reading)
//! - Decision: RemediationAction (none / restart / recreate / scale)
//! - Execution: ActionOutcome (result reported by the executor)
//! - Publication: ActivityEvent (append-only activity stream entry)

mod unit;
mod health;
mod action;
mod event;

pub use unit::*;
pub use health::*;
pub use action::*;
pub use event::*;
