//! Sentinel: container health observation and self-healing
//!
//! Watches labeled containers and services, classifies their health each
//! poll, and remediates degraded units by restart, recreate or scale.
//!
//! ## Architecture
//!
//! - **Runtime Gateway** (`runtime`): async capability trait over the
//!   container runtime, with a Docker backend and an in-memory simulator
//! - **Health Observer** (`observer`): discovery, bounded health sampling,
//!   transition detection and the per-unit state table
//! - **Remediation Policy** (`policy`): pure decision function, cooldowns,
//!   fault overrides and load tracking
//! - **Action Executor** (`executor`): restart, create-before-destroy
//!   recreate, optimistic-concurrency scale
//! - **Activity Publisher** (`activity`): append-only event log and the
//!   status board
//! - **Engine** (`engine`): the poll loop and operator commands

pub mod activity;
pub mod api;
pub mod client;
pub mod config;
pub mod engine;
pub mod executor;
pub mod observer;
pub mod policy;
pub mod runtime;
pub mod types;

pub use activity::{ActivityLog, ActivityStore, FeedQuery, StatusSnapshot, UnitStatus};
pub use config::SentinelConfig;
pub use engine::{CommandError, CycleReport, Engine, TriggerMode, TriggerResult};
pub use runtime::{DockerGateway, InMemoryRuntime, RuntimeError, RuntimeGateway, UnitFilter};
pub use types::{
    ActionKind, ActionOutcome, ActivityEvent, HealthSnapshot, HealthState, MonitoredUnit,
    RemediationAction,
};
