//! System-wide default constants.
//!
//! Every configurable value falls back to one of these when the TOML file
//! omits it. Grouped by subsystem.

// ============================================================================
// Server
// ============================================================================

/// HTTP bind address for the dashboard API.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Where the CLI looks for a running daemon.
pub const DAEMON_URL: &str = "http://127.0.0.1:8080";

/// HTTP client timeout for CLI requests (seconds).
pub const CLIENT_TIMEOUT_SECS: u64 = 15;

// ============================================================================
// Runtime
// ============================================================================

/// Label a container must carry to be watched.
pub const MONITOR_LABEL: &str = "sentinel.monitor=true";

/// Label naming the scalable service a container belongs to.
pub const SERVICE_LABEL: &str = "sentinel.service";

/// Per-request timeout against the runtime API (ms).
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Observer
// ============================================================================

/// Interval between poll cycles (ms).
pub const POLL_INTERVAL_MS: u64 = 5_000;

/// Budget for a single unit's health read (ms).
pub const HEALTH_TIMEOUT_MS: u64 = 3_000;

/// Maximum duration of a whole poll cycle (ms).
pub const CYCLE_TIMEOUT_MS: u64 = 30_000;

/// Units processed concurrently within a cycle.
pub const MAX_CONCURRENCY: usize = 16;

// ============================================================================
// Policy
// ============================================================================

pub const RESTART_THRESHOLD: u32 = 1;

pub const RECREATE_THRESHOLD: u32 = 3;

/// Stop timeout handed to the runtime on restart (seconds).
pub const GRACE_PERIOD_SECS: u64 = 10;

/// Cooldown = grace period × multiplier, doubled per consecutive attempt.
pub const COOLDOWN_MULTIPLIER: u32 = 3;

/// Upper bound on the cooldown window (seconds).
pub const MAX_COOLDOWN_SECS: u64 = 600;

/// Lifetime of an operator fault override (seconds).
pub const FAULT_OVERRIDE_TTL_SECS: u64 = 300;

/// Load signal (0.0-1.0) at or above which a poll counts as elevated.
pub const LOAD_HIGH_WATERMARK: f64 = 0.8;

/// Consecutive elevated polls before a scale-up.
pub const LOAD_SUSTAIN_POLLS: u32 = 3;

pub const SCALE_STEP: u32 = 1;

pub const MAX_SCALE_STEP: u32 = 3;

// ============================================================================
// Executor
// ============================================================================

/// Budget for one remediation action end to end (ms).
///
/// Recreate issues up to six runtime calls including a graceful stop.
pub const ACTION_TIMEOUT_MS: u64 = 60_000;

/// Suffix of the temporary name a replacement is created under.
pub const RECREATE_SUFFIX: &str = "-new";

pub const MIN_REPLICAS: u64 = 1;

pub const MAX_REPLICAS: u64 = 20;

// ============================================================================
// Activity
// ============================================================================

/// Events retained in memory for the activity feed.
pub const ACTIVITY_CAPACITY: usize = 1_000;

