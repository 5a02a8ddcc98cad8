//! shepherd-health — health checking for canary releases.
//!
//! The [`HealthChecker`] runs the operator's health-check command against a
//! freshly deployed release and decides whether it stayed healthy for the
//! whole canary observation window.
//!
//! # Phases
//!
//! ```text
//! t=0        initial check ── fail ──► retry (delay = interval) × retries
//!                 │                         └─ all failed ─► Unhealthy (immediately)
//!               pass
//!                 ▼
//! every interval  re-check ── fail ─► Unhealthy (no retries)
//!                 │
//! t=window    ───► Healthy
//! ```

pub mod checker;

pub use checker::{HealthCheckConfig, HealthChecker, HealthOutcome, ProbeResult};
