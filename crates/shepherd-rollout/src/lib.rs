//! shepherd-rollout — canary promotion and stable rollout.
//!
//! Each host runs two loops against the shared state:
//!
//! - the **canary** loop resolves the newest release, deploys it on one
//!   host under the canary lock, observes it for the canary window, and
//!   either promotes it to the stable tag or avoids it and rolls back;
//! - the **rollout** loop installs the current stable tag on every other
//!   host, one host per rollout window.
//!
//! # Components
//!
//! - **`phase`** — per-attempt phase machine
//! - **`outcome`** — closed set of tick results
//! - **`deployer`** — asset resolution plus deploy/rollback commands
//! - **`coordinator`** — the canary and rollout ticks
//! - **`dispatcher`** — sequential two-timer loop and one-shot mode

pub mod coordinator;
pub mod deployer;
pub mod dispatcher;
pub mod error;
pub mod outcome;
pub mod phase;

pub use coordinator::Coordinator;
pub use deployer::Deployer;
pub use dispatcher::{Dispatcher, TickHandler};
pub use error::{RolloutError, RolloutResult};
pub use outcome::{SkipReason, TickOutcome};
pub use phase::{Attempt, LoopKind, RolloutPhase};
