//! shepherd-state — shared and host-local rollout state.
//!
//! # Shared state
//!
//! [`SharedState`] is the only channel through which hosts coordinate.
//! It exposes TTL-bound locks (`canary-lock`, `rollout-lock`), the fleet's
//! stable tag, and the append-only avoid set. [`RedisState`] is the
//! production backend; [`MemoryState`] mirrors its semantics in-process.
//!
//! All keys live under a `<namespace>_` prefix (see [`StateKeys`]) so one
//! store can coordinate several repositories.
//!
//! # Local state
//!
//! [`InstallTracker`] answers "what is installed on this host?". Two
//! strategies exist: [`FileTracker`] persists a JSON record after every
//! successful deploy, [`CommandTracker`] asks the running system.
//!
//! [`can_install`] combines both views into an [`Eligibility`] verdict.

pub mod eligibility;
pub mod error;
pub mod keys;
pub mod local;
pub mod memory;
pub mod store;
pub mod types;

pub use eligibility::{Eligibility, can_install};
pub use error::{StateError, StateResult};
pub use keys::StateKeys;
pub use local::{CommandTracker, FileTracker, InstallTracker, LocalInstallState, tracker_for};
pub use memory::MemoryState;
pub use store::{RedisState, SharedState, connection_info};
pub use types::*;
