//! Presence Layer
//!
//! In-memory index of the latest world snapshot and the proximity rules
//! evaluated against it. This layer is pure: no network I/O, no broadcasting.

pub mod snapshot;
pub mod registry;
pub mod proximity;

pub use snapshot::{WorldSnapshot, MapGroup, SnapshotBuilder, BuildSummary};
pub use registry::{PresenceRegistry, PresenceError, RegistryStats};
pub use proximity::{ProximityPolicy, VisibilityRange, CustomRange, VisibleSet};
