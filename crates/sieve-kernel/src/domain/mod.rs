//! Functional core: pure rules with no V8 or runtime dependencies.
//!
//! - `entry`: which top-level function a transformation exposes
//! - `pool`: instance lifecycle, eviction and disposition rules, snapshots

pub mod entry;
pub mod pool;

pub use entry::EntryPoint;
pub use pool::{Disposition, InstanceState, PoolPolicy, PoolSnapshot};
