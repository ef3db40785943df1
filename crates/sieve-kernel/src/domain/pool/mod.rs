//! Domain Module: Sandbox Pool Rules
//!
//! Pure decisions the pool adapter applies: when an instance may move
//! between lifecycle states, when an idle instance is evicted, and whether
//! an instance goes back to the pool after an execution.
//!
//! # Lifecycle
//!
//! ```text
//! Compiling ──► Idle ◄──► InUse
//!     │          │          │
//!     └──────────┴──────────┴──► Disposed (terminal)
//! ```
//!
//! # Example
//!
//! ```
//! use sieve_kernel::domain::{Disposition, InstanceState, PoolPolicy};
//! use sieve_core::ExecutionOutcome;
//!
//! assert!(InstanceState::Idle.can_transition_to(InstanceState::InUse));
//! assert!(!InstanceState::Disposed.can_transition_to(InstanceState::Idle));
//!
//! let disposition = PoolPolicy::disposition(&ExecutionOutcome::TimeoutError, false);
//! assert_eq!(disposition, Disposition::Dispose);
//! ```

pub mod policy;
pub mod state;

pub use policy::{Disposition, PoolPolicy};
pub use state::{HealthStatus, InstanceState, InvalidTransition, PoolHealthCheck, PoolSnapshot};
