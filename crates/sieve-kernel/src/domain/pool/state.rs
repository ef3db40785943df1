//! Domain Model: Pool State
//!
//! Sandbox lifecycle states and pool observability snapshots.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Instance Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of one sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Bootstrap, libraries and user source are being compiled
    Compiling,

    /// Entry point resolved; waiting in the pool
    Idle,

    /// Owned by exactly one execution
    InUse,

    /// Terminated. Terminal: never leaves this state
    Disposed,
}

/// Attempted a lifecycle move the state machine forbids
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid sandbox state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: InstanceState,
    pub to: InstanceState,
}

impl InstanceState {
    /// Check whether moving to `next` is allowed
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;

        matches!(
            (self, next),
            (Compiling, Idle)
                | (Compiling, Disposed)
                | (Idle, InUse)
                | (Idle, Disposed)
                | (InUse, Idle)
                | (InUse, Disposed)
        )
    }

    /// Move to `next`, or report the forbidden transition
    pub fn transition(self, next: InstanceState) -> Result<InstanceState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disposed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool Snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point-in-time view of one version's pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub version_id: String,

    /// Sandboxes waiting in the idle queue
    pub idle: usize,

    /// Sandboxes currently owned by an execution
    pub in_use: usize,

    /// Upper bound on `idle + in_use`
    pub max_size: usize,

    /// Sandboxes compiled over the pool's lifetime
    pub created: u64,

    /// Acquisitions served from the idle queue
    pub reused: u64,

    /// Sandboxes terminated over the pool's lifetime
    pub disposed: u64,

    /// Pool no longer hands out sandboxes
    pub closed: bool,
}

impl PoolSnapshot {
    /// Share of the pool's capacity currently occupied (0-100)
    pub fn utilization_pct(&self) -> u8 {
        if self.max_size == 0 {
            return 0;
        }
        (((self.idle + self.in_use) as f64 / self.max_size as f64) * 100.0).min(100.0) as u8
    }

    /// Every slot is in use; the next acquire will wait
    pub fn is_saturated(&self) -> bool {
        self.in_use >= self.max_size
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health Check
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pool health assessment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Healthy => None,
            Self::Degraded { reason } | Self::Unhealthy { reason } => Some(reason),
        }
    }
}

/// Pool health assessment logic
pub struct PoolHealthCheck;

impl PoolHealthCheck {
    /// Assess pool health based on snapshot
    ///
    /// # Business Rules
    ///
    /// - **Unhealthy**: pool closed
    /// - **Degraded**: saturated, or more sandboxes disposed than reused
    /// - **Healthy**: otherwise
    pub fn assess(snapshot: &PoolSnapshot) -> HealthStatus {
        if snapshot.closed {
            return HealthStatus::Unhealthy {
                reason: "Pool closed".to_string(),
            };
        }

        if snapshot.is_saturated() {
            return HealthStatus::Degraded {
                reason: "All sandboxes in use".to_string(),
            };
        }

        // Timeouts keep recompiling this version
        if snapshot.disposed > 0 && snapshot.disposed > snapshot.reused {
            return HealthStatus::Degraded {
                reason: "Sandboxes disposed faster than reused".to_string(),
            };
        }

        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposed_is_terminal() {
        for next in [
            InstanceState::Compiling,
            InstanceState::Idle,
            InstanceState::InUse,
            InstanceState::Disposed,
        ] {
            assert!(!InstanceState::Disposed.can_transition_to(next));
        }
        assert!(InstanceState::Disposed.is_terminal());
    }

    #[test]
    fn compiling_never_goes_straight_to_use() {
        let err = InstanceState::Compiling
            .transition(InstanceState::InUse)
            .unwrap_err();
        assert_eq!(err.from, InstanceState::Compiling);
        assert_eq!(
            InstanceState::Compiling.transition(InstanceState::Idle),
            Ok(InstanceState::Idle)
        );
    }

    #[test]
    fn snapshot_utilization() {
        let snapshot = PoolSnapshot {
            version_id: "v".into(),
            idle: 1,
            in_use: 2,
            max_size: 4,
            ..Default::default()
        };
        assert_eq!(snapshot.utilization_pct(), 75);
        assert!(!snapshot.is_saturated());
        assert!(PoolHealthCheck::assess(&snapshot).is_healthy());
    }

    #[test]
    fn health_assessment() {
        let saturated = PoolSnapshot {
            in_use: 2,
            max_size: 2,
            ..Default::default()
        };
        assert_eq!(
            PoolHealthCheck::assess(&saturated).reason(),
            Some("All sandboxes in use")
        );

        let churning = PoolSnapshot {
            max_size: 2,
            disposed: 5,
            reused: 1,
            ..Default::default()
        };
        assert!(!PoolHealthCheck::assess(&churning).is_healthy());

        let closed = PoolSnapshot {
            closed: true,
            ..Default::default()
        };
        assert!(matches!(
            PoolHealthCheck::assess(&closed),
            HealthStatus::Unhealthy { .. }
        ));
    }
}
