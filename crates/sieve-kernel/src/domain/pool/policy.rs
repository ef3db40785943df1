//! Domain Model: Pool Policy
//!
//! Pure business rules for sandbox pooling, eviction and post-execution
//! disposition. No infrastructure concerns: the pool adapter asks, these
//! functions answer.

use std::time::{Duration, Instant};

use sieve_core::ExecutionOutcome;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disposition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What happens to a sandbox once an execution has settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back to the idle queue for the next batch of the same version
    Release,
    /// Terminated and never reused
    Dispose,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool Policy (Pure Strategy Functions)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pool management policies
pub struct PoolPolicy;

impl PoolPolicy {
    /// Determine if an idle sandbox should be evicted
    ///
    /// # Business Rule
    ///
    /// Evict sandboxes that have been idle longer than `max_idle`, so that
    /// versions nobody runs anymore stop holding their heap reservations.
    pub fn should_evict(last_used: Instant, max_idle: Duration) -> bool {
        last_used.elapsed() > max_idle
    }

    /// Whether a new sandbox may be compiled for a pool
    ///
    /// # Business Rule
    ///
    /// Only when nothing is idle and `idle + in_use` stays within `max_size`.
    pub fn can_create(idle: usize, in_use: usize, max_size: usize) -> bool {
        idle == 0 && idle + in_use < max_size
    }

    /// Decide whether the sandbox behind an outcome may be reused
    ///
    /// # Business Rule
    ///
    /// | Outcome          | Disposition                                   |
    /// |------------------|-----------------------------------------------|
    /// | Success          | Release                                       |
    /// | RuntimeError     | Release (Dispose with `dispose_on_runtime_error`) |
    /// | TimeoutError     | Dispose                                       |
    /// | ResolutionError  | Dispose                                       |
    ///
    /// A runtime error is a clean, script-reported failure; a timeout may
    /// leave the isolate mid-execution.
    pub fn disposition(outcome: &ExecutionOutcome, dispose_on_runtime_error: bool) -> Disposition {
        match outcome {
            _ if outcome.disposes_instance() => Disposition::Dispose,
            ExecutionOutcome::RuntimeError(_) if dispose_on_runtime_error => Disposition::Dispose,
            _ => Disposition::Release,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_respects_idle_window() {
        assert!(!PoolPolicy::should_evict(Instant::now(), Duration::from_secs(60)));

        let old = Instant::now() - Duration::from_millis(50);
        assert!(PoolPolicy::should_evict(old, Duration::from_millis(10)));
    }

    #[test]
    fn creation_bounded_by_max_size() {
        assert!(PoolPolicy::can_create(0, 0, 1));
        assert!(PoolPolicy::can_create(0, 2, 3));
        assert!(!PoolPolicy::can_create(0, 3, 3));
        assert!(!PoolPolicy::can_create(1, 0, 3));
    }

    #[test]
    fn disposition_matrix() {
        let success = ExecutionOutcome::Success(vec![]);
        let runtime = ExecutionOutcome::RuntimeError("boom".into());
        let resolution = ExecutionOutcome::ResolutionError("none".into());

        assert_eq!(PoolPolicy::disposition(&success, false), Disposition::Release);
        assert_eq!(PoolPolicy::disposition(&runtime, false), Disposition::Release);
        assert_eq!(PoolPolicy::disposition(&runtime, true), Disposition::Dispose);
        assert_eq!(
            PoolPolicy::disposition(&ExecutionOutcome::TimeoutError, false),
            Disposition::Dispose
        );
        assert_eq!(PoolPolicy::disposition(&resolution, false), Disposition::Dispose);
    }
}
