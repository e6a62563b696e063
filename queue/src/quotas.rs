//! Per-tenant quota configuration and the sliding request window

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Limits applied to one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantQuotas {
    /// Runs in flight at once; enforced at dequeue.
    pub max_concurrent: usize,
    /// Items waiting in the queue; enforced at enqueue.
    pub max_pending: usize,
    /// Enqueues per rolling window; enforced at enqueue.
    pub max_per_window: usize,
    pub window_seconds: u64,
}

impl Default for TenantQuotas {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_pending: 100,
            max_per_window: 600,
            window_seconds: 60,
        }
    }
}

/// Sliding counter over enqueue timestamps.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    samples: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admission if the window has room. Returns false when the
    /// quota is exhausted; the sample is not recorded in that case, so a
    /// denied enqueue does not consume budget.
    pub fn try_admit(&mut self, limit: usize, window: Duration) -> bool {
        let now = Instant::now();
        while let Some(front) = self.samples.front() {
            if now.duration_since(*front) >= window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        if self.samples.len() >= limit {
            return false;
        }
        self.samples.push_back(now);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_admits_up_to_limit() {
        let mut window = SlidingWindow::new();
        let limit = 3;
        let duration = Duration::from_secs(60);

        assert!(window.try_admit(limit, duration));
        assert!(window.try_admit(limit, duration));
        assert!(window.try_admit(limit, duration));
        assert!(!window.try_admit(limit, duration));
        // The denied attempt did not consume budget.
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn expired_samples_free_budget() {
        let mut window = SlidingWindow::new();
        assert!(window.try_admit(1, Duration::from_millis(0)));
        // Zero-length window expires instantly.
        assert!(window.try_admit(1, Duration::from_millis(0)));
    }
}
