//! Fences: "not safe to touch until signaled" handles passed with buffers

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SyncPoint {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl SyncPoint {
    fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        }
    }

    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                        return *signaled;
                    }
                }
                None => self.cond.wait(&mut signaled),
            }
        }
        true
    }
}

/// A fence may be empty (`NO_FENCE`, always signaled) or track one or more
/// sync points; it is signaled once all of them are.
#[derive(Clone, Default)]
pub struct Fence {
    points: Vec<Arc<SyncPoint>>,
}

impl Fence {
    /// The empty fence: the buffer may be used immediately
    pub const NO_FENCE: Fence = Fence { points: Vec::new() };

    /// A pending fence; call `signal` when the guarded work completes
    pub fn new() -> Self {
        Self {
            points: vec![Arc::new(SyncPoint::new(false))],
        }
    }

    /// A fence that tracks a sync point but is already signaled
    pub fn signaled() -> Self {
        Self {
            points: vec![Arc::new(SyncPoint::new(true))],
        }
    }

    /// Whether this fence tracks anything (false for `NO_FENCE`)
    pub fn is_valid(&self) -> bool {
        !self.points.is_empty()
    }

    /// Signal every sync point tracked by this fence
    pub fn signal(&self) {
        for point in &self.points {
            *point.signaled.lock() = true;
            point.cond.notify_all();
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.points.iter().all(|p| *p.signaled.lock())
    }

    /// Wait up to `timeout`; returns whether the fence signaled
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.points.iter().all(|p| p.wait_until(Some(deadline)))
    }

    /// Wait with no timeout, logging if the wait is long
    pub fn wait_forever(&self, reason: &str) {
        const WARNING_INTERVAL: Duration = Duration::from_secs(3);
        while !self.wait(WARNING_INTERVAL) {
            tracing::warn!(reason, "fence did not signal within {:?}", WARNING_INTERVAL);
        }
    }

    /// A fence that signals once both inputs have signaled
    pub fn merge(a: &Fence, b: &Fence) -> Fence {
        let mut points = a.points.clone();
        for point in &b.points {
            if !points.iter().any(|p| Arc::ptr_eq(p, point)) {
                points.push(point.clone());
            }
        }
        Fence { points }
    }
}

impl PartialEq for Fence {
    fn eq(&self, other: &Self) -> bool {
        self.points.len() == other.points.len()
            && self
                .points
                .iter()
                .zip(&other.points)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl Eq for Fence {}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            f.debug_struct("Fence")
                .field("points", &self.points.len())
                .field("signaled", &self.is_signaled())
                .finish()
        } else {
            f.write_str("NO_FENCE")
        }
    }
}
