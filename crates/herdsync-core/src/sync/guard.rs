//! Scoped flags shared by the sync components

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counted switch that holds automatic pushes off while batch pulls run.
///
/// Each [`PushSuppression::suppress`] call returns a guard; pushes resume once
/// every outstanding guard has been dropped, including on early return.
#[derive(Debug, Clone, Default)]
pub struct PushSuppression {
    depth: Arc<AtomicUsize>,
}

impl PushSuppression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suppress(&self) -> SuppressionGuard {
        self.depth.fetch_add(1, Ordering::SeqCst);
        SuppressionGuard {
            depth: Arc::clone(&self.depth),
        }
    }

    pub fn is_active(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }
}

#[must_use = "suppression ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SuppressionGuard {
    depth: Arc<AtomicUsize>,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Single-flight flag: at most one holder of [`SingleFlight::try_begin`] at a time.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// `None` when another run is already in flight.
    pub fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { busy: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[must_use]
#[derive(Debug)]
pub struct FlightGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
