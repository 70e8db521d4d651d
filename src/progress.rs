//! Progress and cooperative-interrupt contract.
//!
//! The drivers report through this interface and consult it for
//! cancellation; implementations decide what (if anything) reaches the
//! user. Probes fire between iterations and between blocks, never inside
//! one. An interrupt unwinds to the driver, which deheap-sorts whatever
//! has been accumulated and reports `Termination::Interrupted`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// Capability interface consulted by the descent drivers.
///
/// All methods have no-op defaults; implement what you need.
pub trait Progress {
    fn iter_finished(&mut self, _iter: usize, _n_iters: usize) {}
    fn block_finished(&mut self) {}
    /// Whether the driver should compute and report the heap distance sum
    /// after each iteration (it is O(n_points * k), so opt-in).
    fn wants_heap_report(&self) -> bool {
        false
    }
    fn heap_report(&mut self, _dist_sum: f64) {}
    fn converged(&mut self, _n_updates: usize, _tol: f64) {}
    fn stopping_early(&mut self) {}
    fn check_interrupt(&mut self) -> bool {
        false
    }
}

/// Does nothing; safe to use from any context.
pub struct NullProgress;

impl Progress for NullProgress {}

/// Logs one line per finished iteration ("bar" style reporting).
pub struct LogProgress {
    verbose: bool,
}

impl LogProgress {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Progress for LogProgress {
    fn iter_finished(&mut self, iter: usize, n_iters: usize) {
        if self.verbose {
            info!(iter = iter + 1, n_iters, "iteration finished");
        }
    }

    fn converged(&mut self, n_updates: usize, tol: f64) {
        if self.verbose {
            info!(n_updates, tol, "converged");
        }
    }

    fn stopping_early(&mut self) {
        if self.verbose {
            info!("stopping early");
        }
    }
}

/// Logs the sum of kept heap distances after each iteration, a cheap
/// proxy for how far the graph still is from settling.
pub struct HeapSumProgress {
    verbose: bool,
}

impl HeapSumProgress {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Progress for HeapSumProgress {
    fn wants_heap_report(&self) -> bool {
        self.verbose
    }

    fn heap_report(&mut self, dist_sum: f64) {
        if self.verbose {
            info!(dist_sum, "heap distance sum");
        }
    }

    fn converged(&mut self, n_updates: usize, tol: f64) {
        if self.verbose {
            info!(n_updates, tol, "converged");
        }
    }
}

/// Cooperative cancellation through a shared flag; wrap another progress
/// implementation if logging is also wanted.
pub struct InterruptFlag {
    stop: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self { stop }
    }
}

impl Progress for InterruptFlag {
    fn check_interrupt(&mut self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}
