//! Allocation ledger and pacing
//!
//! A small ledger tracking live bytes and the alloc/dealloc deltas since the
//! last collection step. The deltas drive pacing: the more the application
//! allocated since the collector last ran, the bigger the next step's work
//! budget.

/// Minimum work budget per step, so a step always makes progress even when
/// nothing was allocated since the last one.
const STEP_MIN_WORK: usize = 4 * 1024;

/// How much further `alloc_bytes` may grow mid-cycle before the next step
/// fires.
const STEP_SLACK: usize = 4 * 1024;

/// Trigger for the very first collection cycle.
pub(crate) const DEFAULT_THRESHOLD: usize = 64 * 1024;

pub(crate) struct Accountant {
    /// Current live bytes: all reported allocations minus frees.
    pub(crate) alloc_bytes: usize,
    /// The slice of `alloc_bytes` belonging to managed objects (headers
    /// included). The walker checks this against the registry.
    pub(crate) managed_bytes: usize,
    /// Bytes allocated since the last collection step.
    pub(crate) running_alloc_bytes: usize,
    /// Bytes freed since the last collection step.
    pub(crate) running_dealloc_bytes: usize,
    /// `alloc_bytes` value at which the next step triggers.
    pub(crate) threshold: usize,
    /// Configured lower bound for the threshold between cycles.
    floor: usize,
}

impl Accountant {
    pub(crate) const fn new(threshold: usize) -> Accountant {
        Accountant {
            alloc_bytes: 0,
            managed_bytes: 0,
            running_alloc_bytes: 0,
            running_dealloc_bytes: 0,
            threshold,
            floor: threshold,
        }
    }

    /// Record an external (non-managed) allocation that should influence
    /// pacing.
    #[inline]
    pub(crate) fn report_alloc(&mut self, bytes: usize) {
        self.alloc_bytes += bytes;
        self.running_alloc_bytes += bytes;
    }

    /// Record an external deallocation.
    #[inline]
    pub(crate) fn report_dealloc(&mut self, bytes: usize) {
        self.alloc_bytes = self.alloc_bytes.saturating_sub(bytes);
        self.running_dealloc_bytes += bytes;
    }

    /// Record an external reallocation as the delta between sizes.
    #[inline]
    pub(crate) fn report_realloc(&mut self, old: usize, new: usize) {
        if old < new {
            self.report_alloc(new - old);
        } else {
            self.report_dealloc(old - new);
        }
    }

    /// Record a managed allocation (header included in `bytes`).
    #[inline]
    pub(crate) fn report_managed_alloc(&mut self, bytes: usize) {
        self.report_alloc(bytes);
        self.managed_bytes += bytes;
    }

    /// Record a managed object's memory being released.
    #[inline]
    pub(crate) fn report_managed_dealloc(&mut self, bytes: usize) {
        self.report_dealloc(bytes);
        self.managed_bytes = self.managed_bytes.saturating_sub(bytes);
    }

    /// Has allocation crossed the threshold?
    #[inline]
    pub(crate) fn over_threshold(&self) -> bool {
        self.alloc_bytes >= self.threshold
    }

    /// Work budget for the next step, in byte units, consuming the running
    /// deltas.
    pub(crate) fn take_step_budget(&mut self, step_mul: u32) -> usize {
        let budget = self.running_alloc_bytes.saturating_mul(step_mul as usize) / 100;
        self.running_alloc_bytes = 0;
        self.running_dealloc_bytes = 0;
        budget.max(STEP_MIN_WORK)
    }

    /// Re-arm the threshold while a cycle is in flight: fire again after a
    /// little more allocation.
    #[inline]
    pub(crate) fn rearm_mid_cycle(&mut self) {
        self.threshold = self.alloc_bytes + STEP_SLACK;
    }

    /// Set the threshold for the next cycle once this one has completed:
    /// let the live set grow by `pause` percent first, but never drop below
    /// the configured floor.
    #[inline]
    pub(crate) fn arm_next_cycle(&mut self, pause: u32) {
        let grown = self.alloc_bytes.saturating_mul(100 + pause as usize) / 100;
        self.threshold = grown.max(self.floor);
    }
}
