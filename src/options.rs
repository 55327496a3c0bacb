//! Collector tunables
//!
//! Pacing knobs in a small options struct with a builder. The defaults suit
//! a game loop: collection starts once the live set grows past the
//! threshold, each cycle lets the heap grow by `pause` percent before the
//! next one, and `step_mul` scales how much collector work each allocated
//! byte buys.

use crate::accountant::DEFAULT_THRESHOLD;

/// Percentage the live set may grow after a cycle before the next one
/// starts.
pub(crate) const DEFAULT_PAUSE: u32 = 150;

/// Work per byte allocated, as a percentage.
pub(crate) const DEFAULT_STEP_MUL: u32 = 400;

/// Options passed to [`Gc::with_options`](crate::Gc::with_options).
#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Percentage growth of the live set before the next cycle triggers.
    pub pause: u32,

    /// Collector work per byte allocated, as a percentage.
    pub step_mul: u32,

    /// Live bytes at which the first collection cycle triggers.
    pub threshold: usize,
}

impl Default for GcOptions {
    fn default() -> Self {
        GcOptionsBuilder::new().build()
    }
}

pub struct GcOptionsBuilder(GcOptions);

impl GcOptionsBuilder {
    /// Create new options with default values.
    pub fn new() -> Self {
        Self(GcOptions {
            pause: DEFAULT_PAUSE,
            step_mul: DEFAULT_STEP_MUL,
            threshold: DEFAULT_THRESHOLD,
        })
    }

    /// Return the options that have been built, consuming the builder.
    pub fn build(self) -> GcOptions {
        self.0
    }

    pub fn pause(mut self, pause: u32) -> Self {
        self.0.pause = pause;
        self
    }

    pub fn step_mul(mut self, step_mul: u32) -> Self {
        self.0.step_mul = step_mul;
        self
    }

    pub fn threshold(mut self, threshold: usize) -> Self {
        self.0.threshold = threshold;
        self
    }
}

impl Default for GcOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
