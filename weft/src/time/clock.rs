use std::time::Instant;

/// Monotonic time source anchored at its creation.
///
/// Readings are seconds since the anchor, as `f64`. They never decrease,
/// whatever happens to the wall clock.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    /// Creates a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed seconds since the clock was created.
    pub fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
