//! This module manages the context in which the controller is
//! performing a single operation.
//!
//! Every call into the controller (a register access, or the servicing
//! of a timer) happens at some point in simulated time.  Transfers
//! are paced by timers which are armed relative to that time.  The
//! caller also keeps track of the actual elapsed time.
//!
//! In order to avoid confusion between these related quantities of
//! the same type, we keep them together in a struct so that we can
//! give them very clear names.
use core::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub simulated_time: Duration,
    pub real_elapsed_time: Duration,
}

impl Context {
    #[must_use]
    pub fn new(simulated_time: Duration, real_elapsed_time: Duration) -> Context {
        Context {
            simulated_time,
            real_elapsed_time,
        }
    }

    /// A context for a caller which does not track wall-clock time.
    #[must_use]
    pub fn at(simulated_time: Duration) -> Context {
        Context::new(simulated_time, Duration::ZERO)
    }
}
