//! Simulation of elapsed time in the simulated system.

use std::time::Duration;

/// Clock is a simulated system clock.
///
/// The host-side port driver advances its clock from one controller
/// timer deadline to the next, so a long transfer which would take
/// seconds on a real adapter completes immediately in wall-clock
/// terms.
pub trait Clock {
    /// Retrieves the current (simulated) time.
    fn now(&self) -> Duration;

    /// The caller calls `consume` to simulate the passing of a
    /// duration `interval`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use mscp::Clock;
    ///
    /// fn g<C: Clock>(clk: &mut C) {
    ///   // We just waited for the port to finish a step which
    ///   // would have taken 200 microseconds.
    ///   clk.consume(&Duration::from_micros(200));
    /// }
    /// ```
    fn consume(&mut self, interval: &Duration);

    /// Move the clock forward to `when`.  Moving it backward does
    /// nothing.
    fn advance_to(&mut self, when: Duration) {
        let now = self.now();
        if when > now {
            self.consume(&(when - now));
        }
    }
}

/// BasicClock provides a simulated clock.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use mscp::BasicClock;
/// use mscp::Clock;
/// let mut clk = BasicClock::new();
/// clk.consume(&Duration::from_micros(12));
/// assert_eq!(clk.now(), Duration::from_micros(12));
/// ```
#[derive(Debug)]
pub struct BasicClock {
    /// Elapsed time as measured by the simulated clock.
    simulator_elapsed: Duration,
}

impl BasicClock {
    #[must_use]
    pub fn new() -> BasicClock {
        BasicClock {
            simulator_elapsed: Duration::new(0, 0),
        }
    }
}

impl Default for BasicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for BasicClock {
    fn now(&self) -> Duration {
        self.simulator_elapsed
    }

    fn consume(&mut self, interval: &Duration) {
        self.simulator_elapsed += *interval;
    }
}

#[test]
fn test_advance_to_never_goes_backward() {
    let mut clk = BasicClock::new();
    clk.advance_to(Duration::from_millis(3));
    assert_eq!(clk.now(), Duration::from_millis(3));
    clk.advance_to(Duration::from_millis(1));
    assert_eq!(clk.now(), Duration::from_millis(3));
}
