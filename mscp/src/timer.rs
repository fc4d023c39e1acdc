use std::time::Duration;

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

/// The controller's software timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TimerId {
    /// Queue service: per-unit pending work, ring polling, and the
    /// response backlog.
    Queue,
    /// Transfer continuation for one unit.
    Unit(usize),
    /// The once-per-second host access timer.
    HostClock,
}

/// Pending timers ordered by deadline.  Timers with equal deadlines
/// fire in the order in which they were armed.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    items: KeyedReversePriorityQueue<TimerId, (Duration, u64)>,
    sequence: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> TimerQueue {
        TimerQueue::default()
    }

    /// Arm `id` to fire at `deadline`.  A timer which is already
    /// armed keeps its existing deadline; returns false in that case.
    pub(crate) fn arm(&mut self, id: TimerId, deadline: Duration) -> bool {
        if let Some((when, _)) = self.items.get_priority(&id) {
            event!(
                Level::TRACE,
                "timer {id:?} already armed for {when:?}, not re-arming for {deadline:?}"
            );
            return false;
        }
        self.sequence += 1;
        self.items.push(id, (deadline, self.sequence));
        true
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.items.remove(&id).is_some()
    }

    pub(crate) fn is_armed(&self, id: TimerId) -> bool {
        self.items.get_priority(&id).is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.items.peek().map(|(_, (when, _))| *when)
    }

    /// Remove and return the earliest timer whose deadline is not
    /// later than `now`.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<TimerId> {
        match self.items.peek() {
            Some((_, (when, _))) if *when <= now => self.items.pop().map(|(id, _)| id),
            _ => None,
        }
    }

    pub(crate) fn clear(&mut self) {
        while self.items.pop().is_some() {}
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

#[test]
fn test_rearm_keeps_first_deadline() {
    let mut q = TimerQueue::new();
    assert!(q.arm(TimerId::Queue, Duration::from_micros(200)));
    assert!(!q.arm(TimerId::Queue, Duration::from_micros(100)));
    assert_eq!(q.next_deadline(), Some(Duration::from_micros(200)));
    assert_eq!(q.pop_due(Duration::from_micros(199)), None);
    assert_eq!(q.pop_due(Duration::from_micros(200)), Some(TimerId::Queue));
    assert_eq!(q.len(), 0);
}

#[test]
fn test_equal_deadlines_fire_in_arming_order() {
    let mut q = TimerQueue::new();
    let t = Duration::from_micros(500);
    q.arm(TimerId::Unit(3), t);
    q.arm(TimerId::Unit(0), t);
    q.arm(TimerId::Queue, t);
    assert_eq!(q.pop_due(t), Some(TimerId::Unit(3)));
    assert_eq!(q.pop_due(t), Some(TimerId::Unit(0)));
    assert_eq!(q.pop_due(t), Some(TimerId::Queue));
    assert_eq!(q.pop_due(t), None);
}

#[test]
fn test_cancel() {
    let mut q = TimerQueue::new();
    q.arm(TimerId::HostClock, Duration::from_secs(1));
    q.arm(TimerId::Unit(1), Duration::from_micros(500));
    assert!(q.cancel(TimerId::Unit(1)));
    assert!(!q.cancel(TimerId::Unit(1)));
    assert!(!q.is_armed(TimerId::Unit(1)));
    assert_eq!(q.next_deadline(), Some(Duration::from_secs(1)));
    q.clear();
    assert_eq!(q.next_deadline(), None);
}
