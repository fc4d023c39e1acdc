//! A keyed priority queue which pops the item with the *lowest*
//! priority first.  The controller uses it to hold its software
//! timers, keyed by timer identity and prioritised by deadline.
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use keyed_priority_queue::KeyedPriorityQueue;

#[derive(Debug)]
struct ReverseOrdered<T> {
    inner: T,
}

impl<T> From<T> for ReverseOrdered<T> {
    fn from(inner: T) -> ReverseOrdered<T> {
        ReverseOrdered { inner }
    }
}

impl<T: Ord> PartialOrd for ReverseOrdered<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Eq for ReverseOrdered<T> {}

impl<T: Eq> PartialEq for ReverseOrdered<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: Ord> Ord for ReverseOrdered<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.inner.cmp(&self.inner)
    }
}

#[test]
fn test_reverse_order() {
    assert_eq!(ReverseOrdered::from(1), ReverseOrdered::from(1));
    assert_ne!(ReverseOrdered::from(1), ReverseOrdered::from(0));
    assert!(ReverseOrdered::from(1) < ReverseOrdered::from(0));
    assert!(ReverseOrdered::from(1) <= ReverseOrdered::from(0));
}

#[derive(Debug)]
pub struct UnknownKeyError {}

pub struct KeyedReversePriorityQueue<K: Hash + Eq, P: Ord> {
    items: KeyedPriorityQueue<K, ReverseOrdered<P>>,
}

impl<K, P> KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    pub fn new() -> KeyedReversePriorityQueue<K, P> {
        KeyedReversePriorityQueue {
            items: KeyedPriorityQueue::<K, ReverseOrdered<P>>::new(),
        }
    }

    pub fn peek(&self) -> Option<(&K, &P)> {
        self.items.peek().map(|(k, p)| (k, &p.inner))
    }

    pub fn pop(&mut self) -> Option<(K, P)> {
        self.items.pop().map(|(k, p)| (k, p.inner))
    }

    /// Insert `key` with `priority`, returning the priority it
    /// previously had (if it was already present).
    pub fn push(&mut self, key: K, priority: P) -> Option<P> {
        self.items
            .push(key, ReverseOrdered::from(priority))
            .map(|rd| rd.inner)
    }

    pub fn get_priority(&self, key: &K) -> Option<&P> {
        self.items.get_priority(key).map(|rd| &rd.inner)
    }

    /// Remove `key` from the queue, returning its priority.
    pub fn remove(&mut self, key: &K) -> Option<P> {
        self.items.remove(key).map(|rd| rd.inner)
    }

    /// Update the priority of a item (identified by `key`) in the
    /// priority queue.
    ///
    /// # Errors
    ///
    /// `UnknownKeyError` is returned when the indicated key is not
    /// present.
    pub fn set_priority(&mut self, key: &K, priority: P) -> Result<P, UnknownKeyError> {
        match self.items.set_priority(key, ReverseOrdered::from(priority)) {
            Ok(priority) => Ok(priority.inner),
            Err(_) => Err(UnknownKeyError {}),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K, P> Default for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq,
    P: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Debug for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq + Debug,
    P: Ord + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedReversePriorityQueue")
            .field("items", &self.items)
            .finish()
    }
}

#[test]
fn test_empty() {
    let mut q: KeyedReversePriorityQueue<usize, usize> = KeyedReversePriorityQueue::default();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    assert_eq!(q.peek(), None);
    assert_eq!(q.pop(), None);
    assert_eq!(q.remove(&3), None);
}

#[test]
fn test_repeat_push_replaces_priority() {
    let mut q: KeyedReversePriorityQueue<&str, u32> = KeyedReversePriorityQueue::new();
    assert_eq!(q.push("queue", 200), None);
    assert_eq!(q.push("queue", 400), Some(200));
    assert_eq!(q.get_priority(&"queue"), Some(&400));
    assert_eq!(q.pop(), Some(("queue", 400)));
    assert!(q.is_empty());
}

#[test]
fn test_earliest_deadline_pops_first() {
    let mut q: KeyedReversePriorityQueue<&str, u32> = KeyedReversePriorityQueue::new();
    assert_eq!(q.push("unit1", 800), None);
    assert_eq!(q.push("queue", 200), None);
    assert_eq!(q.push("clock", 1_000_000), None);
    assert_eq!(q.peek(), Some((&"queue", &200)));
    assert_eq!(q.remove(&"unit1"), Some(800));
    assert_eq!(q.pop(), Some(("queue", 200)));
    assert_eq!(q.pop(), Some(("clock", 1_000_000)));
    assert!(q.is_empty());
}

#[test]
fn test_set_priority_unknown_key() {
    let mut q: KeyedReversePriorityQueue<u8, u8> = KeyedReversePriorityQueue::new();
    assert!(q.set_priority(&1, 5).is_err());
    q.push(1, 9);
    assert_eq!(q.set_priority(&1, 5).ok(), Some(9));
    assert_eq!(q.pop(), Some((1, 5)));
}
