//! Version stamps and last-writer-wins registers.
//!
//! A `Stamp` is a Lamport counter paired with the replica that produced it.
//! Ordering is lexicographic (counter first, replica id as tie-break), which
//! gives every pair of concurrent writes a single deterministic winner on
//! every replica.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How far a remote stamp may run ahead of the local counter before it is
/// treated as hostile. Honest replicas only get ahead by the writes they made.
pub const MAX_CLOCK_SKEW: u64 = 1 << 32;

/// Logical version attached to every replicated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub clock: u64,
    pub replica: Uuid,
}

impl Stamp {
    /// The stamp every register starts below.
    pub const ZERO: Stamp = Stamp { clock: 0, replica: Uuid::nil() };
}

/// Lamport clock owned by one replica.
#[derive(Debug, Clone)]
pub struct LamportClock {
    replica: Uuid,
    counter: u64,
}

impl LamportClock {
    #[must_use]
    pub fn new(replica: Uuid) -> Self {
        Self { replica, counter: 0 }
    }

    /// Resume a clock from a persisted counter.
    #[must_use]
    pub fn resume(replica: Uuid, counter: u64) -> Self {
        Self { replica, counter }
    }

    #[must_use]
    pub fn replica(&self) -> Uuid {
        self.replica
    }

    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Advance and return a fresh stamp for a local write. `None` once the
    /// counter is exhausted.
    pub fn tick(&mut self) -> Option<Stamp> {
        self.counter = self.counter.checked_add(1)?;
        Some(Stamp { clock: self.counter, replica: self.replica })
    }

    /// Whether a remote stamp is close enough to be observed.
    #[must_use]
    pub fn within_skew(&self, stamp: Stamp) -> bool {
        stamp.clock <= self.counter.saturating_add(MAX_CLOCK_SKEW)
    }

    /// Fold in a stamp seen from another replica.
    pub fn observe(&mut self, stamp: Stamp) {
        self.counter = self.counter.max(stamp.clock);
    }
}

/// Single value with last-writer-wins merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    pub value: T,
    pub stamp: Stamp,
}

impl<T> LwwRegister<T> {
    #[must_use]
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    /// Offer a write. Returns `true` when it won and replaced the value.
    pub fn merge(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_monotonic_and_observe_jumps_forward() {
        let mut clock = LamportClock::new(Uuid::new_v4());
        let a = clock.tick().unwrap();
        let b = clock.tick().unwrap();
        assert!(b > a);

        clock.observe(Stamp { clock: 40, replica: Uuid::new_v4() });
        assert_eq!(clock.tick().unwrap().clock, 41);
    }

    #[test]
    fn exhausted_counter_refuses_to_wrap() {
        let mut clock = LamportClock::resume(Uuid::new_v4(), u64::MAX);
        assert!(clock.tick().is_none());
        assert_eq!(clock.counter(), u64::MAX);
    }

    #[test]
    fn skew_bound_is_relative_to_the_local_counter() {
        let clock = LamportClock::resume(Uuid::new_v4(), 10);
        let near = Stamp { clock: 10 + MAX_CLOCK_SKEW, replica: Uuid::new_v4() };
        let far = Stamp { clock: 11 + MAX_CLOCK_SKEW, replica: Uuid::new_v4() };
        assert!(clock.within_skew(near));
        assert!(!clock.within_skew(far));
    }

    #[test]
    fn equal_counters_break_ties_on_replica() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let mut reg = LwwRegister::new("a", Stamp { clock: 5, replica: high });
        assert!(!reg.merge("b", Stamp { clock: 5, replica: low }));
        assert_eq!(reg.value, "a");

        let mut reg = LwwRegister::new("b", Stamp { clock: 5, replica: low });
        assert!(reg.merge("a", Stamp { clock: 5, replica: high }));
        assert_eq!(reg.value, "a");
    }

    #[test]
    fn redelivery_is_a_noop() {
        let stamp = Stamp { clock: 3, replica: Uuid::new_v4() };
        let mut reg = LwwRegister::new(1.0, Stamp::ZERO);
        assert!(reg.merge(2.0, stamp));
        assert!(!reg.merge(2.0, stamp));
    }
}
