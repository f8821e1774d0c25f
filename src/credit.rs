// src/credit.rs
//! Credit accounting outside the two monitors: a single atomic counter with
//! an edge-triggered announcement rule (invariant 5 — a credit announcement
//! is sent on the 0 -> positive transition of unannounced credit, never on
//! every recycle).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct UnannouncedCredit(AtomicU64);

impl UnannouncedCredit {
    /// Adds `delta` unannounced credits. Returns `true` iff this call
    /// observed the counter transition from zero to positive, i.e. iff the
    /// caller must send a credit announcement upstream.
    pub fn add(&self, delta: u64) -> bool {
        if delta == 0 {
            return false;
        }
        let prev = self.0.fetch_add(delta, Ordering::AcqRel);
        prev == 0
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Drains the counter back to zero, returning what it held. Called once
    /// the announcement has actually been sent.
    pub fn get_and_reset(&self) -> u64 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_add_from_zero_triggers_announcement() {
        let c = UnannouncedCredit::default();
        assert!(c.add(1));
        assert_eq!(c.get(), 1);
    }

    #[test]
    fn subsequent_adds_do_not_retrigger() {
        let c = UnannouncedCredit::default();
        assert!(c.add(3));
        assert!(!c.add(2));
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn reset_then_add_retriggers() {
        let c = UnannouncedCredit::default();
        c.add(1);
        assert_eq!(c.get_and_reset(), 1);
        assert!(c.add(1));
    }

    #[test]
    fn zero_delta_never_triggers() {
        let c = UnannouncedCredit::default();
        assert!(!c.add(0));
    }
}
