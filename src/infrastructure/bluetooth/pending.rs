//! Single-occupancy slot for an awaited hardware outcome.
//!
//! Notification and status callbacks can fire spuriously, twice, or after
//! the waiter has given up. The slot makes that harmless: at most one
//! waiter occupies it, the first resolution wins, and resolving an
//! unoccupied slot is a silent no-op.

use std::sync::Mutex;

use tokio::sync::oneshot;

#[derive(Debug)]
pub struct OpSlot<T> {
    waiter: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Default for OpSlot<T> {
    fn default() -> Self {
        Self {
            waiter: Mutex::new(None),
        }
    }
}

impl<T> OpSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupy the slot, returning the receiver the outcome will arrive on.
    /// Returns `None` while another waiter holds the slot.
    pub fn try_occupy(&self) -> Option<oneshot::Receiver<T>> {
        let mut guard = self.waiter.lock().expect("slot lock poisoned");
        if guard.is_some() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        *guard = Some(tx);
        Some(rx)
    }

    /// Resolve the pending operation. Returns `true` if a waiter was
    /// actually woken; a vacant slot swallows the value.
    pub fn resolve(&self, value: T) -> bool {
        let sender = self.waiter.lock().expect("slot lock poisoned").take();
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Vacate the slot without delivering anything, e.g. after the waiter
    /// timed out. Safe to call whether or not the slot is occupied.
    pub fn release(&self) {
        self.waiter.lock().expect("slot lock poisoned").take();
    }

    pub fn is_occupied(&self) -> bool {
        self.waiter.lock().expect("slot lock poisoned").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_occupant_is_rejected() {
        let slot = OpSlot::<u32>::new();
        let rx = slot.try_occupy().unwrap();
        assert!(slot.try_occupy().is_none());

        assert!(slot.resolve(7));
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn first_resolution_wins() {
        let slot = OpSlot::<u32>::new();
        let rx = slot.try_occupy().unwrap();

        assert!(slot.resolve(1));
        assert!(!slot.resolve(2), "late resolution must be a no-op");
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn release_frees_the_slot_for_reuse() {
        let slot = OpSlot::<u32>::new();
        let rx = slot.try_occupy().unwrap();
        slot.release();
        assert!(!slot.is_occupied());
        assert!(!slot.resolve(9), "released slot has no waiter");
        assert!(rx.await.is_err(), "waiter observes the dropped sender");

        let rx2 = slot.try_occupy().expect("slot reusable after release");
        slot.resolve(3);
        assert_eq!(rx2.await.unwrap(), 3);
    }

    #[test]
    fn resolve_without_waiter_is_noop() {
        let slot = OpSlot::<u32>::new();
        assert!(!slot.resolve(1));
        assert!(!slot.is_occupied());
    }
}
