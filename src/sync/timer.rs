use std::time::Instant;

/// A pending single-shot timer. `id` distinguishes re-armed timers that
/// happen to share a deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
    pub id: u64,
    pub deadline: Instant,
}

/// Holds at most one outstanding timer. Arming replaces (cancels) whatever
/// was pending.
#[derive(Debug, Default)]
pub struct TimerSlot {
    next_id: u64,
    pending: Option<TimerHandle>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, deadline: Instant) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle {
            id: self.next_id,
            deadline,
        };
        self.pending = Some(handle);
        handle
    }

    pub fn cancel(&mut self) -> Option<TimerHandle> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<TimerHandle> {
        self.pending
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|h| h.deadline)
    }

    /// Consume the pending timer if it is due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<TimerHandle> {
        match self.pending {
            Some(h) if h.deadline <= now => self.pending.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn arming_replaces_pending_timer() {
        let t0 = Instant::now();
        let mut slot = TimerSlot::new();
        let first = slot.arm(t0 + Duration::from_secs(1));
        let second = slot.arm(t0 + Duration::from_secs(1));
        assert_ne!(first.id, second.id);
        assert_eq!(slot.pending(), Some(second));
    }

    #[test]
    fn take_due_only_after_deadline() {
        let t0 = Instant::now();
        let mut slot = TimerSlot::new();
        slot.arm(t0 + Duration::from_millis(500));
        assert!(slot.take_due(t0).is_none());
        assert!(slot.take_due(t0 + Duration::from_millis(500)).is_some());
        assert!(slot.pending().is_none());
    }

    #[test]
    fn cancel_clears() {
        let mut slot = TimerSlot::new();
        slot.arm(Instant::now());
        assert!(slot.cancel().is_some());
        assert!(slot.cancel().is_none());
        assert!(slot.deadline().is_none());
    }
}
