use std::time::Instant;

/// Source of local wall-clock time for the cooperative loop.
pub trait Clock {
    fn now(&self) -> Instant;
    /// Block the loop until `deadline`. Returns immediately if it has passed.
    fn sleep_until(&self, deadline: Instant);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let wait = deadline.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

/// Fake clock for tests: time moves only when the loop sleeps or the test
/// advances it.
#[cfg(test)]
pub struct ManualClock {
    base: Instant,
    offset: std::cell::Cell<std::time::Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: std::cell::Cell::new(std::time::Duration::ZERO),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = self.now();
        if deadline > now {
            self.advance(deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn manual_clock_sleeps_forward_only() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.sleep_until(t0 + Duration::from_millis(250));
        assert_eq!(clock.now() - t0, Duration::from_millis(250));
        clock.sleep_until(t0);
        assert_eq!(clock.now() - t0, Duration::from_millis(250));
    }
}
