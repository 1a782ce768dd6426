// ── Rolling-window rate budget ──
//
// The vendor allows a fixed number of REST calls per trailing 24 hours,
// account-wide. This tracker is pure bookkeeping: no I/O, one mutex,
// entries pruned lazily on each check. Reservation is atomic across
// concurrent pollers -- the lock covers prune + check + record.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Permission granted; `now` was recorded against the budget.
    Granted { remaining: usize },
    /// Budget exhausted. `retry_after` is the time until the oldest
    /// recorded call ages out of the window. Callers skip, not queue.
    Denied { retry_after: Duration },
}

impl Reservation {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

struct Window {
    calls: VecDeque<Instant>,
}

/// Rolling 24-hour call budget with a fixed ceiling.
pub struct RateBudget {
    ceiling: usize,
    window: Duration,
    inner: Mutex<Window>,
}

impl RateBudget {
    pub fn new(ceiling: usize, window: Duration) -> Self {
        Self {
            ceiling,
            window,
            inner: Mutex::new(Window {
                calls: VecDeque::with_capacity(ceiling),
            }),
        }
    }

    /// Try to reserve one call at `now`.
    ///
    /// Prunes entries older than the window, then either records `now`
    /// and grants, or denies with the time until a slot frees up.
    pub fn try_reserve(&self, now: Instant) -> Reservation {
        #[allow(clippy::unwrap_used)] // mutex poisoning is unrecoverable here
        let mut window = self.inner.lock().unwrap();

        Self::prune(&mut window.calls, now, self.window);

        if window.calls.len() < self.ceiling {
            window.calls.push_back(now);
            Reservation::Granted {
                remaining: self.ceiling - window.calls.len(),
            }
        } else {
            // Non-empty: len >= ceiling and ceiling > 0 in any sane config;
            // a zero ceiling denies with zero wait.
            let retry_after = window
                .calls
                .front()
                .map_or(Duration::ZERO, |oldest| {
                    self.window.saturating_sub(now.saturating_duration_since(*oldest))
                });
            Reservation::Denied { retry_after }
        }
    }

    /// Calls still available in the window ending at `now`.
    pub fn remaining(&self, now: Instant) -> usize {
        #[allow(clippy::unwrap_used)]
        let mut window = self.inner.lock().unwrap();
        Self::prune(&mut window.calls, now, self.window);
        self.ceiling - window.calls.len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Ages of all recorded calls (oldest first), for diagnostics.
    pub fn call_ages(&self, now: Instant) -> Vec<Duration> {
        #[allow(clippy::unwrap_used)]
        let mut window = self.inner.lock().unwrap();
        Self::prune(&mut window.calls, now, self.window);
        window
            .calls
            .iter()
            .map(|t| now.saturating_duration_since(*t))
            .collect()
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = calls.front() {
            if now.saturating_duration_since(*oldest) >= window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);
    const HOUR: Duration = Duration::from_secs(3_600);

    #[test]
    fn grants_until_ceiling_then_denies() {
        let budget = RateBudget::new(3, DAY);
        let t0 = Instant::now();

        assert_eq!(budget.try_reserve(t0), Reservation::Granted { remaining: 2 });
        assert_eq!(budget.try_reserve(t0), Reservation::Granted { remaining: 1 });
        assert_eq!(budget.try_reserve(t0), Reservation::Granted { remaining: 0 });
        assert!(!budget.try_reserve(t0).is_granted());
    }

    #[test]
    fn denial_reports_time_until_oldest_expires() {
        let budget = RateBudget::new(1, DAY);
        let t0 = Instant::now();

        assert!(budget.try_reserve(t0).is_granted());

        let Reservation::Denied { retry_after } = budget.try_reserve(t0 + HOUR) else {
            panic!("expected denial");
        };
        assert_eq!(retry_after, DAY - HOUR);
    }

    #[test]
    fn ceiling_scenario_fifty_calls() {
        // Ceiling 50; 50 calls at t0; attempt at hour 23 denied; at
        // hour 25 the oldest entry has aged out and one slot reopens.
        let budget = RateBudget::new(50, DAY);
        let t0 = Instant::now();

        for _ in 0..50 {
            assert!(budget.try_reserve(t0).is_granted());
        }

        assert!(!budget.try_reserve(t0 + 23 * HOUR).is_granted());

        let at_25h = budget.try_reserve(t0 + 25 * HOUR);
        assert_eq!(at_25h, Reservation::Granted { remaining: 0 });

        // All remaining entries (49 originals + the hour-25 grant) are
        // still inside the window, so the next attempt is denied again.
        assert!(!budget.try_reserve(t0 + 25 * HOUR).is_granted());
    }

    #[test]
    fn exactly_one_slot_per_expired_entry() {
        let budget = RateBudget::new(2, DAY);
        let t0 = Instant::now();

        assert!(budget.try_reserve(t0).is_granted());
        assert!(budget.try_reserve(t0 + HOUR).is_granted());
        assert!(!budget.try_reserve(t0 + 2 * HOUR).is_granted());

        // First entry ages out at t0 + 24h.
        assert!(budget.try_reserve(t0 + DAY).is_granted());
        assert!(!budget.try_reserve(t0 + DAY).is_granted());
    }

    #[test]
    fn remaining_prunes_lazily() {
        let budget = RateBudget::new(5, DAY);
        let t0 = Instant::now();

        budget.try_reserve(t0);
        budget.try_reserve(t0);
        assert_eq!(budget.remaining(t0), 3);
        assert_eq!(budget.remaining(t0 + DAY), 5);
    }

    #[test]
    fn call_ages_reports_oldest_first() {
        let budget = RateBudget::new(5, DAY);
        let t0 = Instant::now();

        budget.try_reserve(t0);
        budget.try_reserve(t0 + HOUR);

        let ages = budget.call_ages(t0 + 2 * HOUR);
        assert_eq!(ages, vec![2 * HOUR, HOUR]);
    }
}
