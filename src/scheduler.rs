//! Virtual-time timers for the access controller.
//!
//! Time is a `Duration` measured from the start of the session, so the same
//! scheduler runs under the real clock in the runtime and under a hand-driven
//! clock in tests. At most one timer of each kind is live.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Hard deadline of a confirmation window.
    ConfirmationTimeout,
    /// Visible once-per-interval countdown of a confirmation window.
    Countdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub id: TimerId,
    pub kind: TimerKind,
    /// Ticks left after this one; 0 on the last firing.
    pub remaining: u32,
    pub due: Duration,
}

#[derive(Debug, Clone)]
struct Timer {
    id: TimerId,
    kind: TimerKind,
    due: Duration,
    interval: Duration,
    remaining: u32,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    next_id: u64,
    timers: Vec<Timer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire once at `due`. Replaces any live timer of the same kind.
    pub fn start_once(&mut self, kind: TimerKind, due: Duration) -> TimerId {
        self.start_repeating(kind, due, Duration::ZERO, 0)
    }

    /// Fire at `first_due`, then every `interval`, `remaining + 1` times in
    /// total. Each firing reports how many are left. Replaces any live timer
    /// of the same kind.
    pub fn start_repeating(
        &mut self,
        kind: TimerKind,
        first_due: Duration,
        interval: Duration,
        remaining: u32,
    ) -> TimerId {
        self.cancel(kind);
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.timers.push(Timer {
            id,
            kind,
            due: first_due,
            interval,
            remaining,
        });
        id
    }

    /// Cancel the live timer of `kind`. Returns whether one was live;
    /// cancelling nothing is fine.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.kind != kind);
        self.timers.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        self.timers.iter().any(|t| t.kind == kind)
    }

    pub fn active_id(&self, kind: TimerKind) -> Option<TimerId> {
        self.timers.iter().find(|t| t.kind == kind).map(|t| t.id)
    }

    pub fn live(&self) -> usize {
        self.timers.len()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.iter().map(|t| t.due).min()
    }

    /// Pop the earliest timer due at or before `now`. Repeating timers are
    /// rescheduled until their last tick.
    pub fn pop_due(&mut self, now: Duration) -> Option<Fired> {
        let idx = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= now)
            .min_by_key(|(_, t)| (t.due, t.id))
            .map(|(i, _)| i)?;

        let timer = &mut self.timers[idx];
        let fired = Fired {
            id: timer.id,
            kind: timer.kind,
            remaining: timer.remaining,
            due: timer.due,
        };

        if timer.remaining == 0 {
            self.timers.swap_remove(idx);
        } else {
            timer.remaining -= 1;
            timer.due += timer.interval;
        }
        Some(fired)
    }
}
