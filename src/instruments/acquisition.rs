//! Acquisition scheduling shared by the instruments: run state, the fixed
//! tick interval and the busy flag that drops re-entrant ticks.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    Running,
}

/// Fixed-interval tick source. When the caller falls behind, the missed
/// intervals are skipped rather than replayed.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    next_due: Option<Instant>,
    skipped: u64,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_micros(1)),
            next_due: None,
            skipped: 0,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// Intervals dropped so far because the caller polled late.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// True when a tick is due at `now`; at most one tick per call.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }
        let behind = now.duration_since(due).as_nanos() / self.interval.as_nanos();
        let behind = u64::try_from(behind).unwrap_or(u64::MAX);
        self.skipped = self.skipped.saturating_add(behind);
        let steps = u32::try_from(behind.saturating_add(1)).unwrap_or(u32::MAX);
        self.next_due = Some(due + self.interval.saturating_mul(steps));
        true
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new(TICK_INTERVAL)
    }
}

/// Busy flag for one instrument.
#[derive(Debug, Clone, Default)]
pub struct SoftLock {
    busy: Rc<Cell<bool>>,
    dropped: Rc<Cell<u64>>,
}

/// Held for the duration of a tick.
#[derive(Debug)]
pub struct SoftLockGuard {
    busy: Rc<Cell<bool>>,
}

impl Drop for SoftLockGuard {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}

impl SoftLock {
    pub fn try_acquire(&self) -> Option<SoftLockGuard> {
        if self.busy.replace(true) {
            self.dropped.set(self.dropped.get().saturating_add(1));
            return None;
        }
        Some(SoftLockGuard {
            busy: Rc::clone(&self.busy),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.dropped.get()
    }
}

/// Run state plus scheduling for one instrument.
#[derive(Debug, Clone, Default)]
pub struct Acquisition {
    state: AcquisitionState,
    ticker: Ticker,
    lock: SoftLock,
}

impl Acquisition {
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AcquisitionState::Running
    }

    pub fn start(&mut self, now: Instant) {
        if self.state == AcquisitionState::Idle {
            self.state = AcquisitionState::Running;
            self.ticker.start(now);
        }
    }

    pub fn stop(&mut self) {
        if self.state == AcquisitionState::Running {
            self.state = AcquisitionState::Idle;
            self.ticker.stop();
        }
    }

    /// Stops and reports whether it was running, for a later [`Self::resume`].
    pub fn pause(&mut self) -> bool {
        let was_running = self.is_running();
        self.stop();
        was_running
    }

    pub fn resume(&mut self, was_running: bool) {
        if was_running {
            self.start(Instant::now());
        }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        self.is_running() && self.ticker.poll(now)
    }

    pub fn lock(&self) -> &SoftLock {
        &self.lock
    }

    pub fn skipped_intervals(&self) -> u64 {
        self.ticker.skipped()
    }
}

/// A sink that acquires on ticks.
pub trait Instrument {
    fn name(&self) -> &'static str;
    fn acquisition(&self) -> &Acquisition;
    fn acquisition_mut(&mut self) -> &mut Acquisition;

    /// One acquisition; callers go through [`Instrument::single`] or
    /// [`Instrument::poll`] so the soft lock is honoured.
    fn acquire(&mut self);

    fn start(&mut self) {
        self.acquisition_mut().start(Instant::now());
        debug!("[{}] running", self.name());
    }

    fn stop(&mut self) {
        self.acquisition_mut().stop();
        debug!("[{}] stopped", self.name());
    }

    /// Runs one acquisition now, unless one is already in progress.
    fn single(&mut self) -> bool {
        let Some(_guard) = self.acquisition().lock().try_acquire() else {
            return false;
        };
        self.acquire();
        true
    }

    /// Runs an acquisition if the instrument is running and a tick is due.
    fn poll(&mut self, now: Instant) -> bool {
        if self.acquisition_mut().due(now) {
            self.single()
        } else {
            false
        }
    }
}
