//! Relative timestamps for delay detection
//!
//! A `TimeKeeper` stamps outgoing packets with milliseconds since the
//! session's first packet. A `TimeChecker` flags incoming packets whose
//! stamp lags the local clock by more than a threshold.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default tolerated lag before a packet counts as delayed
pub const DEFAULT_DELAY_THRESHOLD: Duration = Duration::from_millis(5000);

/// Largest time value put on the wire
const MAX_TIME: u64 = i32::MAX as u64;

/// Millisecond clock
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Monotonic clock based on `Instant`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Clock advanced by hand, for deterministic tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            millis: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Produces the time field of outgoing packets
pub trait TimeKeeper: Send {
    /// Time value for the next packet
    fn time(&mut self) -> u32;

    /// Forget the epoch
    fn reset(&mut self);
}

/// Judges the time field of incoming packets
pub trait TimeChecker: Send {
    /// Called with the time field of the peer's first packet (M1 or M2)
    fn report_first_time(&mut self, time: u32);

    /// Check if a packet stamped `time` arrived too late
    fn is_delayed(&mut self, time: u32) -> bool;

    /// Forget the epoch
    fn reset(&mut self);
}

/// Keeper that disables time tracking: every packet carries time 0
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTimeKeeper;

impl TimeKeeper for NullTimeKeeper {
    fn time(&mut self) -> u32 {
        0
    }

    fn reset(&mut self) {}
}

/// Checker that accepts every packet
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTimeChecker;

impl TimeChecker for NullTimeChecker {
    fn report_first_time(&mut self, _time: u32) {}

    fn is_delayed(&mut self, _time: u32) -> bool {
        false
    }

    fn reset(&mut self) {}
}

/// Keeper returning 1 for the first packet and elapsed milliseconds after
pub struct TypicalTimeKeeper {
    clock: Arc<dyn Clock>,
    epoch: Option<u64>,
}

impl TypicalTimeKeeper {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, epoch: None }
    }
}

impl Default for TypicalTimeKeeper {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

impl TimeKeeper for TypicalTimeKeeper {
    fn time(&mut self) -> u32 {
        let now = self.clock.now_millis();
        match self.epoch {
            None => {
                self.epoch = Some(now);
                1
            }
            // never fall back to 0 or 1 once the epoch is set
            Some(epoch) => now.saturating_sub(epoch).clamp(2, MAX_TIME) as u32,
        }
    }

    fn reset(&mut self) {
        self.epoch = None;
    }
}

impl fmt::Debug for TypicalTimeKeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypicalTimeKeeper")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Checker comparing packet times against the local clock
pub struct TypicalTimeChecker {
    clock: Arc<dyn Clock>,
    threshold: u64,
    epoch: Option<u64>,
}

impl TypicalTimeChecker {
    pub fn new(clock: Arc<dyn Clock>, threshold: Duration) -> Self {
        Self {
            clock,
            threshold: threshold.as_millis() as u64,
            epoch: None,
        }
    }
}

impl Default for TypicalTimeChecker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()), DEFAULT_DELAY_THRESHOLD)
    }
}

impl TimeChecker for TypicalTimeChecker {
    fn report_first_time(&mut self, time: u32) {
        if time == 1 {
            self.epoch = Some(self.clock.now_millis());
        }
    }

    fn is_delayed(&mut self, time: u32) -> bool {
        let Some(epoch) = self.epoch else {
            return false;
        };
        if time == 0 {
            return false;
        }

        let expected = self.clock.now_millis().saturating_sub(epoch);
        expected > u64::from(time) + self.threshold
    }

    fn reset(&mut self) {
        self.epoch = None;
    }
}

impl fmt::Debug for TypicalTimeChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypicalTimeChecker")
            .field("threshold", &self.threshold)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
