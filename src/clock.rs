//! Time source for the engine.
//!
//! Everything that stamps a time on the wire (negotiate system time,
//! NTLM challenge timestamps, in-memory file times) asks an injected
//! [`Clock`] instead of calling `SystemTime::now()` directly, so tests can
//! pin or advance time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Windows FILETIME epoch offset from Unix epoch (100-ns intervals).
const FILETIME_UNIX_DIFF: u64 = 116_444_736_000_000_000;

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> SystemTime;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    nanos_since_epoch: AtomicU64,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        let nanos = start
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        ManualClock {
            nanos_since_epoch: AtomicU64::new(nanos),
        }
    }

    pub fn set(&self, t: SystemTime) {
        let nanos = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        self.nanos_since_epoch.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos_since_epoch
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.nanos_since_epoch.load(Ordering::SeqCst))
    }
}

/// Convert a `SystemTime` to a Windows FILETIME value. Times before the
/// Unix epoch clamp to it.
pub fn filetime(t: SystemTime) -> u64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_nanos() / 100) as u64 + FILETIME_UNIX_DIFF,
        Err(_) => FILETIME_UNIX_DIFF,
    }
}

/// Convert a FILETIME back to `SystemTime`. Values before the Unix epoch
/// are not representable here and yield `None`.
pub fn from_filetime(ft: u64) -> Option<SystemTime> {
    let intervals = ft.checked_sub(FILETIME_UNIX_DIFF)?;
    UNIX_EPOCH.checked_add(Duration::from_nanos(intervals.checked_mul(100)?))
}
