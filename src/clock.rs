use chrono::{DateTime, Utc};
use core::cell::Cell;
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embassy_time::Instant;
use portable_atomic::{AtomicBool, Ordering};

/// Process-wide wall clock, derived from device uptime plus an offset learned from a time server.
///
/// The offset can only ever be added to. Until an offset has been applied the clock has no wall
/// time at all, rather than reporting the epoch.
pub struct WallClock {
    /// Microseconds between device boot and the UNIX epoch, once known.
    offset: CriticalSectionMutex<Cell<Option<i64>>>,
    sync_attempted: AtomicBool,
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock {
    pub const fn new() -> Self {
        Self {
            offset: CriticalSectionMutex::new(Cell::new(None)),
            sync_attempted: AtomicBool::new(false),
        }
    }

    pub fn apply_offset(&self, delta_micros: i64) {
        self.offset.lock(|offset| {
            let current = offset.get().unwrap_or(0);
            offset.set(Some(current.saturating_add(delta_micros)));
        });
    }

    pub fn is_synced(&self) -> bool {
        self.offset.lock(|offset| offset.get().is_some())
    }

    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.at(Instant::now())
    }

    /// Wall time corresponding to a given uptime.
    pub fn at(&self, uptime: Instant) -> Option<DateTime<Utc>> {
        let offset = self.offset.lock(|offset| offset.get())?;
        let uptime = i64::try_from(uptime.as_micros()).ok()?;
        DateTime::from_timestamp_micros(uptime.checked_add(offset)?)
    }

    /// Records that time sync has finished, whether or not it succeeded.
    pub fn mark_sync_attempted(&self) {
        self.sync_attempted.store(true, Ordering::Release);
    }

    pub fn sync_attempted(&self) -> bool {
        self.sync_attempted.load(Ordering::Acquire)
    }
}
