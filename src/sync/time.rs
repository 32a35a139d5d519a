use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// A [`Duration`] that can be read and updated atomically.
///
/// Timeouts exposed on the task handle are adjusted at runtime while the
/// worker task reads them on every operation, so they are stored as a
/// microsecond count in a single atomic word. Durations longer than
/// `u64::MAX` microseconds (over half a million years) are not representable
/// and are rejected on store.
pub(crate) struct AtomicDuration(AtomicU64);

impl AtomicDuration {
    pub(crate) fn new(duration: Duration) -> Self {
        Self(AtomicU64::new(Self::encode(duration)))
    }

    pub(crate) fn store(&self, duration: Duration, order: Ordering) {
        self.0.store(Self::encode(duration), order);
    }

    pub(crate) fn load(&self, order: Ordering) -> Duration {
        Duration::from_micros(self.0.load(order))
    }

    fn encode(duration: Duration) -> u64 {
        u64::try_from(duration.as_micros()).expect("duration out of range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load_round_trip() {
        let cell = AtomicDuration::new(Duration::from_secs(30));
        assert_eq!(cell.load(Ordering::Relaxed), Duration::from_secs(30));

        cell.store(Duration::from_millis(250), Ordering::Relaxed);
        assert_eq!(cell.load(Ordering::Relaxed), Duration::from_millis(250));

        cell.store(Duration::ZERO, Ordering::Release);
        assert_eq!(cell.load(Ordering::Acquire), Duration::ZERO);
    }

    #[test]
    fn test_sub_microsecond_precision_is_dropped() {
        let cell = AtomicDuration::new(Duration::from_nanos(1_500));
        assert_eq!(cell.load(Ordering::Relaxed), Duration::from_micros(1));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_duration_panics() {
        let _ = AtomicDuration::new(Duration::MAX);
    }
}
