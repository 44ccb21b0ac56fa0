//! Provides the counters and averages which describe the behaviour of a lookaside stage.
//!
//! All types in here are internally mutable via atomics, so that they can be shared by all
//! concurrent invocations of a route without any locking.
//!
//! # Example
//!
//! ```
//! # use lookaside::stats::Average;
//! let avg = Average::new();
//! avg.add(10);
//! avg.add(20);
//! avg.add(30);
//!
//! assert_eq!(avg.avg(), 20);
//! assert_eq!(avg.count(), 3);
//! ```
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::fmt::format_micros;

/// Limits the number of samples which make up the sliding window of an [Average].
const WINDOW_SIZE: u32 = 100;

/// Computes a sliding average of a series of values (usually durations in microseconds).
///
/// The sum and the number of samples of the window are packed into a single u64 so that both
/// can be updated atomically. Once the window is full (or the sum would overflow), both are
/// halved, which keeps a decaying average of the most recent values.
#[derive(Default)]
pub struct Average {
    window: AtomicU64,
    count: AtomicU64,
}

impl Average {
    /// Creates a new and empty average.
    pub fn new() -> Average {
        Average::default()
    }

    fn unpack(window: u64) -> (u32, u32) {
        ((window >> 32) as u32, (window & 0xFFFF_FFFF) as u32)
    }

    fn pack(sum: u32, samples: u32) -> u64 {
        ((sum as u64) << 32) | samples as u64
    }

    /// Records another value.
    ///
    /// Negative values are treated as zero.
    pub fn add(&self, value: i32) {
        let value = value.max(0) as u32;
        let _ = self.count.fetch_add(1, Ordering::Relaxed);

        let _ = self
            .window
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |window| {
                let (mut sum, mut samples) = Average::unpack(window);
                while samples >= WINDOW_SIZE || sum as u64 + value as u64 > i32::MAX as u64 {
                    sum = (sum as u64 * (samples / 2) as u64 / samples.max(1) as u64) as u32;
                    samples /= 2;
                }

                Some(Average::pack(sum + value, samples + 1))
            });
    }

    /// Records the given duration in microseconds.
    pub fn add_duration(&self, duration: Duration) {
        self.add(duration.as_micros().min(i32::MAX as u128) as i32);
    }

    /// Returns the total number of recorded values.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns the average of the current window.
    pub fn avg(&self) -> i32 {
        match Average::unpack(self.window.load(Ordering::Relaxed)) {
            (_, 0) => 0,
            (sum, samples) => (sum / samples) as i32,
        }
    }
}

impl Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_micros(self.avg(), f)?;
        write!(f, " ({})", self.count())
    }
}

/// A simple monotonic counter.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increments the counter by one.
    pub fn inc(&self) {
        let _ = self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Collects the metrics of a lookaside stage.
///
/// An instance is shared (via **Arc**) between the stage itself and its background write-back
/// tasks. Several stages may also report into the same instance.
#[derive(Default)]
pub struct LookasideStats {
    /// Counts all routed requests.
    pub requests: Counter,
    /// Counts the requests which were considered as cache candidates.
    pub candidates: Counter,
    /// Counts the requests which were answered from the cache.
    pub hits: Counter,
    /// Counts the candidates which had to be forwarded to the child route.
    pub misses: Counter,
    /// Counts the hot misses observed while retrying a lease.
    pub hot_misses: Counter,
    /// Counts the leases which were obtained by this stage.
    pub owned_leases: Counter,
    /// Counts the lease loops which ran out of retries.
    pub exhausted_leases: Counter,
    /// Counts the scheduled write-backs.
    pub write_backs: Counter,
    /// Counts the write-backs which failed or were rejected by the cache tier.
    pub write_back_failures: Counter,
    /// Counts failed round-trips to the cache tier during lookups.
    pub cache_errors: Counter,
    /// Counts cached entries which couldn't be decoded.
    pub codec_errors: Counter,
    /// Tracks the duration of cache lookups (including all lease retries).
    pub lookup_duration: Average,
}

impl LookasideStats {
    /// Creates a new set of zeroed metrics.
    pub fn new() -> Self {
        LookasideStats::default()
    }

    /// Returns the share of candidates which were answered from the cache in percent.
    pub fn hit_rate(&self) -> f32 {
        match self.candidates.get() {
            0 => 0.,
            n => self.hits.get() as f32 / n as f32 * 100.,
        }
    }
}

impl Display for LookasideStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Requests:            {}", self.requests)?;
        writeln!(f, "Candidates:          {}", self.candidates)?;
        writeln!(
            f,
            "Hits:                {} ({:.1} %)",
            self.hits,
            self.hit_rate()
        )?;
        writeln!(f, "Misses:              {}", self.misses)?;
        writeln!(f, "Hot Misses:          {}", self.hot_misses)?;
        writeln!(f, "Owned Leases:        {}", self.owned_leases)?;
        writeln!(f, "Exhausted Leases:    {}", self.exhausted_leases)?;
        writeln!(f, "Write-Backs:         {}", self.write_backs)?;
        writeln!(f, "Write-Back Failures: {}", self.write_back_failures)?;
        writeln!(f, "Cache Errors:        {}", self.cache_errors)?;
        writeln!(f, "Codec Errors:        {}", self.codec_errors)?;
        writeln!(f, "Lookup Duration:     {}", self.lookup_duration)
    }
}

#[cfg(test)]
mod tests {
    use crate::stats::{Average, LookasideStats};
    use std::time::Duration;

    #[test]
    fn empty_average_is_zero() {
        let avg = Average::new();
        assert_eq!(avg.avg(), 0);
        assert_eq!(avg.count(), 0);
        assert_eq!(format!("{}", avg), "0 us (0)");
    }

    #[test]
    fn average_of_some_values_works() {
        let avg = Average::new();
        for value in 1..=10 {
            avg.add(value);
        }
        assert_eq!(avg.avg(), 5);
        assert_eq!(avg.count(), 10);
    }

    #[test]
    fn average_follows_recent_values() {
        let avg = Average::new();
        for _ in 0..1000 {
            avg.add(10);
        }
        for _ in 0..1000 {
            avg.add(1000);
        }

        // The old values have decayed out of the window...
        assert_eq!(avg.avg() > 900, true);
        assert_eq!(avg.count(), 2000);
    }

    #[test]
    fn average_survives_huge_values() {
        let avg = Average::new();
        avg.add(i32::MAX);
        avg.add(i32::MAX);
        assert_eq!(avg.avg(), i32::MAX);

        avg.add(-5);
        assert_eq!(avg.count(), 3);
        assert_eq!(avg.avg() <= i32::MAX / 2, true);
    }

    #[test]
    fn durations_are_recorded_in_micros() {
        let avg = Average::new();
        avg.add_duration(Duration::from_millis(10));
        assert_eq!(format!("{}", avg), "10.0 ms (1)");
    }

    #[test]
    fn hit_rate_is_computed_from_candidates() {
        let stats = LookasideStats::new();
        assert_eq!(stats.hit_rate(), 0.);

        stats.candidates.inc();
        stats.candidates.inc();
        stats.candidates.inc();
        stats.candidates.inc();
        stats.hits.inc();

        assert_eq!(stats.hit_rate().round() as i32, 25);
        assert_eq!(format!("{}", stats).contains("Hits:                1 (25.0 %)"), true);
    }
}
