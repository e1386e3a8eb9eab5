//! Clock synchronization.
//!
//! All server timestamps are integer microseconds of a monotonic clock
//! whose origin is the server's start; [`ServerClock`] produces them.
//!
//! Receivers estimate `offset = server_clock - local_audio_clock` (in
//! seconds) from four-timestamp exchanges: the receiver stamps T0 when
//! sending `player/time`, the server stamps T1 on arrival and T2 just
//! before replying `source/time`, and the receiver stamps T3 when the
//! reply arrives. One exchange yields the sample
//! `((T1 - T0) + (T2 - T3)) / 2`; [`OffsetFilter`] keeps a sliding
//! window of them and reports the median.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::msg::TimeInfo;

/// Maximum number of offset samples retained.
pub const WINDOW: usize = 50;
/// Below this many samples the receiver schedules burst exchanges.
pub const MIN_SAMPLES: usize = 20;
/// Delay before the next exchange while still filling the window.
pub const BURST_DELAY: Duration = Duration::from_millis(10);
/// Steady-state re-sampling interval.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Monotonic server clock with a fixed origin.
#[derive(Debug, Clone, Copy)]
pub struct ServerClock {
    origin: Instant,
}

impl ServerClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Microseconds elapsed since the clock's origin.
    pub fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding-window filter over clock offset samples.
///
/// Owned by the receiver for the lifetime of one connection; session
/// end does not clear it, only a reconnect (which builds a fresh
/// filter) does.
#[derive(Debug, Default)]
pub struct OffsetFilter {
    window: VecDeque<f64>,
}

impl OffsetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed exchange into the window and return the raw
    /// sample in seconds. `player_received` is the receiver's
    /// audio-clock stamp at reply arrival (T3), in microseconds.
    pub fn add_exchange(&mut self, reply: &TimeInfo, player_received: i64) -> f64 {
        let sample_us = ((reply.source_received - reply.player_transmitted)
            + (reply.source_transmitted - player_received)) as f64
            / 2.0;
        let sample = sample_us / 1_000_000.0;

        self.window.push_back(sample);
        while self.window.len() > WINDOW {
            self.window.pop_front();
        }
        sample
    }

    /// Current effective offset: the median of the window, or `None`
    /// while the window is empty.
    pub fn offset(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            Some(sorted[mid])
        } else {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        }
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// True while the window is too thin for a stable estimate, i.e.
    /// another exchange should follow after [`BURST_DELAY`].
    pub fn needs_burst(&self) -> bool {
        self.window.len() < MIN_SAMPLES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(t0: i64, t1: i64, t2: i64) -> TimeInfo {
        TimeInfo {
            player_transmitted: t0,
            source_received: t1,
            source_transmitted: t2,
        }
    }

    #[test]
    fn single_exchange_enters_window() {
        let mut filter = OffsetFilter::new();
        let sample =
            filter.add_exchange(&exchange(1_000_000, 1_050_000, 1_050_500), 1_100_000);

        // ((1 050 000 - 1 000 000) + (1 050 500 - 1 100 000)) / 2 us.
        assert!((sample - 0.000_25).abs() < 1e-9);
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.offset(), Some(sample));
    }

    #[test]
    fn negative_offset_when_server_is_behind() {
        let mut filter = OffsetFilter::new();
        let sample = filter.add_exchange(&exchange(2_000_000, 1_000_000, 1_000_100), 2_000_200);

        assert!(sample < -0.9);
        assert_eq!(filter.offset(), Some(sample));
    }

    #[test]
    fn median_resists_outliers() {
        let mut filter = OffsetFilter::new();
        for _ in 0..9 {
            filter.add_exchange(&exchange(0, 100, 100), 0);
        }
        // One wild sample from a delayed reply.
        filter.add_exchange(&exchange(0, 500_000, 500_000), 0);

        let offset = filter.offset().unwrap();
        assert!((offset - 0.000_1).abs() < 1e-9);
    }

    #[test]
    fn window_is_bounded() {
        let mut filter = OffsetFilter::new();
        for i in 0..200 {
            filter.add_exchange(&exchange(0, i, i), 0);
        }
        assert_eq!(filter.len(), WINDOW);
        // Oldest samples were evicted: every survivor is recent.
        assert!(filter.offset().unwrap() > 0.000_149);
    }

    #[test]
    fn burst_until_min_samples() {
        let mut filter = OffsetFilter::new();
        for _ in 0..MIN_SAMPLES - 1 {
            filter.add_exchange(&exchange(0, 0, 0), 0);
            assert!(filter.needs_burst());
        }
        filter.add_exchange(&exchange(0, 0, 0), 0);
        assert!(!filter.needs_burst());
    }

    #[test]
    fn server_clock_is_monotonic() {
        let clock = ServerClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
        assert!(a >= 0);
    }
}
