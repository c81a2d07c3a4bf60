//! In this module, we implement all the monitoring logic for the acquisition loop.
//! This includes counting samples the loop never saw (the counter jumped) as well
//! as various runtime stats, reported through tracing at a fixed interval.

use std::{
    fmt,
    time::{Duration, Instant},
};

use tracing::info;

use crate::capture::Tick;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Passes through the poll loop
    pub cycles: u64,
    /// Samples turned into records
    pub consumed: u64,
    /// Polls that saw no new sample
    pub stalled: u64,
    /// Samples the loop was too slow to see
    pub lost: u64,
    /// Times the counter went backwards
    pub discontinuities: u64,
    pub batches_sent: u64,
    pub send_failures: u64,
    /// Fields sent as the invalid sentinel
    pub invalid_values: u64,
}

impl Stats {
    pub fn record_tick(&mut self, tick: Tick) {
        match tick {
            Tick::Advanced => self.consumed += 1,
            Tick::Stalled => self.stalled += 1,
            Tick::Skipped(n) => self.lost += n as u64,
            Tick::Discontinuity => self.discontinuities += 1,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles={} consumed={} stalled={} lost={} discontinuities={} batches={} failures={} invalid={}",
            self.cycles,
            self.consumed,
            self.stalled,
            self.lost,
            self.discontinuities,
            self.batches_sent,
            self.send_failures,
            self.invalid_values
        )
    }
}

/// Logs a [`Stats`] snapshot plus rates every `interval`
pub struct Reporter {
    interval: Option<Duration>,
    start: Instant,
    last: Instant,
    last_stats: Stats,
    reports: u64,
}

impl Reporter {
    /// A zero interval disables periodic reports
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval: (!interval.is_zero()).then_some(interval),
            start: now,
            last: now,
            last_stats: Stats::default(),
            reports: 0,
        }
    }

    /// Report if the interval has passed. Returns whether a report was logged.
    pub fn maybe_report(&mut self, stats: &Stats) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        if elapsed < interval {
            return false;
        }
        let secs = elapsed.as_secs_f64();
        let sample_rate = (stats.consumed - self.last_stats.consumed) as f64 / secs;
        let lost = stats.lost - self.last_stats.lost;
        info!(
            sample_rate = format_args!("{sample_rate:.1}"),
            lost,
            failures = stats.send_failures - self.last_stats.send_failures,
            invalid = stats.invalid_values - self.last_stats.invalid_values,
            "Acquisition"
        );
        self.last = now;
        self.last_stats = *stats;
        self.reports += 1;
        true
    }

    /// Periodic reports logged so far
    pub fn reports(&self) -> u64 {
        self.reports
    }

    /// Totals since start, logged on shutdown
    pub fn summary(&self, stats: &Stats) {
        info!(
            runtime = format_args!("{:.1}s", self.start.elapsed().as_secs_f64()),
            "Acquisition stopped: {stats}"
        );
    }
}
