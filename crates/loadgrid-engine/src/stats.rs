//! Request statistics with a sliding-window throughput estimate.
//!
//! Completions are bucketed by whole second since the tracker was created.
//! `current_rps` averages the completed seconds inside the window and
//! ignores the second still in progress, so a half-filled bucket never
//! reads as a throughput drop.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use loadgrid_core::EngineStats;

use crate::workload::RequestOutcome;

pub const DEFAULT_RPS_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct RequestStats {
    origin: Instant,
    window_secs: u64,
    /// (second index, completions in that second), oldest first.
    buckets: VecDeque<(u64, u64)>,
    total_requests: u64,
    total_failures: u64,
    total_response_ms: f64,
}

impl RequestStats {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(Instant::now(), window)
    }

    pub fn starting_at(origin: Instant, window: Duration) -> Self {
        Self {
            origin,
            window_secs: window.as_secs().max(1),
            buckets: VecDeque::new(),
            total_requests: 0,
            total_failures: 0,
            total_response_ms: 0.0,
        }
    }

    /// Record a completed request.
    pub fn record(&mut self, at: Instant, outcome: RequestOutcome) {
        let sec = self.second_of(at);
        match self.buckets.back_mut() {
            Some((s, count)) if *s == sec => *count += 1,
            _ => self.buckets.push_back((sec, 1)),
        }
        self.prune(sec);

        self.total_requests += 1;
        if !outcome.success {
            self.total_failures += 1;
        }
        self.total_response_ms += outcome.latency.as_secs_f64() * 1000.0;
    }

    /// Requests per second over the completed part of the window.
    pub fn current_rps(&self, now: Instant) -> f64 {
        let now_sec = self.second_of(now);
        let start = now_sec.saturating_sub(self.window_secs);
        let completed: u64 = self
            .buckets
            .iter()
            .filter(|(s, _)| *s >= start && *s < now_sec)
            .map(|(_, c)| c)
            .sum();
        let span = (now_sec - start).max(1);
        completed as f64 / span as f64
    }

    /// Mean response time in milliseconds since the tracker started.
    pub fn avg_response_time(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_response_ms / self.total_requests as f64
        }
    }

    pub fn snapshot(&self, now: Instant) -> EngineStats {
        EngineStats {
            current_rps: self.current_rps(now),
            avg_response_time: self.avg_response_time(),
            total_requests: self.total_requests,
            total_failures: self.total_failures,
        }
    }

    /// Forget everything and restart the clock at `now`.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::starting_at(now, Duration::from_secs(self.window_secs));
    }

    fn second_of(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_secs()
    }

    fn prune(&mut self, now_sec: u64) {
        let oldest = now_sec.saturating_sub(self.window_secs);
        while matches!(self.buckets.front(), Some((s, _)) if *s < oldest) {
            self.buckets.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(ms: u64) -> RequestOutcome {
        RequestOutcome {
            latency: Duration::from_millis(ms),
            success: true,
        }
    }

    #[test]
    fn empty_tracker_reads_zero() {
        let origin = Instant::now();
        let stats = RequestStats::starting_at(origin, DEFAULT_RPS_WINDOW);
        assert_eq!(stats.current_rps(origin + Duration::from_secs(5)), 0.0);
        assert_eq!(stats.avg_response_time(), 0.0);
    }

    #[test]
    fn rps_ignores_the_second_in_progress() {
        let origin = Instant::now();
        let mut stats = RequestStats::starting_at(origin, Duration::from_secs(10));

        // 10 requests in second 0, 20 in second 1.
        for _ in 0..10 {
            stats.record(origin + Duration::from_millis(100), ok(10));
        }
        for _ in 0..20 {
            stats.record(origin + Duration::from_millis(1500), ok(10));
        }

        // At 1.9s only second 0 is complete.
        assert_eq!(stats.current_rps(origin + Duration::from_millis(1900)), 10.0);
        // At 2.1s seconds 0 and 1 are complete: 30 over 2s.
        assert_eq!(stats.current_rps(origin + Duration::from_millis(2100)), 15.0);
    }

    #[test]
    fn rps_window_slides() {
        let origin = Instant::now();
        let mut stats = RequestStats::starting_at(origin, Duration::from_secs(2));

        for sec in 0..5u64 {
            for _ in 0..(sec + 1) * 10 {
                stats.record(origin + Duration::from_secs(sec), ok(1));
            }
        }
        // At second 5 the window covers seconds 3 and 4: (40 + 50) / 2.
        assert_eq!(stats.current_rps(origin + Duration::from_secs(5)), 45.0);
    }

    #[test]
    fn latency_and_failures_accumulate() {
        let origin = Instant::now();
        let mut stats = RequestStats::starting_at(origin, DEFAULT_RPS_WINDOW);
        stats.record(origin, ok(10));
        stats.record(origin, ok(30));
        stats.record(
            origin,
            RequestOutcome {
                latency: Duration::from_millis(50),
                success: false,
            },
        );

        let snap = stats.snapshot(origin);
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.total_failures, 1);
        assert!((snap.avg_response_time - 30.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_counters() {
        let origin = Instant::now();
        let mut stats = RequestStats::starting_at(origin, DEFAULT_RPS_WINDOW);
        stats.record(origin, ok(10));
        stats.reset(origin + Duration::from_secs(3));
        assert_eq!(stats.snapshot(origin + Duration::from_secs(4)).total_requests, 0);
    }
}
