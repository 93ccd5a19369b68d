//! Pipeline health tracking with time-bounded blacklisting
//!
//! Tracks a tri-state health status per pipeline and suppresses
//! eligibility while a blacklist window is active, allowing failing
//! backends time to recover before traffic returns.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use plexus_config::BlacklistSettings;

use crate::events::HealthEvent;
use crate::outcome::AttemptOutcome;

/// Consecutive 429s before a pipeline is blacklisted
const FAILURE_THRESHOLD: u32 = 3;

/// Consecutive failures before a pipeline is marked degraded
const DEGRADED_THRESHOLD: u32 = 2;

/// Consecutive successes before a degraded pipeline recovers
const RECOVERY_THRESHOLD: u32 = 2;

/// Health status of one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

/// Blacklist windows applied on 429 streaks and fatal errors
#[derive(Debug, Clone)]
pub struct BlacklistWindows {
    pub window_429: Duration,
    pub window_error: Duration,
}

impl From<&BlacklistSettings> for BlacklistWindows {
    fn from(settings: &BlacklistSettings) -> Self {
        Self {
            window_429: Duration::from_millis(settings.timeout_429_ms),
            window_error: Duration::from_millis(settings.timeout_error_ms),
        }
    }
}

impl Default for BlacklistWindows {
    fn default() -> Self {
        Self::from(&BlacklistSettings::default())
    }
}

/// Cloned view of one pipeline's health
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub successes_in_row: u32,
    pub blacklisted_until: Option<Instant>,
    pub last_outcome: Option<AttemptOutcome>,
}

/// Track health for every pipeline in the table
#[derive(Debug)]
pub struct PipelineHealthTracker {
    pipelines: DashMap<String, HealthSnapshot>,
    windows: BlacklistWindows,
}

impl PipelineHealthTracker {
    pub fn new(windows: BlacklistWindows) -> Self {
        Self {
            pipelines: DashMap::new(),
            windows,
        }
    }

    /// Whether a pipeline may receive traffic
    ///
    /// Unhealthy pipelines become eligible again once their blacklist
    /// window has passed; the first request after expiry acts as the
    /// recovery probe, so the status drops to degraded rather than
    /// jumping straight to healthy.
    pub fn is_eligible(&self, pipeline_id: &str) -> bool {
        let Some(mut health) = self.pipelines.get_mut(pipeline_id) else {
            return true;
        };

        if health.status != HealthStatus::Unhealthy {
            return true;
        }

        match health.blacklisted_until {
            Some(until) if Instant::now() < until => false,
            _ => {
                health.status = HealthStatus::Degraded;
                health.blacklisted_until = None;
                true
            }
        }
    }

    /// Fold an attempt outcome into the pipeline's health
    ///
    /// Returns the events this transition produced, for the observer
    /// channel.
    pub fn record(&self, pipeline_id: &str, outcome: AttemptOutcome) -> Vec<HealthEvent> {
        let mut health = self.pipelines.entry(pipeline_id.to_owned()).or_default();
        let mut events = Vec::new();

        health.last_outcome = Some(outcome);

        match outcome {
            AttemptOutcome::Ok => {
                health.consecutive_failures = 0;
                health.successes_in_row += 1;
                if health.successes_in_row >= RECOVERY_THRESHOLD
                    && health.status != HealthStatus::Healthy
                {
                    health.status = HealthStatus::Healthy;
                    health.blacklisted_until = None;
                    events.push(HealthEvent::PipelineRecovered {
                        pipeline_id: pipeline_id.to_owned(),
                    });
                }
            }
            AttemptOutcome::RateLimited => {
                health.successes_in_row = 0;
                health.consecutive_failures += 1;
                if health.consecutive_failures >= FAILURE_THRESHOLD {
                    health.status = HealthStatus::Unhealthy;
                    health.blacklisted_until = Some(Instant::now() + self.windows.window_429);
                    events.push(HealthEvent::PipelineBlacklisted {
                        pipeline_id: pipeline_id.to_owned(),
                        outcome,
                        window_ms: self.windows.window_429.as_millis() as u64,
                    });
                } else if health.consecutive_failures >= DEGRADED_THRESHOLD {
                    health.status = HealthStatus::Degraded;
                }
            }
            AttemptOutcome::Timeout | AttemptOutcome::Transient => {
                health.successes_in_row = 0;
                health.consecutive_failures += 1;
                if health.consecutive_failures >= DEGRADED_THRESHOLD
                    && health.status == HealthStatus::Healthy
                {
                    health.status = HealthStatus::Degraded;
                    events.push(HealthEvent::PipelineDegraded {
                        pipeline_id: pipeline_id.to_owned(),
                    });
                }
            }
            AttemptOutcome::Fatal => {
                health.successes_in_row = 0;
                health.consecutive_failures += 1;
                health.status = HealthStatus::Unhealthy;
                health.blacklisted_until = Some(Instant::now() + self.windows.window_error);
                events.push(HealthEvent::PipelineBlacklisted {
                    pipeline_id: pipeline_id.to_owned(),
                    outcome,
                    window_ms: self.windows.window_error.as_millis() as u64,
                });
            }
        }

        drop(health);

        events
    }

    /// Cloned view of a pipeline's health; default when never recorded
    pub fn snapshot(&self, pipeline_id: &str) -> HealthSnapshot {
        self.pipelines
            .get(pipeline_id)
            .map_or_else(HealthSnapshot::default, |h| h.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PipelineHealthTracker {
        PipelineHealthTracker::new(BlacklistWindows {
            window_429: Duration::from_millis(50),
            window_error: Duration::from_millis(80),
        })
    }

    #[test]
    fn unknown_pipeline_is_eligible() {
        assert!(tracker().is_eligible("fresh"));
    }

    #[test]
    fn three_rate_limits_blacklist() {
        let tracker = tracker();
        tracker.record("p", AttemptOutcome::RateLimited);
        tracker.record("p", AttemptOutcome::RateLimited);
        assert!(tracker.is_eligible("p"));

        let events = tracker.record("p", AttemptOutcome::RateLimited);
        assert!(matches!(
            events.as_slice(),
            [HealthEvent::PipelineBlacklisted { .. }]
        ));
        assert!(!tracker.is_eligible("p"));
        assert_eq!(tracker.snapshot("p").status, HealthStatus::Unhealthy);
    }

    #[test]
    fn fatal_blacklists_immediately() {
        let tracker = tracker();
        let events = tracker.record("p", AttemptOutcome::Fatal);
        assert!(matches!(
            events.as_slice(),
            [HealthEvent::PipelineBlacklisted { .. }]
        ));
        assert!(!tracker.is_eligible("p"));
    }

    #[test]
    fn blacklist_expires_into_degraded_probe() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.record("p", AttemptOutcome::RateLimited);
        }
        assert!(!tracker.is_eligible("p"));

        std::thread::sleep(Duration::from_millis(60));
        assert!(tracker.is_eligible("p"));
        assert_eq!(tracker.snapshot("p").status, HealthStatus::Degraded);
    }

    #[test]
    fn two_successes_recover() {
        let tracker = tracker();
        tracker.record("p", AttemptOutcome::Transient);
        tracker.record("p", AttemptOutcome::Transient);
        assert_eq!(tracker.snapshot("p").status, HealthStatus::Degraded);

        tracker.record("p", AttemptOutcome::Ok);
        assert_eq!(tracker.snapshot("p").status, HealthStatus::Degraded);

        let events = tracker.record("p", AttemptOutcome::Ok);
        assert!(matches!(
            events.as_slice(),
            [HealthEvent::PipelineRecovered { .. }]
        ));
        assert_eq!(tracker.snapshot("p").status, HealthStatus::Healthy);
        assert_eq!(tracker.snapshot("p").consecutive_failures, 0);
    }

    #[test]
    fn transient_failures_degrade_not_blacklist() {
        let tracker = tracker();
        tracker.record("p", AttemptOutcome::Timeout);
        let events = tracker.record("p", AttemptOutcome::Timeout);
        assert!(matches!(
            events.as_slice(),
            [HealthEvent::PipelineDegraded { .. }]
        ));
        assert!(tracker.is_eligible("p"));
    }

    #[test]
    fn independent_pipelines() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.record("bad", AttemptOutcome::RateLimited);
        }
        assert!(!tracker.is_eligible("bad"));
        assert!(tracker.is_eligible("good"));
    }
}
