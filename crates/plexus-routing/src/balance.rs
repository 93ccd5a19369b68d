//! Pipeline selection and feedback recording
//!
//! Walks a category's candidate list in table order, skipping pipelines
//! that are blacklisted or whose key slot is cooling down or saturated,
//! and scores the rest. When the whole category is ineligible, a
//! cross-category rescue pass runs over every pipeline in the table; it
//! never overrides a working in-category candidate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use plexus_core::{Category, RequestPriority};

use crate::error::RoutingError;
use crate::events::{HealthEvent, HealthEventSender};
use crate::health::{BlacklistWindows, HealthSnapshot, PipelineHealthTracker};
use crate::keypool::{CooldownPolicy, KeyLease, KeyPool, KeySnapshot};
use crate::outcome::AttemptOutcome;
use crate::table::{PipelineConfig, RoutingTable};

/// Candidates within this many score points of the best are equivalent
const SCORE_EPSILON: f64 = 1.0;

/// Sliding window over which a 429 keeps penalizing a key slot
const RATE_LIMIT_PENALTY_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Picks pipelines and folds attempt outcomes back into their state
#[derive(Debug)]
pub struct LoadBalancer {
    health: PipelineHealthTracker,
    pools: HashMap<String, Arc<KeyPool>>,
    events: Option<HealthEventSender>,
}

impl LoadBalancer {
    /// Build balancer state for a freshly assembled table
    ///
    /// One key pool per provider, sized to the widest key index the
    /// table references.
    pub fn from_table(
        table: &RoutingTable,
        windows: BlacklistWindows,
        events: Option<HealthEventSender>,
    ) -> Self {
        let mut pool_sizes: HashMap<&str, (usize, u32)> = HashMap::new();
        for pipeline in table.pipelines() {
            let entry = pool_sizes
                .entry(pipeline.provider.as_str())
                .or_insert((0, pipeline.max_concurrent));
            entry.0 = entry.0.max(pipeline.key_index + 1);
        }

        let pools = pool_sizes
            .into_iter()
            .map(|(provider, (key_count, max_concurrent))| {
                (
                    provider.to_owned(),
                    Arc::new(KeyPool::with_policy(
                        provider,
                        key_count,
                        max_concurrent,
                        CooldownPolicy::default(),
                    )),
                )
            })
            .collect();

        Self {
            health: PipelineHealthTracker::new(windows),
            pools,
            events,
        }
    }

    /// Choose one pipeline for a category
    ///
    /// Returns the id of the best eligible candidate, consulting the
    /// global pool only when the entire category is ineligible.
    pub fn pick(
        &self,
        table: &RoutingTable,
        category: Category,
        priority: RequestPriority,
    ) -> Result<String, RoutingError> {
        let candidates = table.candidates(category);

        if let Some(id) = self.best_eligible(table, candidates.iter().map(String::as_str), priority)
        {
            return Ok(id);
        }

        // Whole category is down; try the cross-category rescue pool
        self.send(HealthEvent::CategoryExhausted { category });
        if let Some(id) = self.best_eligible(table, table.global_pool(), priority) {
            tracing::warn!(
                category = %category,
                pipeline = %id,
                "category exhausted, rescued via global pool"
            );
            return Ok(id);
        }

        Err(RoutingError::NoEligiblePipeline { category })
    }

    /// Reserve the chosen pipeline's key slot
    ///
    /// Can fail despite a successful pick when a concurrent request
    /// saturates the slot in between; the caller treats that like an
    /// ineligible pick.
    pub fn acquire(&self, pipeline: &PipelineConfig) -> Option<KeyLease> {
        self.pools.get(&pipeline.provider)?.acquire(pipeline.key_index)
    }

    /// Fold an attempt outcome into pipeline health and publish events
    ///
    /// Key-slot statistics are updated separately when the lease
    /// completes.
    pub fn record(&self, pipeline: &PipelineConfig, outcome: AttemptOutcome) {
        for event in self.health.record(&pipeline.id, outcome) {
            self.send(event);
        }
    }

    /// Note a failed pick so the one permitted re-pick is observable
    pub fn advise_exhausted(&self, category: Category) {
        tracing::warn!(category = %category, "no eligible pipeline on first pick");
        self.send(HealthEvent::CategoryExhausted { category });
    }

    /// Health view for diagnostics
    pub fn health_snapshot(&self, pipeline_id: &str) -> HealthSnapshot {
        self.health.snapshot(pipeline_id)
    }

    /// Key-slot view for diagnostics
    pub fn key_snapshot(&self, provider: &str, key_index: usize) -> Option<KeySnapshot> {
        self.pools.get(provider)?.snapshot(key_index)
    }

    fn send(&self, event: HealthEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    /// Score every eligible candidate and select per the ε rule
    ///
    /// Returns the earliest candidate whose score is within ε of the
    /// best, preserving table-order preference among near-equals.
    fn best_eligible<'a>(
        &self,
        table: &RoutingTable,
        candidates: impl Iterator<Item = &'a str>,
        priority: RequestPriority,
    ) -> Option<String> {
        let now = Instant::now();
        let mut scored: Vec<(&str, f64)> = Vec::new();
        let mut max_weight = 0;

        let configs: Vec<&PipelineConfig> = candidates
            .filter_map(|id| table.pipeline(id))
            .inspect(|p| max_weight = max_weight.max(p.weight))
            .collect();

        for (rank, config) in configs.iter().enumerate() {
            if !self.health.is_eligible(&config.id) {
                continue;
            }
            let Some(pool) = self.pools.get(&config.provider) else {
                continue;
            };
            if !pool.available(config.key_index) {
                continue;
            }
            let Some(snapshot) = pool.snapshot(config.key_index) else {
                continue;
            };

            let is_primary = config.weight == max_weight;
            scored.push((
                config.id.as_str(),
                score_candidate(rank, is_primary, &snapshot, priority, now),
            ));
        }

        let best = scored
            .iter()
            .map(|&(_, score)| score)
            .fold(f64::INFINITY, f64::min);

        scored
            .iter()
            .find(|&&(_, score)| score <= best + SCORE_EPSILON)
            .map(|&(id, _)| id.to_owned())
    }
}

/// Score one candidate; lower is better
///
/// Base priority follows candidate rank, then observed key-slot quality:
/// failure rate, recent rate limits (decaying over 30 minutes),
/// consecutive failures, and average latency. Request priority shifts
/// load toward primary slots (high) or backup slots (low).
pub fn score_candidate(
    rank: usize,
    is_primary: bool,
    snapshot: &KeySnapshot,
    priority: RequestPriority,
    now: Instant,
) -> f64 {
    let base = rank as f64 * 10.0;
    let mut score = base
        + (1.0 - snapshot.success_rate()) * 100.0
        + rate_limit_penalty(snapshot.last_rate_limit, now)
        + f64::from(snapshot.consecutive_failures) * 5.0
        + snapshot.avg_response_ms / 100.0;

    match priority {
        RequestPriority::High if is_primary => score *= 0.5,
        RequestPriority::Low if !is_primary => score *= 0.8,
        _ => {}
    }

    score
}

/// 0…30 penalty decaying linearly since the last rate limit
fn rate_limit_penalty(last_rate_limit: Option<Instant>, now: Instant) -> f64 {
    let Some(last) = last_rate_limit else {
        return 0.0;
    };
    let elapsed = now.saturating_duration_since(last);
    if elapsed >= RATE_LIMIT_PENALTY_WINDOW {
        return 0.0;
    }
    30.0 * (1.0 - elapsed.as_secs_f64() / RATE_LIMIT_PENALTY_WINDOW.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use plexus_config::{SystemConfig, UserConfig};

    use super::*;
    use crate::assemble::assemble;

    fn table(toml_text: &str) -> RoutingTable {
        let user: UserConfig = toml::from_str(toml_text).unwrap();
        assemble(&user, &SystemConfig::builtin()).unwrap()
    }

    fn two_pipeline_table() -> RoutingTable {
        table(
            r#"
            [[providers]]
            name = "alpha"
            api_base_url = "http://alpha/v1"
            api_key = "ka"
            models = ["m"]
            weight = 5

            [[providers]]
            name = "beta"
            api_base_url = "http://beta/v1"
            api_key = "kb"
            models = ["m"]

            [router]
            default = "alpha,m;beta,m"
            "#,
        )
    }

    fn balancer(table: &RoutingTable) -> LoadBalancer {
        LoadBalancer::from_table(
            table,
            BlacklistWindows {
                window_429: Duration::from_millis(50),
                window_error: Duration::from_millis(50),
            },
            None,
        )
    }

    #[test]
    fn picks_first_candidate_when_all_healthy() {
        let table = two_pipeline_table();
        let lb = balancer(&table);

        let picked = lb
            .pick(&table, Category::Default, RequestPriority::Normal)
            .unwrap();
        assert_eq!(picked, "alpha-m-key0");
    }

    #[test]
    fn skips_blacklisted_pipeline() {
        let table = two_pipeline_table();
        let lb = balancer(&table);
        let alpha = table.pipeline("alpha-m-key0").unwrap();

        for _ in 0..3 {
            lb.record(alpha, AttemptOutcome::RateLimited);
        }

        let picked = lb
            .pick(&table, Category::Default, RequestPriority::Normal)
            .unwrap();
        assert_eq!(picked, "beta-m-key0");
    }

    #[test]
    fn skips_saturated_key_slot() {
        let table = table(
            r#"
            [[providers]]
            name = "alpha"
            api_base_url = "http://alpha/v1"
            api_key = "ka"
            models = ["m"]
            maxConcurrent = 1

            [[providers]]
            name = "beta"
            api_base_url = "http://beta/v1"
            api_key = "kb"
            models = ["m"]

            [router]
            default = "alpha,m;beta,m"
            "#,
        );
        let lb = balancer(&table);
        let alpha = table.pipeline("alpha-m-key0").unwrap();

        let _lease = lb.acquire(alpha).unwrap();

        let picked = lb
            .pick(&table, Category::Default, RequestPriority::Normal)
            .unwrap();
        assert_eq!(picked, "beta-m-key0");
    }

    #[test]
    fn no_eligible_pipeline_when_everything_is_down() {
        let table = table(
            r#"
            [[providers]]
            name = "solo"
            api_base_url = "http://solo/v1"
            api_key = "k"
            models = ["m"]

            [router]
            default = "solo,m"
            "#,
        );
        let lb = balancer(&table);
        let solo = table.pipeline("solo-m-key0").unwrap();

        for _ in 0..3 {
            lb.record(solo, AttemptOutcome::RateLimited);
        }

        let err = lb
            .pick(&table, Category::Default, RequestPriority::Normal)
            .unwrap_err();
        assert!(matches!(err, RoutingError::NoEligiblePipeline { .. }));
    }

    #[test]
    fn rescues_from_global_pool_when_category_exhausted() {
        let table = table(
            r#"
            [[providers]]
            name = "coder"
            api_base_url = "http://coder/v1"
            api_key = "k"
            models = ["m"]

            [[providers]]
            name = "fallback"
            api_base_url = "http://fallback/v1"
            api_key = "k"
            models = ["m"]

            [router]
            default = "fallback,m"
            coding = "coder,m"
            "#,
        );
        let lb = balancer(&table);
        let coder = table.pipeline("coder-m-key0").unwrap();

        lb.record(coder, AttemptOutcome::Fatal);

        let picked = lb
            .pick(&table, Category::Coding, RequestPriority::Normal)
            .unwrap();
        assert_eq!(picked, "fallback-m-key0");
    }

    #[test]
    fn rescue_never_overrides_working_candidate() {
        let table = table(
            r#"
            [[providers]]
            name = "coder"
            api_base_url = "http://coder/v1"
            api_key = "k"
            models = ["m"]

            [[providers]]
            name = "other"
            api_base_url = "http://other/v1"
            api_key = "k"
            models = ["m"]

            [router]
            default = "other,m"
            coding = "coder,m"
            "#,
        );
        let lb = balancer(&table);

        // Degrade but do not blacklist the in-category candidate
        let coder = table.pipeline("coder-m-key0").unwrap();
        lb.record(coder, AttemptOutcome::Transient);
        lb.record(coder, AttemptOutcome::Transient);

        let picked = lb
            .pick(&table, Category::Coding, RequestPriority::Normal)
            .unwrap();
        assert_eq!(picked, "coder-m-key0");
    }

    #[test]
    fn blacklist_expiry_allows_recovery() {
        let table = two_pipeline_table();
        let lb = balancer(&table);
        let alpha = table.pipeline("alpha-m-key0").unwrap();

        for _ in 0..3 {
            lb.record(alpha, AttemptOutcome::RateLimited);
        }
        assert_ne!(
            lb.pick(&table, Category::Default, RequestPriority::Normal)
                .unwrap(),
            "alpha-m-key0"
        );

        std::thread::sleep(Duration::from_millis(60));
        lb.record(alpha, AttemptOutcome::Ok);
        lb.record(alpha, AttemptOutcome::Ok);
        assert_eq!(lb.health_snapshot("alpha-m-key0").consecutive_failures, 0);
    }

    mod scoring {
        use super::*;

        #[test]
        fn failures_worsen_score() {
            let now = Instant::now();
            let clean = KeySnapshot::default();
            let failing = KeySnapshot {
                consecutive_failures: 3,
                ..KeySnapshot::default()
            };

            let good = score_candidate(0, true, &clean, RequestPriority::Normal, now);
            let bad = score_candidate(0, true, &failing, RequestPriority::Normal, now);
            assert!(bad > good);
            assert!((bad - good - 15.0).abs() < f64::EPSILON);
        }

        #[test]
        fn low_success_rate_dominates() {
            let now = Instant::now();
            let flaky = KeySnapshot {
                total_requests: 10,
                successes: 5,
                ..KeySnapshot::default()
            };
            let score = score_candidate(0, true, &flaky, RequestPriority::Normal, now);
            assert!((score - 50.0).abs() < f64::EPSILON);
        }

        #[test]
        fn recent_rate_limit_penalizes_and_decays() {
            let now = Instant::now();
            let just_limited = KeySnapshot {
                last_rate_limit: Some(now),
                ..KeySnapshot::default()
            };
            let fresh = score_candidate(0, true, &just_limited, RequestPriority::Normal, now);
            assert!((fresh - 30.0).abs() < 0.01);

            let long_ago = KeySnapshot {
                last_rate_limit: Some(now - Duration::from_secs(31 * 60)),
                ..KeySnapshot::default()
            };
            let decayed = score_candidate(0, true, &long_ago, RequestPriority::Normal, now);
            assert!(decayed.abs() < f64::EPSILON);
        }

        #[test]
        fn high_priority_halves_primary_score() {
            let now = Instant::now();
            let snapshot = KeySnapshot {
                avg_response_ms: 2000.0,
                ..KeySnapshot::default()
            };
            let normal = score_candidate(1, true, &snapshot, RequestPriority::Normal, now);
            let high = score_candidate(1, true, &snapshot, RequestPriority::High, now);
            assert!((high - normal * 0.5).abs() < f64::EPSILON);
        }

        #[test]
        fn low_priority_discounts_backups() {
            let now = Instant::now();
            let snapshot = KeySnapshot {
                avg_response_ms: 1000.0,
                ..KeySnapshot::default()
            };
            let normal = score_candidate(2, false, &snapshot, RequestPriority::Normal, now);
            let low = score_candidate(2, false, &snapshot, RequestPriority::Low, now);
            assert!((low - normal * 0.8).abs() < f64::EPSILON);
        }
    }
}
