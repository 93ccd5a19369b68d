//! Per-provider API-key rotation, cooldown, and failure statistics
//!
//! One pool per provider; slots indexed by key index. Every mutation of
//! a slot happens under that slot's lock, so statistics are never lost;
//! the scorer reads cloned snapshots and may observe slightly stale
//! values, which is acceptable for best-effort scoring.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::outcome::AttemptOutcome;

/// Cooldown parameters applied on key-slot failures
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    /// Base cooldown after a 429; escalates by 1.5^consecutive_failures
    pub rate_limit_base: Duration,
    /// Upper bound on any cooldown
    pub max_cooldown: Duration,
    /// Base backoff after a timeout or transient error; doubles per failure
    pub failure_base: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            rate_limit_base: Duration::from_millis(1000),
            max_cooldown: Duration::from_secs(600),
            failure_base: Duration::from_millis(100),
        }
    }
}

/// Mutable state of one key slot
#[derive(Debug, Clone, Default)]
pub struct KeySnapshot {
    pub total_requests: u64,
    pub successes: u64,
    pub rate_limited: u64,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<Instant>,
    pub last_success: Option<Instant>,
    pub last_rate_limit: Option<Instant>,
    pub avg_response_ms: f64,
    pub in_use: u32,
}

impl KeySnapshot {
    /// Fraction of requests that succeeded; optimistic before any data
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.total_requests as f64
        }
    }
}

/// Rotating key pool for one provider
#[derive(Debug)]
pub struct KeyPool {
    provider: String,
    max_concurrent: u32,
    policy: CooldownPolicy,
    slots: Vec<Mutex<KeySnapshot>>,
}

impl KeyPool {
    pub fn new(provider: impl Into<String>, key_count: usize, max_concurrent: u32) -> Self {
        Self::with_policy(provider, key_count, max_concurrent, CooldownPolicy::default())
    }

    pub fn with_policy(
        provider: impl Into<String>,
        key_count: usize,
        max_concurrent: u32,
        policy: CooldownPolicy,
    ) -> Self {
        Self {
            provider: provider.into(),
            max_concurrent,
            policy,
            slots: (0..key_count).map(|_| Mutex::new(KeySnapshot::default())).collect(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether a slot can take another request right now
    ///
    /// Available iff the cooldown has expired and concurrency is below
    /// the per-key limit.
    pub fn available(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|slot| {
            let slot = slot.lock().expect("key slot lock poisoned");
            slot_available(&slot, self.max_concurrent, Instant::now())
        })
    }

    /// Reserve a slot, incrementing its concurrency count
    ///
    /// Refuses when the slot is cooling down or saturated. The returned
    /// lease must be completed with the attempt outcome; dropping it
    /// without completing releases the slot as a transient error, which
    /// covers cancellation.
    pub fn acquire(self: &Arc<Self>, index: usize) -> Option<KeyLease> {
        let slot = self.slots.get(index)?;
        let mut slot = slot.lock().expect("key slot lock poisoned");

        if !slot_available(&slot, self.max_concurrent, Instant::now()) {
            return None;
        }

        slot.in_use += 1;
        drop(slot);

        Some(KeyLease {
            pool: Arc::clone(self),
            index,
            completed: false,
        })
    }

    /// Cloned view of a slot's statistics
    pub fn snapshot(&self, index: usize) -> Option<KeySnapshot> {
        self.slots
            .get(index)
            .map(|slot| slot.lock().expect("key slot lock poisoned").clone())
    }

    /// Release a slot without recording an attempt
    ///
    /// For requests that failed before any outbound call was made.
    fn release_untracked(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            let mut slot = slot.lock().expect("key slot lock poisoned");
            slot.in_use = slot.in_use.saturating_sub(1);
        }
    }

    /// Release a slot and fold the attempt outcome into its statistics
    fn release(&self, index: usize, outcome: AttemptOutcome, elapsed: Option<Duration>) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        let mut slot = slot.lock().expect("key slot lock poisoned");
        let now = Instant::now();

        slot.in_use = slot.in_use.saturating_sub(1);
        slot.total_requests += 1;

        match outcome {
            AttemptOutcome::Ok => {
                slot.successes += 1;
                slot.consecutive_failures = 0;
                slot.last_success = Some(now);
                if let Some(elapsed) = elapsed {
                    let ms = elapsed.as_secs_f64() * 1000.0;
                    slot.avg_response_ms = if slot.avg_response_ms == 0.0 {
                        ms
                    } else {
                        slot.avg_response_ms.mul_add(0.9, ms * 0.1)
                    };
                }
            }
            AttemptOutcome::RateLimited => {
                slot.rate_limited += 1;
                slot.last_rate_limit = Some(now);
                // Escalate from the pre-increment failure count
                let factor = 1.5_f64.powi(slot.consecutive_failures.min(16) as i32);
                let cooldown = self
                    .policy
                    .rate_limit_base
                    .mul_f64(factor)
                    .min(self.policy.max_cooldown);
                slot.cooldown_until = Some(now + cooldown);
                slot.consecutive_failures += 1;
            }
            AttemptOutcome::Timeout | AttemptOutcome::Transient => {
                let backoff = self
                    .policy
                    .failure_base
                    .saturating_mul(1_u32 << slot.consecutive_failures.min(10))
                    .min(self.policy.max_cooldown);
                slot.cooldown_until = Some(now + backoff);
                slot.consecutive_failures += 1;
            }
            AttemptOutcome::Fatal => {
                // Pipeline-level blacklisting handles fatals; the slot
                // only counts the failure
                slot.consecutive_failures += 1;
            }
        }
    }
}

fn slot_available(slot: &KeySnapshot, max_concurrent: u32, now: Instant) -> bool {
    if slot.in_use >= max_concurrent {
        return false;
    }
    slot.cooldown_until.is_none_or(|until| now >= until)
}

/// Reservation of one key slot for one attempt
#[derive(Debug)]
pub struct KeyLease {
    pool: Arc<KeyPool>,
    index: usize,
    completed: bool,
}

impl KeyLease {
    pub const fn key_index(&self) -> usize {
        self.index
    }

    /// Release the slot with the attempt's outcome and duration
    pub fn complete(mut self, outcome: AttemptOutcome, elapsed: Option<Duration>) {
        self.completed = true;
        self.pool.release(self.index, outcome, elapsed);
    }

    /// Release the slot without touching statistics
    ///
    /// For requests rejected before reaching the server layer.
    pub fn abandon(mut self) {
        self.completed = true;
        self.pool.release_untracked(self.index);
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        if !self.completed {
            // Cancelled or panicked mid-flight; count as transient
            self.pool.release(self.index, AttemptOutcome::Transient, None);
        }
    }
}
