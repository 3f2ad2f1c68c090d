//! Prometheus Metrics
//!
//! Counters for the tiered read/write protocol and the command log,
//! registered once in the default registry and exposed by the binary's
//! `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

use crate::domain::TierKind;
use crate::error::{Error, Result};

/// Global metrics instance, initialized on first use
pub static METRICS: Lazy<Result<RollcallMetrics>> = Lazy::new(RollcallMetrics::new);

/// Container for all Rollcall metrics.
pub struct RollcallMetrics {
    /// Lookups answered by a tier - labels: tier
    pub tier_hits_total: IntCounterVec,

    /// Lookups a tier could not answer - labels: tier, reason (not_found/error)
    pub tier_misses_total: IntCounterVec,

    /// Faster-tier backfills after a genuine miss - labels: tier
    pub backfills_total: IntCounterVec,

    /// Mutations by outcome - labels: operation, outcome
    pub mutations_total: IntCounterVec,

    /// Cache restoration compensations - labels: outcome
    pub compensations_total: IntCounterVec,

    /// Command log submissions - labels: outcome
    pub replication_submits_total: IntCounterVec,

    /// Expired volatile keys removed by the sweeper
    pub swept_keys_total: IntCounter,
}

fn registration(name: &str, e: prometheus::Error) -> Error {
    Error::Internal(format!("Failed to register {}: {}", name, e))
}

impl RollcallMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> Result<Self> {
        Ok(Self {
            tier_hits_total: register_int_counter_vec!(
                "rollcall_tier_hits_total",
                "Lookups answered by each tier",
                &["tier"]
            )
            .map_err(|e| registration("tier_hits_total", e))?,

            tier_misses_total: register_int_counter_vec!(
                "rollcall_tier_misses_total",
                "Lookups a tier could not answer",
                &["tier", "reason"]
            )
            .map_err(|e| registration("tier_misses_total", e))?,

            backfills_total: register_int_counter_vec!(
                "rollcall_backfills_total",
                "Faster-tier backfills after a miss",
                &["tier"]
            )
            .map_err(|e| registration("backfills_total", e))?,

            mutations_total: register_int_counter_vec!(
                "rollcall_mutations_total",
                "Applied mutations by operation and outcome",
                &["operation", "outcome"]
            )
            .map_err(|e| registration("mutations_total", e))?,

            compensations_total: register_int_counter_vec!(
                "rollcall_compensations_total",
                "Cache restoration compensations",
                &["outcome"]
            )
            .map_err(|e| registration("compensations_total", e))?,

            replication_submits_total: register_int_counter_vec!(
                "rollcall_replication_submits_total",
                "Commands submitted to the replicated log",
                &["outcome"]
            )
            .map_err(|e| registration("replication_submits_total", e))?,

            swept_keys_total: register_int_counter!(
                "rollcall_swept_keys_total",
                "Expired volatile keys removed by the sweeper"
            )
            .map_err(|e| registration("swept_keys_total", e))?,
        })
    }
}

fn with_metrics(f: impl FnOnce(&RollcallMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

pub fn record_hit(tier: TierKind) {
    with_metrics(|m| m.tier_hits_total.with_label_values(&[tier.as_str()]).inc());
}

/// Record a tier that could not answer; `not_found` separates misses from faults.
pub fn record_miss(tier: TierKind, not_found: bool) {
    let reason = if not_found { "not_found" } else { "error" };
    with_metrics(|m| {
        m.tier_misses_total
            .with_label_values(&[tier.as_str(), reason])
            .inc()
    });
}

pub fn record_backfill(tier: TierKind) {
    with_metrics(|m| m.backfills_total.with_label_values(&[tier.as_str()]).inc());
}

pub fn record_mutation(operation: &str, ok: bool) {
    with_metrics(|m| {
        m.mutations_total
            .with_label_values(&[operation, outcome(ok)])
            .inc()
    });
}

pub fn record_compensation(ok: bool) {
    with_metrics(|m| m.compensations_total.with_label_values(&[outcome(ok)]).inc());
}

/// Record a submission; `outcome` is `ok`, `rejected` or `failed`.
pub fn record_submit(outcome: &str) {
    with_metrics(|m| {
        m.replication_submits_total
            .with_label_values(&[outcome])
            .inc()
    });
}

pub fn record_swept(removed: usize) {
    with_metrics(|m| m.swept_keys_total.inc_by(removed as u64));
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> std::result::Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e))?;
        assert!(!metrics.tier_hits_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_miss_labels() -> std::result::Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e))?;
        let before = metrics
            .tier_misses_total
            .with_label_values(&["cache", "error"])
            .get();

        record_miss(TierKind::Cache, false);

        let after = metrics
            .tier_misses_total
            .with_label_values(&["cache", "error"])
            .get();
        assert!(after > before);
        Ok(())
    }
}
