//! Per-session token, latency, and supervision cost accounting.
//!
//! One tracker is typically process-scoped and shared across agents;
//! every mutating method takes the write lock and readers copy before
//! returning, so no caller ever holds a reference into the map.

use parking_lot::RwLock;
use px_domain::chat::Usage;
use px_domain::config::ModelPricing;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accumulators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token/latency/cost subtotal for one model or one tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub calls: u64,
    pub cost: f64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
}

impl BucketCost {
    fn add(&mut self, usage: &Usage, cost: f64, latency_ms: u64) {
        self.input_tokens += usage.prompt_tokens as u64;
        self.output_tokens += usage.completion_tokens as u64;
        self.calls += 1;
        self.cost += cost;
        self.total_latency_ms += latency_ms;
        self.avg_latency_ms = self.total_latency_ms as f64 / self.calls as f64;
    }
}

/// Supervision sub-accumulator for one session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SupervisionStats {
    pub total_supervisions: u64,
    pub failed_validations: u64,
    pub fallback_used: u64,
    pub corrections: u64,
    pub total_cost: f64,
    pub estimated_savings: f64,
}

/// Everything tracked for one session key.
#[derive(Debug, Clone, Serialize)]
pub struct SessionCost {
    pub session_key: String,
    pub by_model: HashMap<String, BucketCost>,
    pub by_tier: HashMap<String, BucketCost>,
    pub total_cost: f64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub supervision: SupervisionStats,
}

impl SessionCost {
    fn new(session_key: &str) -> Self {
        let now = Utc::now();
        Self {
            session_key: session_key.to_owned(),
            by_model: HashMap::new(),
            by_tier: HashMap::new(),
            total_cost: 0.0,
            started_at: now,
            updated_at: now,
            supervision: SupervisionStats::default(),
        }
    }
}

/// One supervision outcome, recorded whichever way the supervised
/// route completed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisionRecord {
    pub success: bool,
    pub failed: bool,
    pub fallback_used: bool,
    pub corrections: u64,
    pub cost: f64,
    pub confidence: f64,
    pub estimated_savings: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-scoped cost tracker.
#[derive(Default)]
pub struct CostTracker {
    sessions: RwLock<HashMap<String, SessionCost>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed provider call.
    pub fn record(
        &self,
        session_key: &str,
        model: &str,
        tier: &str,
        pricing: &ModelPricing,
        usage: &Usage,
        latency: Duration,
    ) {
        let cost = pricing.estimate_cost(usage.prompt_tokens, usage.completion_tokens);
        let latency_ms = latency.as_millis() as u64;

        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session_key.to_owned())
            .or_insert_with(|| SessionCost::new(session_key));

        entry.by_model.entry(model.to_owned()).or_default().add(usage, cost, latency_ms);
        entry.by_tier.entry(tier.to_owned()).or_default().add(usage, cost, latency_ms);
        entry.total_cost += cost;
        entry.updated_at = Utc::now();

        tracing::debug!(
            session = session_key,
            model,
            tier,
            cost,
            latency_ms,
            "recorded llm call"
        );
    }

    /// Record one supervision outcome.
    pub fn record_supervision(&self, session_key: &str, rec: SupervisionRecord) {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session_key.to_owned())
            .or_insert_with(|| SessionCost::new(session_key));

        let stats = &mut entry.supervision;
        stats.total_supervisions += 1;
        if rec.failed {
            stats.failed_validations += 1;
        }
        if rec.fallback_used {
            stats.fallback_used += 1;
        }
        stats.corrections += rec.corrections;
        stats.total_cost += rec.cost;
        stats.estimated_savings += rec.estimated_savings;
        entry.updated_at = Utc::now();

        tracing::debug!(
            session = session_key,
            success = rec.success,
            confidence = rec.confidence,
            "recorded supervision"
        );
    }

    /// Deep copy of a session's accounting, if any.
    pub fn get_session(&self, session_key: &str) -> Option<SessionCost> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Grand total cost across all sessions.
    pub fn total(&self) -> f64 {
        self.sessions.read().values().map(|s| s.total_cost).sum()
    }

    /// Drop all accounting.
    pub fn reset(&self) {
        self.sessions.write().clear();
    }

    /// Human-readable cost report for one session.
    pub fn format_report(&self, session_key: &str) -> String {
        let sessions = self.sessions.read();
        let Some(s) = sessions.get(session_key) else {
            return format!("No cost data for session '{session_key}'");
        };

        let duration = (s.updated_at - s.started_at).num_seconds();
        let mut out = String::new();
        let _ = writeln!(out, "Cost report: {}", s.session_key);
        let _ = writeln!(out, "Duration: {duration}s    Total: ${:.4}", s.total_cost);

        let _ = writeln!(out, "\nBy Tier:");
        write_buckets(&mut out, &s.by_tier);
        let _ = writeln!(out, "\nBy Model:");
        write_buckets(&mut out, &s.by_model);

        if s.supervision.total_supervisions > 0 {
            let sup = &s.supervision;
            let _ = writeln!(
                out,
                "\nSupervision: {} runs, {} failed, {} corrections, cost ${:.4}, est. savings ${:.4}",
                sup.total_supervisions,
                sup.failed_validations,
                sup.corrections,
                sup.total_cost,
                sup.estimated_savings,
            );
        }
        out
    }
}

fn write_buckets(out: &mut String, buckets: &HashMap<String, BucketCost>) {
    let mut names: Vec<&String> = buckets.keys().collect();
    names.sort();
    for name in names {
        let b = &buckets[name];
        let _ = writeln!(
            out,
            "  {name}: {} calls, {} in / {} out, ${:.4}, avg {:.0}ms",
            b.calls, b.input_tokens, b.output_tokens, b.cost, b.avg_latency_ms,
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
