//! Tiered model router.
//!
//! Resolves a classified task to a named tier, the tier to a model, and
//! the model to a provider; then performs the exchange and records the
//! cost. Pure resolution is split out so it stays trivially testable.

use crate::cost::CostTracker;
use crate::registry::ProviderRegistry;
use crate::traits::ChatRequest;
use px_domain::chat::LlmResponse;
use px_domain::config::{RoutingConfig, TierConfig};
use px_domain::error::{Error, Result};
use px_domain::event::AgentEvent;
use px_domain::task::TaskType;
use std::sync::Arc;
use std::time::Instant;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A completed routed exchange.
#[derive(Debug, Clone)]
pub struct Routed {
    pub response: LlmResponse,
    pub tier: String,
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TierRouter {
    routing: RoutingConfig,
    registry: Arc<ProviderRegistry>,
    costs: Arc<CostTracker>,
}

impl TierRouter {
    pub fn new(
        routing: RoutingConfig,
        registry: Arc<ProviderRegistry>,
        costs: Arc<CostTracker>,
    ) -> Self {
        Self {
            routing,
            registry,
            costs,
        }
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    /// Look up a tier by name.
    pub fn tier(&self, name: &str) -> Option<&TierConfig> {
        self.routing.tiers.get(name)
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// Resolve the tier for a task.
    ///
    /// Routing disabled always yields the default tier. Otherwise the
    /// first tier claiming the task label wins, falling back to the
    /// default tier; a missing default is a config error.
    pub fn resolve_tier(&self, task: TaskType) -> Result<(&str, &TierConfig)> {
        if self.routing.enabled {
            let label = task.label();
            for (name, tier) in &self.routing.tiers {
                if tier.claims(label) {
                    return Ok((name.as_str(), tier));
                }
            }
        }

        let default = &self.routing.default_tier;
        self.routing
            .tiers
            .get(default)
            .map(|t| (default.as_str(), t))
            .ok_or_else(|| {
                Error::Config(format!(
                    "no tier claims task '{task}' and default tier '{default}' is not configured"
                ))
            })
    }

    // ── Routed chat ────────────────────────────────────────────────

    /// Route one exchange: resolve tier → provider, call, record cost.
    pub async fn route_chat(
        &self,
        session_key: &str,
        task: TaskType,
        req: &ChatRequest,
    ) -> Result<Routed> {
        let (tier_name, _) = self.resolve_tier(task)?;
        let tier_name = tier_name.to_owned();
        self.route_chat_tier(session_key, task, &tier_name, req).await
    }

    /// Route one exchange to a specific named tier (the supervisor call
    /// targets its configured tier directly).
    pub(crate) async fn route_chat_tier(
        &self,
        session_key: &str,
        task: TaskType,
        tier_name: &str,
        req: &ChatRequest,
    ) -> Result<Routed> {
        let tier_cfg = self
            .tier(tier_name)
            .ok_or_else(|| Error::Config(format!("tier '{tier_name}' is not configured")))?;
        let provider = self.registry.get(&tier_cfg.model)?;

        AgentEvent::RoutingDecision {
            session_key: session_key.to_owned(),
            task: task.label().to_owned(),
            tier: tier_name.to_owned(),
            model: tier_cfg.model.clone(),
        }
        .emit();

        let mut routed_req = req.clone();
        routed_req.model = Some(tier_cfg.model.clone());

        let start = Instant::now();
        let response = provider.chat(&routed_req).await.map_err(|e| {
            tracing::warn!(
                session = session_key,
                tier = tier_name,
                model = %tier_cfg.model,
                error = %e,
                "routed chat failed"
            );
            e
        })?;
        let latency = start.elapsed();

        self.costs.record(
            session_key,
            &tier_cfg.model,
            tier_name,
            &tier_cfg.cost_per_1m,
            &response.usage,
            latency,
        );

        Ok(Routed {
            response,
            tier: tier_name.to_owned(),
            model: tier_cfg.model.clone(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use px_domain::config::ModelPricing;
    use std::collections::HashMap;

    fn routing(enabled: bool) -> RoutingConfig {
        let mut tiers = std::collections::BTreeMap::new();
        tiers.insert(
            "balanced".to_string(),
            TierConfig {
                model: "model-default".into(),
                use_for: vec!["parsing".into()],
                cost_per_1m: ModelPricing::default(),
            },
        );
        tiers.insert(
            "heavy".to_string(),
            TierConfig {
                model: "model-a".into(),
                use_for: vec!["analysis".into(), "planning".into()],
                cost_per_1m: ModelPricing::default(),
            },
        );
        RoutingConfig {
            enabled,
            default_tier: "balanced".into(),
            tiers,
            ..Default::default()
        }
    }

    fn router(enabled: bool) -> TierRouter {
        TierRouter::new(
            routing(enabled),
            Arc::new(ProviderRegistry::from_providers(HashMap::new())),
            Arc::new(CostTracker::new()),
        )
    }

    #[test]
    fn claiming_tier_wins() {
        let r = router(true);
        let (name, tier) = r.resolve_tier(TaskType::Analysis).unwrap();
        assert_eq!(name, "heavy");
        assert_eq!(tier.model, "model-a");
    }

    #[test]
    fn unclaimed_task_falls_to_default() {
        let r = router(true);
        let (name, _) = r.resolve_tier(TaskType::Formatting).unwrap();
        assert_eq!(name, "balanced");
    }

    #[test]
    fn disabled_routing_always_uses_default() {
        let r = router(false);
        let (name, _) = r.resolve_tier(TaskType::Analysis).unwrap();
        assert_eq!(name, "balanced");
    }

    #[test]
    fn missing_default_tier_is_config_error() {
        let mut cfg = routing(true);
        cfg.default_tier = "nope".into();
        let r = TierRouter::new(
            cfg,
            Arc::new(ProviderRegistry::from_providers(HashMap::new())),
            Arc::new(CostTracker::new()),
        );
        assert!(matches!(
            r.resolve_tier(TaskType::Formatting),
            Err(Error::Config(_))
        ));
    }
}
