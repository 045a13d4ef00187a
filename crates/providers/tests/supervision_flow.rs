//! Integration tests for routing and supervision: full round-trips
//! against scripted providers, no network.
//!
//! These validate the complete flow across classifier, router, cost
//! tracker, and supervisor. All tests are deterministic.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use px_domain::chat::{FinishReason, LlmResponse, Message, Usage};
use px_domain::config::{ModelPricing, RoutingConfig, TierConfig};
use px_domain::error::{Error, Result};
use px_domain::task::{AgentContext, TaskType};
use px_providers::classifier::classify;
use px_providers::cost::CostTracker;
use px_providers::traits::{ChatRequest, LlmProvider};
use px_providers::{ProviderRegistry, TierRouter};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays a fixed script of replies; `Err` entries become transient
/// HTTP errors.
#[derive(Debug)]
struct ScriptedProvider {
    id: String,
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: Mutex<u32>,
}

impl ScriptedProvider {
    fn new(id: &str, script: Vec<std::result::Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, _req: &ChatRequest) -> Result<LlmResponse> {
        *self.calls.lock() += 1;
        match self.script.lock().pop_front() {
            Some(Ok(content)) => Ok(LlmResponse {
                content,
                reasoning_content: None,
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
                usage: Usage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    total_tokens: 150,
                },
            }),
            Some(Err(msg)) => Err(Error::Http(msg)),
            None => Ok(LlmResponse::empty()),
        }
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tiers() -> BTreeMap<String, TierConfig> {
    let mut tiers = BTreeMap::new();
    tiers.insert(
        "light".to_string(),
        TierConfig {
            model: "model-light".into(),
            use_for: vec!["parsing".into(), "summary".into()],
            cost_per_1m: ModelPricing {
                input_per_1m: 0.1,
                output_per_1m: 0.2,
            },
        },
    );
    tiers.insert(
        "balanced".to_string(),
        TierConfig {
            model: "model-balanced".into(),
            use_for: vec!["exploitation".into(), "code_review".into()],
            cost_per_1m: ModelPricing {
                input_per_1m: 1.0,
                output_per_1m: 2.0,
            },
        },
    );
    tiers.insert(
        "heavy".to_string(),
        TierConfig {
            model: "model-heavy".into(),
            use_for: vec!["analysis".into(), "planning".into(), "supervision".into()],
            cost_per_1m: ModelPricing {
                input_per_1m: 3.0,
                output_per_1m: 15.0,
            },
        },
    );
    tiers
}

fn routing_config(supervision: bool) -> RoutingConfig {
    RoutingConfig {
        enabled: true,
        default_tier: "balanced".into(),
        tiers: tiers(),
        enable_supervision: supervision,
        supervisor_tier: supervision.then(|| "heavy".to_string()),
        validation_confidence_threshold: 0.0,
        min_task_complexity_for_supervision: 7,
    }
}

fn router_with(
    supervision: bool,
    providers: Vec<(&str, Arc<ScriptedProvider>)>,
) -> (TierRouter, Arc<CostTracker>) {
    let map: HashMap<String, Arc<dyn LlmProvider>> = providers
        .into_iter()
        .map(|(model, p)| (model.to_string(), p as Arc<dyn LlmProvider>))
        .collect();
    let costs = Arc::new(CostTracker::new());
    let router = TierRouter::new(
        routing_config(supervision),
        Arc::new(ProviderRegistry::from_providers(map)),
        costs.clone(),
    );
    (router, costs)
}

fn request(text: &str) -> ChatRequest {
    ChatRequest {
        messages: vec![Message::user(text)],
        ..Default::default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification → routing (no supervision)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn analyze_routes_to_heavy_and_records_cost() {
    let worker = ScriptedProvider::new("heavy", vec![Ok("the log shows a crash".into())]);
    let (router, costs) = router_with(false, vec![("model-heavy", worker.clone())]);

    let ctx = AgentContext {
        turn_count: 2,
        user_message: "analyze this log".into(),
        ..Default::default()
    };
    let cls = classify(&ctx);
    assert_eq!(cls.task, TaskType::Analysis);

    let routed = router
        .route_chat("s1", cls.task, &request(&ctx.user_message))
        .await
        .unwrap();

    assert_eq!(routed.tier, "heavy");
    assert_eq!(routed.model, "model-heavy");
    assert_eq!(worker.call_count(), 1);

    let session = costs.get_session("s1").unwrap();
    assert_eq!(session.by_tier["heavy"].calls, 1);
    assert_eq!(session.by_model["model-heavy"].calls, 1);
}

#[tokio::test]
async fn large_tool_output_classifies_as_parsing_and_selects_light() {
    let ctx = AgentContext {
        turn_count: 3,
        last_tool_output: "x".repeat(5_000),
        user_message: "please continue".into(),
        ..Default::default()
    };
    let cls = classify(&ctx);
    assert_eq!(cls.task, TaskType::Parsing);

    let (router, _) = router_with(false, vec![]);
    let (tier, cfg) = router.resolve_tier(cls.task).unwrap();
    assert_eq!(tier, "light");
    assert_eq!(cfg.model, "model-light");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn supervised_happy_path_validates_worker_output() {
    let worker_text = "payload delivered to the test target";
    let worker = ScriptedProvider::new("worker", vec![Ok(worker_text.into())]);
    let verdict = format!(
        "{{\"approved\":true,\"confidence\":0.95,\"corrections\":[],\"final_output\":\"{worker_text}\"}}"
    );
    let supervisor = ScriptedProvider::new("sup", vec![Ok(verdict)]);
    let (router, costs) = router_with(
        true,
        vec![("model-balanced", worker), ("model-heavy", supervisor)],
    );

    let result = router
        .route_with_supervision("s1", TaskType::Exploitation, &request("run the exploit"))
        .await
        .unwrap();

    assert!(result.validated);
    assert_eq!(result.final_output, worker_text);
    assert_eq!(result.worker_model, "model-balanced");
    assert_eq!(result.supervisor_model, "model-heavy");
    assert!(result.corrections.is_empty());

    let sup = costs.get_session("s1").unwrap().supervision;
    assert_eq!(sup.total_supervisions, 1);
    assert_eq!(sup.failed_validations, 0);
    assert_eq!(sup.corrections, 0);
    assert!(sup.estimated_savings > 0.0);
}

#[tokio::test]
async fn supervised_correction_carries_new_output() {
    let worker = ScriptedProvider::new("worker", vec![Ok("first draft".into())]);
    let verdict = "{\"approved\":false,\"confidence\":0.9,\
                   \"corrections\":[\"c1\",\"c2\"],\"final_output\":\"second draft\"}";
    let supervisor = ScriptedProvider::new("sup", vec![Ok(verdict.into())]);
    let (router, costs) = router_with(
        true,
        vec![("model-balanced", worker), ("model-heavy", supervisor)],
    );

    let result = router
        .route_with_supervision("s1", TaskType::CodeReview, &request("review this code"))
        .await
        .unwrap();

    assert!(!result.validated);
    assert_eq!(result.final_output, "second draft");
    assert_eq!(result.corrections, vec!["c1".to_string(), "c2".to_string()]);

    let sup = costs.get_session("s1").unwrap().supervision;
    assert_eq!(sup.corrections, 2);
}

#[tokio::test]
async fn unreachable_supervisor_falls_back_to_worker_text() {
    let worker = ScriptedProvider::new("worker", vec![Ok("worker answer".into())]);
    let supervisor = ScriptedProvider::new(
        "sup",
        vec![Err("connection refused".into()), Err("connection refused".into())],
    );
    let (router, costs) = router_with(
        true,
        vec![("model-balanced", worker), ("model-heavy", supervisor.clone())],
    );

    let result = router
        .route_with_supervision("s1", TaskType::CodeReview, &request("review this code"))
        .await
        .unwrap();

    assert!(!result.validated);
    assert_eq!(result.final_output, "worker answer");
    assert_eq!(result.supervisor_model, "fallback");
    assert!((result.validation_score - 0.5).abs() < 1e-9);
    // Both attempts were burned.
    assert_eq!(supervisor.call_count(), 2);

    let sup = costs.get_session("s1").unwrap().supervision;
    assert_eq!(sup.failed_validations, 1);
    assert_eq!(sup.fallback_used, 1);
}

#[tokio::test]
async fn high_stakes_disapproval_is_an_error() {
    let worker = ScriptedProvider::new("worker", vec![Ok("sloppy exploit".into())]);
    let verdict = "{\"approved\":false,\"confidence\":0.95,\
                   \"corrections\":[],\"final_output\":\"\"}";
    let supervisor = ScriptedProvider::new("sup", vec![Ok(verdict.into())]);
    let (router, _) = router_with(
        true,
        vec![("model-balanced", worker), ("model-heavy", supervisor)],
    );

    let err = router
        .route_with_supervision("s1", TaskType::Exploitation, &request("run the exploit"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn proseonly_verdict_soft_approves_with_worker_text() {
    let worker = ScriptedProvider::new("worker", vec![Ok("findings list".into())]);
    let supervisor = ScriptedProvider::new("sup", vec![Ok("looks good to me".into())]);
    let (router, _) = router_with(
        true,
        vec![("model-balanced", worker), ("model-heavy", supervisor)],
    );

    let result = router
        .route_with_supervision("s1", TaskType::CodeReview, &request("review this code"))
        .await
        .unwrap();

    assert!(result.validated);
    assert_eq!(result.final_output, "findings list");
    assert!((result.validation_score - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn tasks_without_validation_rule_skip_the_supervisor() {
    let worker = ScriptedProvider::new("worker", vec![Ok("tidy text".into())]);
    let supervisor = ScriptedProvider::new("sup", vec![Ok("unused".into())]);
    let (router, costs) = router_with(
        true,
        vec![("model-balanced", worker), ("model-heavy", supervisor.clone())],
    );

    let result = router
        .route_with_supervision("s1", TaskType::Formatting, &request("tidy this up"))
        .await
        .unwrap();

    assert!(result.validated);
    assert_eq!(result.supervisor_model, "none");
    assert_eq!(supervisor.call_count(), 0);
    assert_eq!(costs.get_session("s1").unwrap().supervision.total_supervisions, 0);
}
