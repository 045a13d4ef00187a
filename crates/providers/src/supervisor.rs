//! Hierarchical supervision: a worker model produces the candidate
//! answer, a supervisor model judges it.
//!
//! The supervisor replies with a JSON verdict; lenient extraction (the
//! first `{` to the last `}`) tolerates prose around it. Supervisor
//! trouble never destroys the worker's answer: every failure path
//! degrades to an explicit fallback result except a rejected
//! high-stakes task, which is surfaced as an error.

use crate::cost::SupervisionRecord;
use crate::router::{Routed, TierRouter};
use crate::traits::ChatRequest;
use px_domain::chat::{LlmResponse, Message};
use px_domain::error::{Error, Result};
use px_domain::event::AgentEvent;
use px_domain::task::TaskType;
use serde::Deserialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-task validation policy.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRule {
    pub min_confidence: f64,
    pub requires_validation: bool,
}

/// Static rule table. Tasks not listed never require validation.
pub fn validation_rule(task: TaskType) -> Option<ValidationRule> {
    let rule = match task {
        TaskType::Analysis => ValidationRule {
            min_confidence: 0.80,
            requires_validation: true,
        },
        TaskType::Exploitation => ValidationRule {
            min_confidence: 0.90,
            requires_validation: true,
        },
        TaskType::CodeReview => ValidationRule {
            min_confidence: 0.75,
            requires_validation: true,
        },
        TaskType::Planning => ValidationRule {
            min_confidence: 0.70,
            requires_validation: false,
        },
        TaskType::ToolSelection => ValidationRule {
            min_confidence: 0.60,
            requires_validation: false,
        },
        _ => return None,
    };
    Some(rule)
}

/// Tasks whose output must never be silently accepted after a failed
/// validation.
const HIGH_STAKES: &[TaskType] = &[TaskType::Exploitation, TaskType::Analysis, TaskType::Planning];

/// Supervisor retry budget (immediate retry on transient errors).
const SUPERVISOR_ATTEMPTS: usize = 2;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The outcome of a supervised route. The supervisor's own task is
/// always `supervision`.
#[derive(Debug, Clone)]
pub struct SupervisionResult {
    pub task: TaskType,
    pub validated: bool,
    pub corrections: Vec<String>,
    pub final_output: String,
    pub worker_model: String,
    /// `"none"` when no validation ran, `"fallback"` when the
    /// supervisor was unreachable.
    pub supervisor_model: String,
    pub validation_score: f64,
    /// The worker's raw response (tool calls, usage).
    pub response: LlmResponse,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdict parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct Verdict {
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    corrections: Vec<String>,
    #[serde(default)]
    final_output: String,
}

/// What came back from the supervisor, after lenient extraction.
#[derive(Debug)]
enum ParsedVerdict {
    Verdict(Verdict),
    /// No `{…}` anywhere in the reply.
    NoJson,
    /// Braces found but the JSON would not parse.
    Malformed,
}

fn parse_verdict(content: &str) -> ParsedVerdict {
    let Some(start) = content.find('{') else {
        return ParsedVerdict::NoJson;
    };
    let Some(end) = content.rfind('}') else {
        return ParsedVerdict::NoJson;
    };
    if end < start {
        return ParsedVerdict::NoJson;
    }

    match serde_json::from_str::<Verdict>(&content[start..=end]) {
        Ok(mut v) => {
            v.confidence = v.confidence.clamp(0.0, 1.0);
            ParsedVerdict::Verdict(v)
        }
        Err(e) => {
            tracing::debug!(error = %e, "supervisor verdict did not parse");
            ParsedVerdict::Malformed
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the supervised route should conclude. Pure so the table stays
/// testable without any provider in the loop.
#[derive(Debug, PartialEq)]
enum Decision {
    /// Approved with sufficient confidence.
    Validated { output: String, score: f64 },
    /// Disapproved on a high-stakes task; surface an error.
    Rejected { score: f64 },
    /// Disapproved with a usable corrected output.
    Corrected {
        output: String,
        corrections: Vec<String>,
        score: f64,
    },
    /// Nothing usable from the supervisor; keep the worker's text.
    WorkerText { score: f64 },
}

fn decide(task: TaskType, threshold: f64, worker_text: &str, verdict: &Verdict) -> Decision {
    if verdict.approved && verdict.confidence >= threshold {
        let output = if verdict.final_output.is_empty() {
            worker_text.to_owned()
        } else {
            verdict.final_output.clone()
        };
        return Decision::Validated {
            output,
            score: verdict.confidence,
        };
    }

    if HIGH_STAKES.contains(&task) {
        return Decision::Rejected {
            score: verdict.confidence,
        };
    }

    if !verdict.final_output.is_empty() && verdict.final_output != worker_text {
        return Decision::Corrected {
            output: verdict.final_output.clone(),
            corrections: verdict.corrections.clone(),
            score: verdict.confidence,
        };
    }

    Decision::WorkerText {
        score: verdict.confidence,
    }
}

/// The confidence a verdict must clear: the global override when set,
/// else the task's rule minimum, else 0.7.
fn effective_threshold(rule: Option<ValidationRule>, override_threshold: f64) -> f64 {
    if override_threshold > 0.0 {
        return override_threshold;
    }
    rule.map(|r| r.min_confidence).unwrap_or(0.7)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_validation_prompt(task: TaskType, worker_output: &str) -> String {
    format!(
        "You are a supervisor reviewing another model's output for a {task} task.\n\
         \n\
         Candidate output:\n\
         ---\n\
         {worker_output}\n\
         ---\n\
         \n\
         Reply with a single JSON object and nothing else:\n\
         {{\"approved\": true|false, \"confidence\": 0.0-1.0, \
         \"corrections\": [\"...\"], \"final_output\": \"...\"}}\n\
         \n\
         Set \"approved\" true only when the output is correct and complete \
         for the task. When you disagree, list what is wrong in \
         \"corrections\" and put the corrected text in \"final_output\"."
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervised routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl TierRouter {
    /// Route with hierarchical supervision.
    ///
    /// When no supervisor tier is configured, the task never requires
    /// validation, or the worker answered with tool calls (an
    /// intermediate step with nothing final to judge), this degrades to a
    /// plain [`TierRouter::route_chat`] wrapped as validated.
    pub async fn route_with_supervision(
        &self,
        session_key: &str,
        task: TaskType,
        req: &ChatRequest,
    ) -> Result<SupervisionResult> {
        let rule = validation_rule(task);
        let supervisor_tier = self
            .routing()
            .supervisor_tier
            .as_ref()
            .filter(|_| self.routing().enable_supervision)
            .and_then(|name| self.tier(name).map(|cfg| (name.clone(), cfg.clone())));

        let worker = self.route_chat(session_key, task, req).await?;

        let needs_validation = rule.map(|r| r.requires_validation).unwrap_or(false);
        let Some((sup_tier_name, sup_tier_cfg)) = supervisor_tier else {
            return Ok(unvalidated_wrap(task, worker));
        };
        if !needs_validation || !worker.response.tool_calls.is_empty() {
            return Ok(unvalidated_wrap(task, worker));
        }

        let worker_text = worker.response.content.clone();

        // ── Supervisor exchange (with retry) ──────────────────────
        let sup_req = ChatRequest {
            messages: vec![Message::user(build_validation_prompt(task, &worker_text))],
            temperature: Some(0.0),
            ..Default::default()
        };

        let mut supervised: Option<Routed> = None;
        for attempt in 0..SUPERVISOR_ATTEMPTS {
            match self
                .route_chat_tier(session_key, TaskType::Supervision, &sup_tier_name, &sup_req)
                .await
            {
                Ok(r) => {
                    supervised = Some(r);
                    break;
                }
                Err(e) if e.is_transient() && attempt + 1 < SUPERVISOR_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "supervisor call failed, retrying");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "supervisor unreachable, falling back");
                    break;
                }
            }
        }

        let Some(supervised) = supervised else {
            self.costs().record_supervision(
                session_key,
                SupervisionRecord {
                    failed: true,
                    fallback_used: true,
                    ..Default::default()
                },
            );
            return Ok(SupervisionResult {
                task,
                validated: false,
                corrections: Vec::new(),
                final_output: worker_text,
                worker_model: worker.model,
                supervisor_model: "fallback".into(),
                validation_score: 0.5,
                response: worker.response,
            });
        };

        let supervision_cost = sup_tier_cfg.cost_per_1m.estimate_cost(
            supervised.response.usage.prompt_tokens,
            supervised.response.usage.completion_tokens,
        );

        // ── Verdict ───────────────────────────────────────────────
        // An unusable supervisor reply soft-approves the worker text
        // outright: 0.7 when there was no JSON at all, 0.6 when the
        // JSON would not parse.
        let verdict = match parse_verdict(&supervised.response.content) {
            ParsedVerdict::Verdict(v) => v,
            ParsedVerdict::NoJson => {
                return Ok(self.soft_approve(
                    session_key,
                    task,
                    worker,
                    supervised.model,
                    supervision_cost,
                    0.7,
                ));
            }
            ParsedVerdict::Malformed => {
                return Ok(self.soft_approve(
                    session_key,
                    task,
                    worker,
                    supervised.model,
                    supervision_cost,
                    0.6,
                ));
            }
        };

        let threshold = effective_threshold(rule, self.routing().validation_confidence_threshold);
        let decision = decide(task, threshold, &worker_text, &verdict);

        // Savings estimate: what this turn would have cost on the
        // supervisor tier instead of the worker tier.
        let worker_usage = worker.response.usage;
        let at_supervisor = sup_tier_cfg
            .cost_per_1m
            .estimate_cost(worker_usage.prompt_tokens, worker_usage.completion_tokens);
        let at_worker = self
            .tier(&worker.tier)
            .map(|t| t.cost_per_1m.estimate_cost(worker_usage.prompt_tokens, worker_usage.completion_tokens))
            .unwrap_or(0.0);
        let estimated_savings = (at_supervisor - at_worker).max(0.0);

        let result = match decision {
            Decision::Validated { output, score } => {
                self.costs().record_supervision(
                    session_key,
                    SupervisionRecord {
                        success: true,
                        cost: supervision_cost,
                        confidence: score,
                        estimated_savings,
                        ..Default::default()
                    },
                );
                SupervisionResult {
                    task,
                    validated: true,
                    corrections: Vec::new(),
                    final_output: output,
                    worker_model: worker.model,
                    supervisor_model: supervised.model,
                    validation_score: score,
                    response: worker.response,
                }
            }
            Decision::Rejected { score } => {
                self.costs().record_supervision(
                    session_key,
                    SupervisionRecord {
                        failed: true,
                        cost: supervision_cost,
                        confidence: score,
                        ..Default::default()
                    },
                );
                return Err(Error::Validation {
                    task: task.label().into(),
                    message: format!(
                        "supervisor disapproved with confidence {score:.2} (threshold {threshold:.2})"
                    ),
                });
            }
            Decision::Corrected {
                output,
                corrections,
                score,
            } => {
                self.costs().record_supervision(
                    session_key,
                    SupervisionRecord {
                        corrections: corrections.len() as u64,
                        cost: supervision_cost,
                        confidence: score,
                        ..Default::default()
                    },
                );
                SupervisionResult {
                    task,
                    validated: false,
                    corrections,
                    final_output: output,
                    worker_model: worker.model,
                    supervisor_model: supervised.model,
                    validation_score: score,
                    response: worker.response,
                }
            }
            Decision::WorkerText { score } => {
                self.costs().record_supervision(
                    session_key,
                    SupervisionRecord {
                        cost: supervision_cost,
                        confidence: score,
                        ..Default::default()
                    },
                );
                SupervisionResult {
                    task,
                    validated: false,
                    corrections: Vec::new(),
                    final_output: worker_text,
                    worker_model: worker.model,
                    supervisor_model: supervised.model,
                    validation_score: score,
                    response: worker.response,
                }
            }
        };

        AgentEvent::SupervisionVerdict {
            session_key: session_key.to_owned(),
            task: task.label().to_owned(),
            validated: result.validated,
            score: result.validation_score,
            supervisor_model: result.supervisor_model.clone(),
        }
        .emit();

        Ok(result)
    }

    /// Accept the worker's text with a reduced score when the
    /// supervisor's reply was unusable.
    fn soft_approve(
        &self,
        session_key: &str,
        task: TaskType,
        worker: Routed,
        supervisor_model: String,
        cost: f64,
        score: f64,
    ) -> SupervisionResult {
        self.costs().record_supervision(
            session_key,
            SupervisionRecord {
                success: true,
                cost,
                confidence: score,
                ..Default::default()
            },
        );
        AgentEvent::SupervisionVerdict {
            session_key: session_key.to_owned(),
            task: task.label().to_owned(),
            validated: true,
            score,
            supervisor_model: supervisor_model.clone(),
        }
        .emit();
        SupervisionResult {
            task,
            validated: true,
            corrections: Vec::new(),
            final_output: worker.response.content.clone(),
            worker_model: worker.model,
            supervisor_model,
            validation_score: score,
            response: worker.response,
        }
    }
}

/// Wrap a plain routed exchange as a validated result with no
/// supervisor involvement.
fn unvalidated_wrap(task: TaskType, worker: Routed) -> SupervisionResult {
    SupervisionResult {
        task,
        validated: true,
        corrections: Vec::new(),
        final_output: worker.response.content.clone(),
        worker_model: worker.model,
        supervisor_model: "none".into(),
        validation_score: 1.0,
        response: worker.response,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
