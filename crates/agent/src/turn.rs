//! The agent loop: one user turn from text in to reply out.
//!
//! Per turn: assemble the system prompt (identity + mission context),
//! classify, route through the tier router (under supervision when the
//! policy asks for it), dispatch any tool calls strictly in order, and
//! iterate until the model answers with plain text or the iteration
//! cap trips. The produced messages persist as one ordered batch; a
//! persistence failure downgrades durability, never the reply.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use px_domain::chat::{LlmResponse, Message, Usage};
use px_domain::config::AgentConfig;
use px_domain::error::{Error, Result};
use px_domain::event::AgentEvent;
use px_providers::classifier::{classify, supervision_required};
use px_providers::traits::ChatRequest;
use px_providers::TierRouter;
use px_sessions::MessageStore;

use crate::context::build_agent_context;
use crate::tool::{ToolContext, ToolRegistry};
use crate::workflow_tools::EngineHandle;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Agent {
    config: AgentConfig,
    /// Static identity blocks, read once at startup; opaque here.
    identity: String,
    router: Arc<TierRouter>,
    sessions: Arc<MessageStore>,
    tools: Arc<ToolRegistry>,
    engine: EngineHandle,
    /// Workflow phase per session as of the start of its previous
    /// turn; drives the phase-changed classification flag.
    phase_cache: Mutex<HashMap<String, usize>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        identity: String,
        router: Arc<TierRouter>,
        sessions: Arc<MessageStore>,
        tools: Arc<ToolRegistry>,
        engine: EngineHandle,
    ) -> Self {
        Self {
            config,
            identity,
            router,
            sessions,
            tools,
            engine,
            phase_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The engine handle the workflow tools bind to.
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // process: one user turn
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run one agent turn and return the final assistant text.
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        session_key: &str,
        user_text: &str,
    ) -> Result<String> {
        let history = self.sessions.load(session_key);
        let phase_changed = self.phase_changed(session_key);

        // A zero cap means no model call at all; only the user turn
        // persists.
        if self.config.max_tool_iterations == 0 {
            self.persist(session_key, &[Message::user(user_text)], &Usage::default());
            return Ok("Tool iteration limit reached; no model call was made.".to_string());
        }

        // ── Working message list ──────────────────────────────────
        let mut system_text = self.identity.clone();
        if let Some(engine) = self.engine.read().as_ref() {
            system_text.push_str("\n\n");
            system_text.push_str(&engine.context_prompt());
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_text));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(user_text));

        // Messages produced this turn, persisted in order at the end.
        let mut produced = vec![Message::user(user_text)];

        let tool_defs = self.tools.definitions();
        let tool_ctx = ToolContext {
            session_key: session_key.to_owned(),
            workspace: self.config.workspace.clone(),
            cancel: cancel.clone(),
        };

        let mut last_tool_output = String::new();
        let mut total_usage = Usage::default();
        let mut iterations = 0usize;
        let mut final_text: Option<String> = None;

        // ── Iteration loop ────────────────────────────────────────
        for _ in 0..self.config.max_tool_iterations {
            iterations += 1;

            if cancel.is_cancelled() {
                self.persist(session_key, &produced, &total_usage);
                return Err(Error::Cancelled);
            }

            // Classification is pure and the size rules depend on tool
            // output produced mid-turn, so it reruns every iteration.
            let ctx = build_agent_context(
                &history,
                user_text,
                &last_tool_output,
                phase_changed,
                self.tools.len(),
            );
            let cls = classify(&ctx);
            let supervised = supervision_required(&ctx, &cls, self.router.routing());

            let req = ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                prompt_cache_key: Some(session_key.to_owned()),
                ..Default::default()
            };

            let response = match self.route(cancel, session_key, supervised, cls.task, &req).await
            {
                Ok(r) => r,
                Err(Error::Cancelled) => {
                    self.persist(session_key, &produced, &total_usage);
                    return Err(Error::Cancelled);
                }
                // Routing and provider failures exit the loop.
                Err(e) => return Err(e),
            };

            total_usage.prompt_tokens += response.usage.prompt_tokens;
            total_usage.completion_tokens += response.usage.completion_tokens;
            total_usage.total_tokens += response.usage.total_tokens;

            let mut assistant =
                Message::assistant_with_calls(response.content.clone(), response.tool_calls.clone());
            assistant.reasoning_content = response.reasoning_content.clone();
            messages.push(assistant.clone());
            produced.push(assistant);

            if response.tool_calls.is_empty() {
                final_text = Some(response.content);
                break;
            }

            // ── Sequential tool dispatch ──────────────────────────
            // One result message per call, in call order, before the
            // next model round.
            for tc in &response.tool_calls {
                if cancel.is_cancelled() {
                    self.persist(session_key, &produced, &total_usage);
                    return Err(Error::Cancelled);
                }

                let args = serde_json::Value::Object(tc.arguments.clone());
                let (content, is_error) = match tokio::time::timeout(
                    self.config.tool_timeout(),
                    self.tools.dispatch(&tc.name, &tool_ctx, &args),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => (
                        format!(
                            "tool '{}' timed out after {}s",
                            tc.name, self.config.tool_timeout_secs
                        ),
                        true,
                    ),
                };

                AgentEvent::ToolDispatched {
                    session_key: session_key.to_owned(),
                    call_id: tc.id.clone(),
                    tool_name: tc.name.clone(),
                    is_error,
                }
                .emit();

                // Keep the largest single output; the by-size
                // classification rules only consume length.
                if content.len() > last_tool_output.len() {
                    last_tool_output = content.clone();
                }

                let result_msg = Message::tool_result(&tc.id, &content);
                messages.push(result_msg.clone());
                produced.push(result_msg);
            }
        }

        // ── Terminate ─────────────────────────────────────────────
        let reply = match final_text {
            Some(text) => text,
            None => {
                // Cap exhausted: emit a terminal assistant message;
                // this is not an error to the caller.
                let text = format!(
                    "Reached the tool iteration cap ({}) without a final answer; stopping here.",
                    self.config.max_tool_iterations
                );
                produced.push(Message::assistant(&text));
                text
            }
        };

        self.persist(session_key, &produced, &total_usage);

        AgentEvent::TurnCompleted {
            session_key: session_key.to_owned(),
            iterations,
            usage: total_usage,
        }
        .emit();

        Ok(reply)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Internals
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// One routed exchange, cancellable at the await point. Supervised
    /// routes substitute the supervisor-approved text for the worker's
    /// content.
    async fn route(
        &self,
        cancel: &CancellationToken,
        session_key: &str,
        supervised: bool,
        task: px_domain::task::TaskType,
        req: &ChatRequest,
    ) -> Result<LlmResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = async {
                if supervised {
                    let outcome = self.router.route_with_supervision(session_key, task, req).await?;
                    let mut response = outcome.response;
                    response.content = outcome.final_output;
                    Ok(response)
                } else {
                    Ok(self.router.route_chat(session_key, task, req).await?.response)
                }
            } => result,
        }
    }

    /// Whether the mission phase moved since this session's previous
    /// turn; updates the cache to the phase at the start of this turn.
    fn phase_changed(&self, session_key: &str) -> bool {
        let current = self.engine.read().as_ref().map(|e| e.current_phase_index());
        let Some(current) = current else {
            return false;
        };
        let mut cache = self.phase_cache.lock();
        let previous = cache.insert(session_key.to_owned(), current);
        previous.is_some_and(|p| p != current)
    }

    /// Append this turn's messages in order and save. Persistence is
    /// best-effort: a failed save is logged and the reply survives.
    fn persist(&self, session_key: &str, messages: &[Message], usage: &Usage) {
        for msg in messages {
            self.sessions.append(session_key, msg);
        }
        self.sessions.record_usage(
            session_key,
            usage.prompt_tokens as u64,
            usage.completion_tokens as u64,
        );
        if let Err(e) = self.sessions.save(session_key) {
            tracing::warn!(session = session_key, error = %e, "session persistence failed");
        }
    }
}
