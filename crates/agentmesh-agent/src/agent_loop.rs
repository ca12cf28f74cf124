//! Reasoning loop: the model ⇄ capability main loop for one turn.
//!
//! Each round trip presents the history and every registered capability to
//! the model. A final answer ends the turn; a batch of tool calls is resolved,
//! dispatched concurrently, and folded back into the history in request order.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use agentmesh_core::error::{CapabilityError, ProviderError, TurnError};
use agentmesh_core::types::{Message, ToolCall};
use agentmesh_core::utils::truncate_string;
use agentmesh_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::capability::{Capability, InvocationContext};
use crate::choice::{ResponseChoice, Stage};
use crate::context::ContextBuilder;
use crate::registry::CapabilityRegistry;

/// Default maximum model ⇄ capability round trips per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

// ─────────────────────────────────────────────
// ReasoningLoop
// ─────────────────────────────────────────────

/// Drives one conversation turn against a shared registry.
pub struct ReasoningLoop {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<CapabilityRegistry>,
    /// Model to use (overrides provider default if set).
    model: String,
    max_iterations: usize,
    request_config: LlmRequestConfig,
}

impl ReasoningLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<CapabilityRegistry>,
        model: Option<String>,
        max_iterations: Option<usize>,
        request_config: Option<LlmRequestConfig>,
    ) -> Self {
        let model = model.unwrap_or_else(|| provider.default_model().to_string());
        Self {
            provider,
            registry,
            model,
            max_iterations: max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            request_config: request_config.unwrap_or_default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Run the turn to a final answer.
    ///
    /// Capability failures are folded into the history as `Error: ...` tool
    /// results and never end the turn. Unknown capability names, reasoning
    /// failures, and running out of round trips do.
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        depth: u32,
        choice: &mut ResponseChoice,
    ) -> Result<String, TurnError> {
        for iteration in 0..self.max_iterations {
            let tool_defs = self.registry.definitions();
            debug!(iteration, capabilities = tool_defs.len(), "LLM call");

            let tools = (!tool_defs.is_empty()).then_some(tool_defs.as_slice());
            let response = self
                .provider
                .chat(&messages, tools, &self.model, &self.request_config)
                .await?;

            if !response.has_tool_calls() {
                let answer = response
                    .content
                    .filter(|c| !c.trim().is_empty())
                    .ok_or(ProviderError::Empty)?;
                info!(iteration, answer_len = answer.len(), "turn produced a final answer");
                choice.append_content(&answer);
                return Ok(answer);
            }

            // Resolve every name before running anything.
            let resolved = response
                .tool_calls
                .iter()
                .map(|call| self.registry.find(&call.function.name).map(|cap| (call, cap)))
                .collect::<Result<Vec<_>, _>>()?;

            let history_len = messages.len();
            ContextBuilder::add_assistant_message(
                &mut messages,
                response.content.clone(),
                response.tool_calls.clone(),
            );

            let ctx = InvocationContext {
                history: &messages[..history_len],
                depth,
            };
            info!(iteration, calls = resolved.len(), "dispatching capabilities");
            let results = join_all(
                resolved
                    .iter()
                    .map(|(call, cap)| dispatch(call, cap, ctx)),
            )
            .await;

            for ((call, _), result) in resolved.iter().zip(results) {
                let (text, failed) = match result {
                    Ok(output) => (output, false),
                    Err(e) => {
                        warn!(capability = %call.function.name, error = %e, "capability failed");
                        (e.to_tool_result(), true)
                    }
                };
                debug!(
                    capability = %call.function.name,
                    result = %truncate_string(&text, 200),
                    "capability result"
                );
                choice.add_stage(Stage {
                    capability: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                    result: text.clone(),
                    failed,
                });
                ContextBuilder::add_tool_result(&mut messages, &call.id, &text);
            }
        }

        warn!(limit = self.max_iterations, "reasoning loop exceeded its round-trip budget");
        Err(TurnError::LoopExceeded {
            limit: self.max_iterations,
        })
    }
}

async fn dispatch(
    call: &ToolCall,
    capability: &Capability,
    ctx: InvocationContext<'_>,
) -> Result<String, CapabilityError> {
    let args = parse_arguments(capability.name(), &call.function.arguments)?;
    capability.invoke(args, &ctx).await
}

/// Decode the model's JSON argument string. Blank means no arguments.
fn parse_arguments(capability: &str, raw: &str) -> Result<Value, CapabilityError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| {
        CapabilityError::invalid_arguments(capability, format!("arguments are not valid JSON: {e}"))
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
