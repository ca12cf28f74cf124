//! Request handler: the per-request entry point of an agent.
//!
//! Owns the process-lifetime registry. Every request first makes sure the
//! tool servers have been discovered (only the first request pays for it),
//! then runs one reasoning turn under the depth and time budgets.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use tracing::{error, info, warn};

use agentmesh_core::config::{AgentConfig, Config};
use agentmesh_core::error::{DiscoveryError, TurnError};
use agentmesh_core::types::ChatRequest;
use agentmesh_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::agent_loop::ReasoningLoop;
use crate::capability::Capability;
use crate::choice::ResponseChoice;
use crate::context::ContextBuilder;
use crate::peer::{peers_for, AgentInvocationClient};
use crate::registry::CapabilityRegistry;
use crate::tool_server::ToolServerClient;
use crate::tools::builtin_tool;

/// Terminal result of one request.
#[derive(Debug)]
pub enum ChatOutcome {
    Answer(String),
    Failure(TurnError),
}

impl ChatOutcome {
    pub fn is_answer(&self) -> bool {
        matches!(self, ChatOutcome::Answer(_))
    }

    /// Text shown to the user: the answer, or a one-line failure message.
    pub fn message(&self) -> String {
        match self {
            ChatOutcome::Answer(answer) => answer.clone(),
            ChatOutcome::Failure(e) => format!("Sorry, I could not complete this request: {e}"),
        }
    }
}

/// Per-turn limits and model settings.
#[derive(Clone, Debug)]
pub struct HandlerSettings {
    pub system_prompt: String,
    pub model: Option<String>,
    pub max_iterations: usize,
    pub request_config: LlmRequestConfig,
    pub max_peer_depth: u32,
    pub turn_timeout: Duration,
}

impl From<&AgentConfig> for HandlerSettings {
    fn from(agent: &AgentConfig) -> Self {
        Self {
            system_prompt: agent.system_prompt.clone(),
            model: Some(agent.model.clone()).filter(|m| !m.is_empty()),
            max_iterations: agent.max_tool_iterations as usize,
            request_config: LlmRequestConfig {
                max_tokens: agent.max_tokens,
                temperature: agent.temperature,
            },
            max_peer_depth: agent.max_peer_depth,
            turn_timeout: Duration::from_secs(agent.turn_timeout_secs),
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

// ─────────────────────────────────────────────
// RequestHandler
// ─────────────────────────────────────────────

pub struct RequestHandler {
    registry: Arc<CapabilityRegistry>,
    tool_servers: Vec<Arc<ToolServerClient>>,
    reasoning: ReasoningLoop,
    context: ContextBuilder,
    max_peer_depth: u32,
    turn_timeout: Duration,
}

impl RequestHandler {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<CapabilityRegistry>,
        tool_servers: Vec<Arc<ToolServerClient>>,
        settings: HandlerSettings,
    ) -> Self {
        let reasoning = ReasoningLoop::new(
            provider,
            registry.clone(),
            settings.model,
            Some(settings.max_iterations),
            Some(settings.request_config),
        );
        info!(
            model = reasoning.model(),
            static_capabilities = registry.len(),
            tool_servers = tool_servers.len(),
            "request handler initialized"
        );
        Self {
            registry,
            tool_servers,
            reasoning,
            context: ContextBuilder::new(settings.system_prompt),
            max_peer_depth: settings.max_peer_depth,
            turn_timeout: settings.turn_timeout,
        }
    }

    /// Wire up an agent from config: built-in tools and peers are registered
    /// now, tool servers are discovered on the first request.
    pub fn from_config(config: &Config, provider: Arc<dyn LlmProvider>) -> anyhow::Result<Self> {
        let registry = CapabilityRegistry::new(config.discovery.failure_policy);

        for name in &config.agent.builtin_tools {
            match builtin_tool(name) {
                Some(tool) => registry.register(Capability::local(tool))?,
                None => warn!(tool = %name, "unknown built-in tool; skipping"),
            }
        }

        let peers = peers_for(&config.mesh.peers, &config.agent.deployment_name);
        if !peers.is_empty() {
            let client = Arc::new(
                AgentInvocationClient::new(&config.mesh).context("failed to build peer client")?,
            );
            for peer in &peers {
                registry.register(Capability::peer(peer, client.clone()))?;
            }
        }

        let tool_servers = config
            .tool_servers
            .iter()
            .map(|server| {
                ToolServerClient::new(server)
                    .map(Arc::new)
                    .with_context(|| format!("failed to set up tool server '{}'", server.name))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self::new(
            provider,
            Arc::new(registry),
            tool_servers,
            HandlerSettings::from(&config.agent),
        ))
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn model(&self) -> &str {
        self.reasoning.model()
    }

    pub fn tool_servers(&self) -> &[Arc<ToolServerClient>] {
        &self.tool_servers
    }

    /// Populate the registry from every tool server (once per process).
    pub async fn ensure_discovered(&self) -> Result<(), TurnError> {
        self.registry
            .ensure_discovered(|| discover_tool_servers(&self.tool_servers))
            .await?;
        Ok(())
    }

    /// Serve one request, reporting progress and the outcome on `choice`.
    pub async fn handle(&self, request: ChatRequest, choice: &mut ResponseChoice) -> ChatOutcome {
        let outcome = match self.run_turn(request, choice).await {
            Ok(answer) => ChatOutcome::Answer(answer),
            Err(e) => {
                error!(error = %e, code = e.code(), "turn failed");
                ChatOutcome::Failure(e)
            }
        };
        if let ChatOutcome::Failure(e) = &outcome {
            choice.fail(&outcome.message(), e.code());
        }
        outcome
    }

    async fn run_turn(
        &self,
        request: ChatRequest,
        choice: &mut ResponseChoice,
    ) -> Result<String, TurnError> {
        if request.messages.is_empty() {
            return Err(TurnError::EmptyRequest);
        }
        if request.mesh_depth > self.max_peer_depth {
            return Err(TurnError::DepthExceeded {
                depth: request.mesh_depth,
                limit: self.max_peer_depth,
            });
        }

        let turn = async {
            self.ensure_discovered().await?;
            let messages = self.context.build_messages(&request.messages);
            self.reasoning.run(messages, request.mesh_depth, choice).await
        };

        tokio::time::timeout(self.turn_timeout, turn)
            .await
            .unwrap_or(Err(TurnError::TimedOut {
                seconds: self.turn_timeout.as_secs(),
            }))
    }
}

/// Discover every tool server concurrently and translate each catalog entry
/// into a remote capability. The first failure fails the whole discovery.
pub async fn discover_tool_servers(
    servers: &[Arc<ToolServerClient>],
) -> Result<Vec<Capability>, DiscoveryError> {
    let catalogs = join_all(servers.iter().map(|s| s.discover_catalog())).await;

    let mut capabilities = Vec::new();
    for (server, catalog) in servers.iter().zip(catalogs) {
        for entry in catalog? {
            capabilities.push(Capability::remote(server.clone(), &entry));
        }
    }
    Ok(capabilities)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_core::config::{DiscoveryFailurePolicy, ToolServerConfig};
    use agentmesh_core::error::{ProviderError, RegistryError};
    use agentmesh_core::types::{ChatCompletionResponse, LlmResponse, Message, ToolCall, ToolDefinition};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Scripted provider that can also stall forever.
    struct MockProvider {
        responses: std::sync::Mutex<Vec<LlmResponse>>,
        stall: bool,
    }

    impl MockProvider {
        fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses),
                stall: false,
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(LlmResponse::text("(no more responses)"))
            } else {
                Ok(responses.remove(0))
            }
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }

        fn display_name(&self) -> &str {
            "MockProvider"
        }
    }

    /// Minimal MCP server: answers every JSON-RPC request with `result`.
    struct McpStub(Value);

    impl Respond for McpStub {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            match body.get("id") {
                Some(id) => ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": id, "result": self.0 })),
                None => ResponseTemplate::new(202),
            }
        }
    }

    async fn mcp_server_with_search() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "tools/list" })))
            .respond_with(McpStub(json!({
                "tools": [{
                    "name": "search",
                    "description": "Search the web",
                    "inputSchema": { "type": "object", "properties": { "query": { "type": "string" } } }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "tools/call" })))
            .respond_with(McpStub(json!({ "content": [{ "type": "text", "text": "Rust 1.80 released" }] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(McpStub(json!({ "protocolVersion": "2024-11-05", "capabilities": {} })))
            .with_priority(10)
            .mount(&server)
            .await;
        server
    }

    fn tool_server(url: String) -> Arc<ToolServerClient> {
        Arc::new(
            ToolServerClient::new(&ToolServerConfig {
                name: "ddg".into(),
                url,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn settings() -> HandlerSettings {
        HandlerSettings {
            system_prompt: "You are the web search agent.".into(),
            model: None,
            max_iterations: 5,
            request_config: LlmRequestConfig::default(),
            max_peer_depth: 3,
            turn_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_first_request_discovers_and_uses_remote_capability() {
        let server = mcp_server_with_search().await;
        let provider = MockProvider::new(vec![
            LlmResponse::calls(vec![ToolCall::new("s1", "search", r#"{"query":"rust"}"#)]),
            LlmResponse::text("Rust 1.80 is out."),
            LlmResponse::text("Second answer."),
        ]);
        let handler = RequestHandler::new(
            provider,
            Arc::new(CapabilityRegistry::default()),
            vec![tool_server(format!("{}/mcp", server.uri()))],
            settings(),
        );

        let mut choice = ResponseChoice::new();
        let outcome = handler.handle(ChatRequest::single("news about rust"), &mut choice).await;
        assert_eq!(outcome.message(), "Rust 1.80 is out.");
        assert_eq!(choice.stages()[0].result, "Rust 1.80 released");

        // Second request reuses the discovered registry (tools/list expected once).
        let outcome = handler
            .handle(ChatRequest::single("again"), &mut ResponseChoice::new())
            .await;
        assert!(outcome.is_answer());
        assert_eq!(handler.registry().names(), vec!["search"]);
        assert_eq!(handler.tool_servers()[0].catalog()[0].name, "search");
    }

    #[tokio::test]
    async fn test_depth_budget_rejects_deep_requests() {
        let handler = RequestHandler::new(
            MockProvider::new(vec![LlmResponse::text("unreachable")]),
            Arc::new(CapabilityRegistry::default()),
            vec![],
            settings(),
        );
        let request = ChatRequest {
            mesh_depth: 4,
            ..ChatRequest::single("hi")
        };
        let (mut choice, mut events) = ResponseChoice::streaming();
        let outcome = handler.handle(request, &mut choice).await;
        assert!(matches!(
            outcome,
            ChatOutcome::Failure(TurnError::DepthExceeded { depth: 4, limit: 3 })
        ));
        assert!(matches!(
            events.recv().await,
            Some(crate::choice::ChoiceEvent::Failure { code: "depth_exceeded", .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_request_is_failure() {
        let handler = RequestHandler::new(
            MockProvider::new(vec![]),
            Arc::new(CapabilityRegistry::default()),
            vec![],
            settings(),
        );
        let outcome = handler
            .handle(ChatRequest::default(), &mut ResponseChoice::new())
            .await;
        assert!(matches!(outcome, ChatOutcome::Failure(TurnError::EmptyRequest)));
    }

    #[tokio::test]
    async fn test_turn_timeout() {
        let provider = Arc::new(MockProvider {
            responses: std::sync::Mutex::new(vec![]),
            stall: true,
        });
        let handler = RequestHandler::new(
            provider,
            Arc::new(CapabilityRegistry::default()),
            vec![],
            HandlerSettings {
                turn_timeout: Duration::from_millis(100),
                ..settings()
            },
        );
        let outcome = handler
            .handle(ChatRequest::single("hang"), &mut ResponseChoice::new())
            .await;
        assert!(matches!(outcome, ChatOutcome::Failure(TurnError::TimedOut { .. })));
        assert!(outcome.message().contains("timed out"));
    }

    /// Sleeps well past the turn budget, then records completion.
    struct StallingTool(Arc<std::sync::atomic::AtomicBool>);

    #[async_trait]
    impl crate::tools::Tool for StallingTool {
        fn name(&self) -> &str {
            "slow_search"
        }

        fn description(&self) -> &str {
            "Never answers in time"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(
            &self,
            _params: std::collections::HashMap<String, Value>,
        ) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn test_turn_timeout_cancels_slow_capability() {
        let completed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let registry = CapabilityRegistry::default();
        registry
            .register(Capability::local(Arc::new(StallingTool(completed.clone()))))
            .unwrap();
        let handler = RequestHandler::new(
            MockProvider::new(vec![
                LlmResponse::calls(vec![ToolCall::new("t1", "slow_search", "{}")]),
                LlmResponse::text("too late"),
            ]),
            Arc::new(registry),
            vec![],
            HandlerSettings {
                turn_timeout: Duration::from_millis(100),
                ..settings()
            },
        );

        let mut choice = ResponseChoice::new();
        let outcome = handler.handle(ChatRequest::single("search"), &mut choice).await;
        assert!(matches!(outcome, ChatOutcome::Failure(TurnError::TimedOut { .. })));
        assert!(choice.stages().is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!completed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_discovery_failure_with_fatal_policy() {
        let handler = RequestHandler::new(
            MockProvider::new(vec![LlmResponse::text("never")]),
            Arc::new(CapabilityRegistry::new(DiscoveryFailurePolicy::Fatal)),
            vec![tool_server("http://127.0.0.1:1/mcp".into())],
            settings(),
        );
        for _ in 0..2 {
            let outcome = handler
                .handle(ChatRequest::single("hi"), &mut ResponseChoice::new())
                .await;
            assert!(matches!(
                outcome,
                ChatOutcome::Failure(TurnError::Registry(RegistryError::Discovery(_)))
            ));
        }
    }

    #[tokio::test]
    async fn test_system_prompt_is_not_forwarded_to_peer() {
        let mesh = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/calculations-agent/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [
                    { "role": "user", "content": "What is 2+3 in words?" },
                    { "role": "user", "content": "2+3" }
                ],
                "mesh_depth": 1
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::to_value(ChatCompletionResponse::answer("calculations-agent", "5")).unwrap(),
            ))
            .expect(1)
            .mount(&mesh)
            .await;

        let mut config = Config::default();
        config.mesh.endpoint = mesh.uri();
        config.agent.deployment_name = "web-search-agent".into();
        config.agent.system_prompt = "secret system prompt".into();

        let provider = MockProvider::new(vec![
            LlmResponse::calls(vec![ToolCall::new(
                "p1",
                "calculations_agent",
                r#"{"prompt":"2+3","propagate_history":true}"#,
            )]),
            LlmResponse::text("five"),
        ]);
        let handler = RequestHandler::from_config(&config, provider).unwrap();
        assert_eq!(
            handler.registry().names(),
            vec!["calculations_agent", "content_management_agent"]
        );

        let outcome = handler
            .handle(ChatRequest::single("What is 2+3 in words?"), &mut ResponseChoice::new())
            .await;
        assert_eq!(outcome.message(), "five");
    }

    #[test]
    fn test_from_config_registers_builtins() {
        let mut config = Config::default();
        config.agent.deployment_name = "calculations-agent".into();
        config.agent.builtin_tools = vec!["simple_calculator".into(), "unknown".into()];
        let handler = RequestHandler::from_config(&config, MockProvider::new(vec![])).unwrap();
        assert_eq!(
            handler.registry().names(),
            vec!["simple_calculator", "content_management_agent", "web_search_agent"]
        );
        assert_eq!(handler.model(), "gpt-4o");
    }
}
