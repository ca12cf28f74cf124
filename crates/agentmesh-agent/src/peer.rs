//! Agent-invocation client: nested chat requests to peer agents.
//!
//! A peer is reached the same way this agent is reached by its own callers:
//! `POST {mesh}/openai/deployments/{deployment}/chat/completions`.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use agentmesh_core::config::{MeshConfig, PeerAgentConfig};
use agentmesh_core::error::CapabilityError;
use agentmesh_core::types::{ChatCompletionResponse, ChatRequest, ErrorBody, Message};

// ─────────────────────────────────────────────
// AgentInvocationClient
// ─────────────────────────────────────────────

/// Sends nested requests to peer deployments on the mesh.
#[derive(Debug)]
pub struct AgentInvocationClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl AgentInvocationClient {
    pub fn new(config: &MeshConfig) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Completions URL of a peer deployment.
    pub fn deployment_url(&self, deployment: &str) -> String {
        format!("{}/openai/deployments/{deployment}/chat/completions", self.endpoint)
    }

    /// Ask `deployment` to answer `prompt` and return its final text.
    ///
    /// With `propagate_history`, the user/assistant exchange from `history`
    /// goes first; otherwise the peer sees only the prompt. `depth` is the
    /// caller's own mesh depth; the nested request carries `depth + 1`.
    pub async fn invoke(
        &self,
        deployment: &str,
        prompt: &str,
        propagate_history: bool,
        history: &[Message],
        depth: u32,
    ) -> Result<String, CapabilityError> {
        let mut messages = if propagate_history {
            forwarded_history(history)
        } else {
            Vec::new()
        };
        messages.push(Message::user(prompt));

        let request = ChatRequest {
            messages,
            stream: false,
            mesh_depth: depth + 1,
        };

        info!(
            peer = deployment,
            propagate_history,
            messages = request.messages.len(),
            depth = request.mesh_depth,
            "invoking peer agent"
        );

        let mut builder = self.http.post(self.deployment_url(deployment)).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.header("Api-Key", &self.api_key);
        }

        let response = builder.send().await.map_err(|e| CapabilityError::PeerUnavailable {
            peer: deployment.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| CapabilityError::PeerUnavailable {
            peer: deployment.to_string(),
            message: format!("failed to read response: {e}"),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            warn!(peer = deployment, status = %status, error = %message, "peer agent returned an error");
            return Err(CapabilityError::PeerErrorResponse {
                peer: deployment.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| CapabilityError::MalformedPeerResponse {
                peer: deployment.to_string(),
                message: format!("invalid completion body: {e}"),
            })?;
        let answer = parsed
            .first_content()
            .ok_or_else(|| CapabilityError::MalformedPeerResponse {
                peer: deployment.to_string(),
                message: "response has no assistant content".to_string(),
            })?;

        debug!(peer = deployment, answer_len = answer.len(), "peer agent answered");
        Ok(answer.to_string())
    }
}

/// Messages a peer may see: user turns and assistant turns with text.
///
/// System prompts, tool-call-only assistant turns, and tool results stay
/// with the invoking agent. Assistant text is forwarded without its tool calls.
pub fn forwarded_history(history: &[Message]) -> Vec<Message> {
    history
        .iter()
        .filter_map(|m| match m {
            Message::User { .. } => Some(m.clone()),
            Message::Assistant {
                content: Some(text),
                ..
            } if !text.trim().is_empty() => Some(Message::assistant(text.clone())),
            _ => None,
        })
        .collect()
}

// ─────────────────────────────────────────────
// Peer presets
// ─────────────────────────────────────────────

/// The agents of the standard mesh.
pub fn default_peers() -> Vec<PeerAgentConfig> {
    vec![
        PeerAgentConfig {
            name: "calculations_agent".into(),
            deployment: "calculations-agent".into(),
            description: "This agent can interpret expressions and perform calculations".into(),
            prompt_description: "Target expression to be calculated.".into(),
        },
        PeerAgentConfig {
            name: "content_management_agent".into(),
            deployment: "content-management-agent".into(),
            description: "This agent can read files in different formats and query their \
                          contents with semantic search."
                .into(),
            prompt_description: "Query about the content of the files.".into(),
        },
        PeerAgentConfig {
            name: "web_search_agent".into(),
            deployment: "web-search-agent".into(),
            description: "This agent can launch web search on the internet and summarize the results."
                .into(),
            prompt_description: "Query for web search.".into(),
        },
    ]
}

/// Peers this agent should expose: the configured list, or the standard
/// mesh when none is configured, never including `own_deployment`.
pub fn peers_for(configured: &[PeerAgentConfig], own_deployment: &str) -> Vec<PeerAgentConfig> {
    let peers = if configured.is_empty() {
        default_peers()
    } else {
        configured.to_vec()
    };
    peers
        .into_iter()
        .filter(|p| p.deployment != own_deployment)
        .collect()
}

/// Parameter schema shared by every peer capability.
pub fn peer_parameters(prompt_description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "prompt": {
                "type": "string",
                "description": prompt_description
            },
            "propagate_history": {
                "type": "boolean",
                "default": false,
                "description": "If true, the conversation history is shared with this agent."
            }
        },
        "required": ["prompt"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_core::types::ToolCall;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AgentInvocationClient {
        AgentInvocationClient::new(&MeshConfig {
            endpoint: server.uri(),
            api_key: "mesh-key".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn history() -> Vec<Message> {
        vec![
            Message::system("You are the web search agent"),
            Message::user("What is the population of Paris?"),
            Message::assistant_tool_calls(None, vec![ToolCall::new("c1", "search", "{}")]),
            Message::tool_result("c1", "2.1 million"),
            Message::assistant("About 2.1 million."),
            Message::user("And its area?"),
        ]
    }

    #[test]
    fn test_forwarded_history_filters() {
        let forwarded = forwarded_history(&history());
        assert_eq!(
            forwarded,
            vec![
                Message::user("What is the population of Paris?"),
                Message::assistant("About 2.1 million."),
                Message::user("And its area?"),
            ]
        );
    }

    #[test]
    fn test_peers_for_excludes_self() {
        let peers = peers_for(&[], "web-search-agent");
        let names: Vec<&str> = peers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["calculations_agent", "content_management_agent"]);
    }

    #[tokio::test]
    async fn test_invoke_without_history_sends_only_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/calculations-agent/chat/completions"))
            .and(header("Api-Key", "mesh-key"))
            .and(body_partial_json(json!({
                "messages": [{ "role": "user", "content": "2+3" }],
                "stream": false,
                "mesh_depth": 1
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::to_value(ChatCompletionResponse::answer("calculations-agent", "5")).unwrap(),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let answer = client_for(&server)
            .invoke("calculations-agent", "2+3", false, &history(), 0)
            .await
            .unwrap();
        assert_eq!(answer, "5");
    }

    #[tokio::test]
    async fn test_invoke_with_history_prepends_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/web-search-agent/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [
                    { "role": "user", "content": "What is the population of Paris?" },
                    { "role": "assistant", "content": "About 2.1 million." },
                    { "role": "user", "content": "And its area?" },
                    { "role": "user", "content": "area of Paris" }
                ],
                "mesh_depth": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::to_value(ChatCompletionResponse::answer("web-search-agent", "105 km²")).unwrap(),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let answer = client_for(&server)
            .invoke("web-search-agent", "area of Paris", true, &history(), 1)
            .await
            .unwrap();
        assert_eq!(answer, "105 km²");
    }

    #[tokio::test]
    async fn test_invoke_error_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "model overloaded" }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .invoke("web-search-agent", "q", false, &[], 0)
            .await
            .unwrap_err();
        match err {
            CapabilityError::PeerErrorResponse { status, message, .. } => {
                assert_eq!(status, 500);
                assert_eq!(message, "model overloaded");
            }
            other => panic!("expected PeerErrorResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_empty_answer_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "" } }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .invoke("web-search-agent", "q", false, &[], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::MalformedPeerResponse { .. }));
    }

    #[tokio::test]
    async fn test_invoke_unreachable() {
        let client = AgentInvocationClient::new(&MeshConfig {
            endpoint: "http://127.0.0.1:1".into(),
            ..Default::default()
        })
        .unwrap();
        let err = client
            .invoke("web-search-agent", "q", false, &[], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::PeerUnavailable { .. }));
    }
}
