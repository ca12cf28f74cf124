//! Configuration schema.
//!
//! Hierarchy: `Config` → `AgentConfig`, `ProviderConfig`, `MeshConfig`,
//! `ToolServerConfig` list, `DiscoveryConfig`, `GatewayConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.agentmesh/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub mesh: MeshConfig,
    pub tool_servers: Vec<ToolServerConfig>,
    pub discovery: DiscoveryConfig,
    pub gateway: GatewayConfig,
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// Settings for the agent served by this process.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Deployment name this agent is reachable under (its mesh identity).
    pub deployment_name: String,
    /// System prompt prepended to every turn.
    pub system_prompt: String,
    /// Model / deployment used for the reasoning call.
    pub model: String,
    /// Maximum tokens to generate per reasoning call.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Maximum model ⇄ capability round trips per turn.
    pub max_tool_iterations: u32,
    /// Wall-clock budget for one turn, in seconds.
    pub turn_timeout_secs: u64,
    /// Maximum number of nested peer-agent hops a request may carry.
    pub max_peer_depth: u32,
    /// Built-in local tools to register (e.g. `"simple_calculator"`).
    pub builtin_tools: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            deployment_name: "web-search-agent".to_string(),
            system_prompt: "You are a helpful assistant that is part of a mesh of specialized \
                            agents. Use the available tools and sibling agents to answer the \
                            user's request, then reply with a concise final answer."
                .to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            max_tool_iterations: 20,
            turn_timeout_secs: 300,
            max_peer_depth: 3,
            builtin_tools: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Reasoning provider
// ─────────────────────────────────────────────

/// URL layout of the reasoning endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    /// `{apiBase}/chat/completions` with Bearer auth.
    #[default]
    Openai,
    /// `{apiBase}/openai/deployments/{model}/chat/completions` with `Api-Key`.
    Deployments,
}

/// Connection settings for the reasoning (LLM) endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,
    /// API base URL.
    pub api_base: String,
    /// URL layout.
    pub api_style: ApiStyle,
    /// Extra HTTP headers to send with each request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_style: ApiStyle::Openai,
            extra_headers: None,
            timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ─────────────────────────────────────────────
// Mesh (peer agents)
// ─────────────────────────────────────────────

/// Where peer agents live and which of them this agent may call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshConfig {
    /// Base URL peer deployments are served under.
    pub endpoint: String,
    /// Key sent as `Api-Key` on peer requests (empty = none).
    pub api_key: String,
    /// Per-request timeout for peer calls, in seconds.
    pub timeout_secs: u64,
    /// Peer agents exposed as capabilities.
    pub peers: Vec<PeerAgentConfig>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            api_key: String::new(),
            timeout_secs: 300,
            peers: Vec::new(),
        }
    }
}

/// A peer agent callable as a capability.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerAgentConfig {
    /// Capability name presented to the model (e.g. `"calculations_agent"`).
    pub name: String,
    /// Deployment name the peer is served under (e.g. `"calculations-agent"`).
    pub deployment: String,
    /// What the peer can do.
    pub description: String,
    /// Description of the `prompt` parameter.
    pub prompt_description: String,
}

// ─────────────────────────────────────────────
// Tool servers
// ─────────────────────────────────────────────

/// An external tool server discovered at first use.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolServerConfig {
    /// Short name used in logs and errors.
    pub name: String,
    /// Streamable-HTTP endpoint (e.g. `"http://localhost:8051/mcp"`).
    pub url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra headers (e.g. authorization) sent with every request.
    pub headers: HashMap<String, String>,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            timeout_secs: 30,
            headers: HashMap::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────

/// What to do after a failed capability discovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryFailurePolicy {
    /// Reset and let the next request try again.
    #[default]
    Retry,
    /// Remember the failure and report it to every later request.
    Fatal,
}

/// Discovery behaviour.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryConfig {
    pub failure_policy: DiscoveryFailurePolicy,
}

// ─────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────

/// HTTP gateway configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5003,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.max_tool_iterations, 20);
        assert_eq!(config.agent.max_peer_depth, 3);
        assert_eq!(config.agent.turn_timeout_secs, 300);
        assert_eq!(config.gateway.port, 5003);
        assert_eq!(config.discovery.failure_policy, DiscoveryFailurePolicy::Retry);
        assert!(config.tool_servers.is_empty());
    }

    #[test]
    fn test_config_from_json_camel_case() {
        let json = serde_json::json!({
            "agent": {
                "deploymentName": "calculations-agent",
                "maxToolIterations": 10,
                "builtinTools": ["simple_calculator"]
            },
            "provider": {
                "apiBase": "http://localhost:8080",
                "apiStyle": "deployments"
            },
            "mesh": {
                "endpoint": "http://dial:8080",
                "peers": [{
                    "name": "web_search_agent",
                    "deployment": "web-search-agent",
                    "description": "Searches the web",
                    "promptDescription": "Query for web search."
                }]
            },
            "toolServers": [{ "name": "ddg", "url": "http://localhost:8051/mcp" }],
            "discovery": { "failurePolicy": "fatal" }
        });

        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.agent.deployment_name, "calculations-agent");
        assert_eq!(config.agent.max_tool_iterations, 10);
        assert_eq!(config.agent.builtin_tools, vec!["simple_calculator"]);
        assert_eq!(config.provider.api_style, ApiStyle::Deployments);
        assert_eq!(config.mesh.peers[0].deployment, "web-search-agent");
        assert_eq!(config.mesh.peers[0].prompt_description, "Query for web search.");
        assert_eq!(config.tool_servers[0].timeout_secs, 30);
        assert_eq!(config.discovery.failure_policy, DiscoveryFailurePolicy::Fatal);
        // Defaults preserved for missing fields
        assert_eq!(config.agent.max_peer_depth, 3);
        assert_eq!(config.mesh.timeout_secs, 300);
    }

    #[test]
    fn test_config_json_uses_camel_case() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert!(json["agent"].get("maxToolIterations").is_some());
        assert!(json["agent"].get("turnTimeoutSecs").is_some());
        assert!(json.get("toolServers").is_some());
        assert!(json["agent"].get("max_tool_iterations").is_none());
    }

    #[test]
    fn test_provider_config_is_configured() {
        assert!(!ProviderConfig::default().is_configured());
        let with_key = ProviderConfig {
            api_key: "sk-123".to_string(),
            ..Default::default()
        };
        assert!(with_key.is_configured());
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.agent.model, "gpt-4o");
        assert_eq!(config.provider.api_style, ApiStyle::Openai);
        assert_eq!(config.gateway.host, "0.0.0.0");
    }
}
