//! Config loader: reads `~/.agentmesh/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.agentmesh/config.json`
//! 3. Legacy env vars (`DIAL_ENDPOINT`, `DEPLOYMENT_NAME`, `DDG_MCP_URL`, …)
//! 4. Environment variables `AGENTMESH_<SECTION>__<FIELD>` (override everything)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{ApiStyle, Config, DiscoveryFailurePolicy, ToolServerConfig};

/// Legacy env vars naming tool-server URLs, with the server name they map to.
const LEGACY_TOOL_SERVER_VARS: &[(&str, &str)] = &[
    ("DDG_MCP_URL", "ddg_search"),
    ("PYINTERPRETER_MCP_URL", "python_interpreter"),
];

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the given (or default) path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    let config = load_config_from_path(&config_path);
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Load config from a specific file path, without env overrides.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str::<Config>(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            Config::default()
        }
    }
}

/// Apply environment overrides on top of a loaded config.
///
/// `lookup` resolves a variable name to its value (normally `std::env::var`).
///
/// Supported overrides:
/// - `AGENTMESH_AGENT__DEPLOYMENT_NAME`, `__MODEL`, `__SYSTEM_PROMPT`,
///   `__MAX_TOOL_ITERATIONS`, `__TURN_TIMEOUT_SECS`, `__MAX_PEER_DEPTH`
/// - `AGENTMESH_PROVIDER__API_KEY`, `__API_BASE`, `__API_STYLE`
/// - `AGENTMESH_MESH__ENDPOINT`, `__API_KEY`
/// - `AGENTMESH_DISCOVERY__FAILURE_POLICY` (`retry` | `fatal`)
/// - `AGENTMESH_GATEWAY__HOST`, `__PORT`
pub fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    apply_legacy_env(&mut config, &lookup);

    // Agent
    if let Some(val) = lookup("AGENTMESH_AGENT__DEPLOYMENT_NAME") {
        config.agent.deployment_name = val;
    }
    if let Some(val) = lookup("AGENTMESH_AGENT__MODEL") {
        config.agent.model = val;
    }
    if let Some(val) = lookup("AGENTMESH_AGENT__SYSTEM_PROMPT") {
        config.agent.system_prompt = val;
    }
    if let Some(n) = lookup("AGENTMESH_AGENT__MAX_TOOL_ITERATIONS").and_then(|v| v.parse().ok()) {
        config.agent.max_tool_iterations = n;
    }
    if let Some(n) = lookup("AGENTMESH_AGENT__TURN_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.agent.turn_timeout_secs = n;
    }
    if let Some(n) = lookup("AGENTMESH_AGENT__MAX_PEER_DEPTH").and_then(|v| v.parse().ok()) {
        config.agent.max_peer_depth = n;
    }

    // Provider
    if let Some(val) = lookup("AGENTMESH_PROVIDER__API_KEY") {
        config.provider.api_key = val;
    }
    if let Some(val) = lookup("AGENTMESH_PROVIDER__API_BASE") {
        config.provider.api_base = val;
    }
    if let Some(val) = lookup("AGENTMESH_PROVIDER__API_STYLE") {
        match val.to_lowercase().as_str() {
            "openai" => config.provider.api_style = ApiStyle::Openai,
            "deployments" => config.provider.api_style = ApiStyle::Deployments,
            other => warn!("Ignoring unknown AGENTMESH_PROVIDER__API_STYLE: {other}"),
        }
    }

    // Mesh
    if let Some(val) = lookup("AGENTMESH_MESH__ENDPOINT") {
        config.mesh.endpoint = val;
    }
    if let Some(val) = lookup("AGENTMESH_MESH__API_KEY") {
        config.mesh.api_key = val;
    }

    // Discovery
    if let Some(val) = lookup("AGENTMESH_DISCOVERY__FAILURE_POLICY") {
        match val.to_lowercase().as_str() {
            "retry" => config.discovery.failure_policy = DiscoveryFailurePolicy::Retry,
            "fatal" => config.discovery.failure_policy = DiscoveryFailurePolicy::Fatal,
            other => warn!("Ignoring unknown AGENTMESH_DISCOVERY__FAILURE_POLICY: {other}"),
        }
    }

    // Gateway
    if let Some(val) = lookup("AGENTMESH_GATEWAY__HOST") {
        config.gateway.host = val;
    }
    if let Some(p) = lookup("AGENTMESH_GATEWAY__PORT").and_then(|v| v.parse().ok()) {
        config.gateway.port = p;
    }

    config
}

/// Honour the env vars the first generation of mesh agents was deployed with.
fn apply_legacy_env<F>(config: &mut Config, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(endpoint) = lookup("DIAL_ENDPOINT") {
        config.mesh.endpoint = endpoint.clone();
        config.provider.api_base = endpoint;
        config.provider.api_style = ApiStyle::Deployments;
    }
    if let Some(key) = lookup("DIAL_API_KEY") {
        config.mesh.api_key = key.clone();
        config.provider.api_key = key;
    }
    if let Some(model) = lookup("DEPLOYMENT_NAME") {
        config.agent.model = model;
    }

    for (var, name) in LEGACY_TOOL_SERVER_VARS {
        let Some(url) = lookup(var) else { continue };
        if config.tool_servers.iter().any(|s| s.url == url) {
            continue;
        }
        debug!(server = name, url = %url, "adding tool server from {var}");
        config.tool_servers.push(ToolServerConfig {
            name: name.to_string(),
            url,
            ..Default::default()
        });
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
