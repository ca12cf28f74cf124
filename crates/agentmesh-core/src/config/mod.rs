//! Configuration system: schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use agentmesh_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Deployment: {}", cfg.agent.deployment_name);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{apply_env_overrides, get_config_path, load_config};
pub use schema::{
    AgentConfig, ApiStyle, Config, DiscoveryConfig, DiscoveryFailurePolicy, GatewayConfig,
    MeshConfig, PeerAgentConfig, ProviderConfig, ToolServerConfig,
};
