//! AgentMesh agent: capabilities, registry, and the reasoning loop.
//!
//! This crate contains:
//! - **capability**: the uniform invokable interface over local tools,
//!   tool-server tools, and peer agents
//! - **registry**: capability store with single-flight lazy discovery
//! - **tool_server**: MCP client used for discovery and remote invocation
//! - **peer**: nested chat requests to sibling agents
//! - **agent_loop**: the model ⇄ capability main loop
//! - **handler**: per-request entry point (discovery, budgets, outcome)

pub mod agent_loop;
pub mod capability;
pub mod choice;
pub mod context;
pub mod handler;
pub mod peer;
pub mod registry;
pub mod schema;
pub mod tool_server;
pub mod tools;

pub use agent_loop::ReasoningLoop;
pub use capability::{Capability, CapabilityKind, InvocationContext};
pub use choice::{ChoiceEvent, ResponseChoice, Stage};
pub use context::ContextBuilder;
pub use handler::{discover_tool_servers, ChatOutcome, HandlerSettings, RequestHandler};
pub use peer::AgentInvocationClient;
pub use registry::{CapabilityRegistry, DiscoveryState};
pub use tool_server::{CatalogEntry, ToolServerClient};
pub use tools::Tool;
