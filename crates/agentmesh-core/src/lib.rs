//! AgentMesh core: shared types, error taxonomy, config, and utilities.

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use error::{CapabilityError, DiscoveryError, ProviderError, RegistryError, TurnError};
pub use types::{ChatCompletionResponse, ChatRequest, LlmResponse, Message, ToolCall, ToolDefinition};
