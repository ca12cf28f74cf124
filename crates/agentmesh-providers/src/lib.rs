//! Reasoning provider layer for AgentMesh.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`]: trait that all providers implement
//! - [`http_provider::HttpProvider`]: OpenAI-compatible HTTP client
//! - [`http_provider::create_provider`]: convenience builder from config

pub mod http_provider;
pub mod traits;

// Re-export main types for convenience
pub use http_provider::{create_provider, HttpProvider};
pub use traits::{LlmProvider, LlmRequestConfig};
