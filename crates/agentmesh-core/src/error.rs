//! Error taxonomy for the dispatch core.
//!
//! Capability-level errors ([`CapabilityError`]) are folded into the
//! conversation as tool results and never end a turn. Registry errors,
//! reasoning failures, and budget exhaustion end the turn ([`TurnError`]).

use serde_json::Value;
use thiserror::Error;

/// Failure while retrieving a tool server's catalog.
///
/// `Clone` so a single failed discovery can be handed to every waiter.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DiscoveryError {
    #[error("tool server '{server}' unreachable: {message}")]
    Transport { server: String, message: String },

    #[error("tool server '{server}' returned a malformed catalog: {message}")]
    Malformed { server: String, message: String },

    #[error("tool server '{server}' timed out after {seconds}s")]
    Timeout { server: String, seconds: u64 },

    #[error("tool server '{server}' rejected discovery: {message}")]
    Server { server: String, message: String },
}

/// Registry integrity errors. Fatal to the request.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("capability '{0}' is already registered")]
    DuplicateCapability(String),

    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("capability discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Failure of a single capability invocation. Never fatal to the turn.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("invalid arguments for '{capability}': {message}")]
    InvalidArguments { capability: String, message: String },

    #[error("invocation of '{capability}' failed: {message}")]
    Invocation {
        capability: String,
        message: String,
        /// Upstream error payload, when the backend supplied one.
        payload: Option<Value>,
    },

    #[error("peer agent '{peer}' is unavailable: {message}")]
    PeerUnavailable { peer: String, message: String },

    #[error("peer agent '{peer}' responded with an error ({status}): {message}")]
    PeerErrorResponse {
        peer: String,
        status: u16,
        message: String,
    },

    #[error("peer agent '{peer}' returned no final answer: {message}")]
    MalformedPeerResponse { peer: String, message: String },
}

impl CapabilityError {
    /// Build an `Invocation` error without an upstream payload.
    pub fn invocation(capability: impl Into<String>, message: impl Into<String>) -> Self {
        CapabilityError::Invocation {
            capability: capability.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Build an `InvalidArguments` error.
    pub fn invalid_arguments(capability: impl Into<String>, message: impl Into<String>) -> Self {
        CapabilityError::InvalidArguments {
            capability: capability.into(),
            message: message.into(),
        }
    }

    /// Text folded into the conversation so the model can react to it.
    pub fn to_tool_result(&self) -> String {
        match self {
            CapabilityError::Invocation {
                payload: Some(payload),
                ..
            } => format!("Error: {self}\nDetails: {payload}"),
            _ => format!("Error: {self}"),
        }
    }
}

/// Failure of the reasoning function itself.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("reasoning provider is not configured: {0}")]
    NotConfigured(String),

    #[error("reasoning request failed: {0}")]
    Transport(String),

    #[error("reasoning endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not parse reasoning response: {0}")]
    Parse(String),

    #[error("reasoning response contained neither an answer nor tool calls")]
    Empty,
}

/// Terminal failure of a conversation turn.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Reasoning(#[from] ProviderError),

    #[error("reasoning loop exceeded {limit} round trips without a final answer")]
    LoopExceeded { limit: usize },

    #[error("peer call depth {depth} exceeds the limit of {limit}")]
    DepthExceeded { depth: u32, limit: u32 },

    #[error("turn timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("request contains no messages")]
    EmptyRequest,
}

impl TurnError {
    /// Short machine-readable code for error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::Registry(RegistryError::DuplicateCapability(_)) => "duplicate_capability",
            TurnError::Registry(RegistryError::UnknownCapability(_)) => "unknown_capability",
            TurnError::Registry(RegistryError::Discovery(_)) => "discovery_failed",
            TurnError::Reasoning(_) => "reasoning_failed",
            TurnError::LoopExceeded { .. } => "loop_exceeded",
            TurnError::DepthExceeded { .. } => "depth_exceeded",
            TurnError::TimedOut { .. } => "timeout",
            TurnError::EmptyRequest => "invalid_request",
        }
    }
}
