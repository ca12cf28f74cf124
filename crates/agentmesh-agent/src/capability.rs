//! Capability: the single invokable interface the reasoning loop sees.
//!
//! Three backends hide behind one descriptor:
//! - [`CapabilityKind::Local`]: an in-process [`Tool`]
//! - [`CapabilityKind::RemoteService`]: a tool on a discovered tool server
//! - [`CapabilityKind::PeerAgent`]: a nested request to another agent
//!
//! The model only ever sees `{name, description, parameters}`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use agentmesh_core::config::PeerAgentConfig;
use agentmesh_core::error::CapabilityError;
use agentmesh_core::types::{Message, ToolDefinition};

use crate::peer::{peer_parameters, AgentInvocationClient};
use crate::schema::ArgumentSchema;
use crate::tool_server::{CatalogEntry, ToolServerClient};
use crate::tools::Tool;

/// Per-invocation view of the turn.
#[derive(Clone, Copy, Debug)]
pub struct InvocationContext<'a> {
    /// Conversation so far (without the pending tool results).
    pub history: &'a [Message],
    /// Mesh depth of the request being served.
    pub depth: u32,
}

/// Backend a capability routes to.
pub enum CapabilityKind {
    Local(Arc<dyn Tool>),
    RemoteService {
        client: Arc<ToolServerClient>,
        /// Tool name on the server.
        tool_name: String,
    },
    PeerAgent {
        deployment: String,
        /// Used when the model does not pass `propagate_history`.
        propagate_history: bool,
        client: Arc<AgentInvocationClient>,
    },
}

/// A named, described, schema-validated unit of invocation.
pub struct Capability {
    name: String,
    description: String,
    parameters: Value,
    schema: ArgumentSchema,
    kind: CapabilityKind,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("kind", &self.kind_label())
            .finish()
    }
}

impl Capability {
    /// Wrap an in-process tool.
    pub fn local(tool: Arc<dyn Tool>) -> Self {
        let parameters = tool.parameters();
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            schema: ArgumentSchema::compile(tool.name(), &parameters),
            parameters,
            kind: CapabilityKind::Local(tool),
        }
    }

    /// Translate a catalog entry; the entry is copied, never aliased.
    pub fn remote(client: Arc<ToolServerClient>, entry: &CatalogEntry) -> Self {
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            schema: ArgumentSchema::compile(&entry.name, &entry.parameters),
            parameters: entry.parameters.clone(),
            kind: CapabilityKind::RemoteService {
                client,
                tool_name: entry.name.clone(),
            },
        }
    }

    /// Expose a peer agent. History is not propagated unless the model asks.
    pub fn peer(peer: &PeerAgentConfig, client: Arc<AgentInvocationClient>) -> Self {
        let parameters = peer_parameters(&peer.prompt_description);
        Self {
            name: peer.name.clone(),
            description: peer.description.clone(),
            schema: ArgumentSchema::compile(&peer.name, &parameters),
            parameters,
            kind: CapabilityKind::PeerAgent {
                deployment: peer.deployment.clone(),
                propagate_history: false,
                client,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Short backend label for listings and logs.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            CapabilityKind::Local(_) => "local",
            CapabilityKind::RemoteService { .. } => "remote",
            CapabilityKind::PeerAgent { .. } => "peer",
        }
    }

    /// Model-facing definition. Identical shape for every backend.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, &self.description, self.parameters.clone())
    }

    /// Run the capability.
    ///
    /// Arguments are validated against the schema before any side effect.
    pub async fn invoke(
        &self,
        args: Value,
        ctx: &InvocationContext<'_>,
    ) -> Result<String, CapabilityError> {
        debug!(capability = %self.name, kind = self.kind_label(), "invoking capability");
        self.schema.validate(&self.name, &args)?;
        match &self.kind {
            CapabilityKind::Local(tool) => {
                let params: HashMap<String, Value> = serde_json::from_value(args)
                    .map_err(|e| CapabilityError::invalid_arguments(&self.name, e.to_string()))?;
                tool.execute(params)
                    .await
                    .map_err(|e| CapabilityError::invocation(&self.name, format!("{e:#}")))
            }
            CapabilityKind::RemoteService { client, tool_name } => {
                client.invoke(tool_name, args).await
            }
            CapabilityKind::PeerAgent {
                deployment,
                propagate_history,
                client,
            } => {
                let prompt = args
                    .get("prompt")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CapabilityError::invalid_arguments(&self.name, "missing 'prompt'"))?;
                let propagate = args
                    .get("propagate_history")
                    .and_then(Value::as_bool)
                    .unwrap_or(*propagate_history);
                client
                    .invoke(deployment, prompt, propagate, ctx.history, ctx.depth)
                    .await
            }
        }
    }
}
