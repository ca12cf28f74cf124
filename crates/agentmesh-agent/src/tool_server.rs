//! Tool-server client: discovery and invocation against one MCP server.
//!
//! Speaks JSON-RPC 2.0 over the streamable-HTTP transport:
//! 1. `initialize` (the server may answer with an `Mcp-Session-Id` header)
//! 2. `notifications/initialized`
//! 3. `tools/list` (paginated by `nextCursor`) and `tools/call`
//!
//! Replies are either `application/json` or a `text/event-stream` whose
//! `data:` lines carry the JSON-RPC message.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use agentmesh_core::config::ToolServerConfig;
use agentmesh_core::error::{CapabilityError, DiscoveryError};

use crate::schema::ArgumentSchema;

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Upper bound on `tools/list` pages read in one discovery.
pub const MAX_CATALOG_PAGES: usize = 100;

// ─────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────

/// One tool advertised by a server.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    /// Tool name on the server.
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments (`inputSchema`).
    pub parameters: Value,
}

impl CatalogEntry {
    fn from_wire(server: &str, raw: &Value) -> Result<Self, DiscoveryError> {
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DiscoveryError::Malformed {
                server: server.to_string(),
                message: format!("catalog entry without a name: {raw}"),
            })?;
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let parameters = raw
            .get("inputSchema")
            .filter(|s| s.is_object())
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

        Ok(CatalogEntry {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        })
    }
}

// ─────────────────────────────────────────────
// Transport failures
// ─────────────────────────────────────────────

#[derive(Debug)]
enum RpcFailure {
    Transport(String),
    Timeout,
    /// 404 on a request that carried a session id.
    SessionExpired,
    Http { status: u16, body: String },
    Malformed(String),
    /// JSON-RPC `error` object.
    Rpc { message: String, error: Value },
}

impl RpcFailure {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RpcFailure::Timeout
        } else {
            RpcFailure::Transport(e.to_string())
        }
    }
}

// ─────────────────────────────────────────────
// ToolServerClient
// ─────────────────────────────────────────────

/// Client for a single tool server. Shared (`Arc`) by every capability the
/// server contributes; safe for concurrent invocations.
pub struct ToolServerClient {
    name: String,
    url: String,
    timeout_secs: u64,
    http: reqwest::Client,
    /// Current session. Replaced wholesale when the server expires it.
    session: RwLock<Arc<OnceCell<Option<String>>>>,
    catalog: RwLock<Vec<CatalogEntry>>,
    schemas: RwLock<HashMap<String, Arc<ArgumentSchema>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ToolServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerClient")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish()
    }
}

impl ToolServerClient {
    /// Build a client from config. Fails only if the HTTP client cannot be built.
    pub fn new(config: &ToolServerConfig) -> Result<Self, DiscoveryError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => warn!(server = %config.name, header = %key, "ignoring invalid header"),
            }
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| DiscoveryError::Transport {
                server: config.name.clone(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            timeout_secs: config.timeout_secs,
            http,
            session: RwLock::new(Arc::new(OnceCell::new())),
            catalog: RwLock::new(Vec::new()),
            schemas: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of the catalog from the last successful discovery.
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.catalog
            .read()
            .map(|c| c.to_vec())
            .unwrap_or_default()
    }

    /// Retrieve every catalog entry, following `nextCursor` pages.
    pub async fn discover_catalog(&self) -> Result<Vec<CatalogEntry>, DiscoveryError> {
        info!(server = %self.name, url = %self.url, "discovering tool catalog");

        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();
        for page in 1.. {
            if page > MAX_CATALOG_PAGES {
                return Err(self.malformed(format!(
                    "catalog exceeds {MAX_CATALOG_PAGES} pages"
                )));
            }
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self
                .rpc("tools/list", params)
                .await
                .map_err(|f| self.discovery_error(f))?;

            let tools = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| self.malformed("tools/list result has no 'tools' array".into()))?;
            for raw in tools {
                entries.push(CatalogEntry::from_wire(&self.name, raw)?);
            }

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            match &cursor {
                None => break,
                Some(c) if !seen_cursors.insert(c.clone()) => {
                    return Err(self.malformed(format!("tools/list repeated cursor '{c}'")));
                }
                Some(_) => debug!(server = %self.name, page, "fetching next catalog page"),
            }
        }

        let schemas: HashMap<String, Arc<ArgumentSchema>> = entries
            .iter()
            .map(|e| {
                (
                    e.name.clone(),
                    Arc::new(ArgumentSchema::compile(&e.name, &e.parameters)),
                )
            })
            .collect();
        if let Ok(mut guard) = self.schemas.write() {
            *guard = schemas;
        }
        if let Ok(mut guard) = self.catalog.write() {
            *guard = entries.clone();
        }

        info!(server = %self.name, tools = entries.len(), "tool catalog discovered");
        Ok(entries)
    }

    /// Call `tool_name` on the server.
    ///
    /// Arguments are validated against the discovered schema first; a
    /// mismatch never reaches the network. Tools missing from the cached
    /// catalog are sent as-is and left to the server to reject.
    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<String, CapabilityError> {
        let schema = self
            .schemas
            .read()
            .ok()
            .and_then(|s| s.get(tool_name).cloned());
        if let Some(schema) = schema {
            schema.validate(tool_name, &arguments)?;
        }

        debug!(server = %self.name, tool = tool_name, "calling remote tool");
        let result = self
            .rpc("tools/call", json!({ "name": tool_name, "arguments": arguments }))
            .await
            .map_err(|f| self.invocation_error(tool_name, f))?;

        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            return Err(CapabilityError::Invocation {
                capability: tool_name.to_string(),
                message: render_content(&result),
                payload: Some(result),
            });
        }
        Ok(render_content(&result))
    }

    // ── JSON-RPC plumbing ──

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        let mut retried = false;
        loop {
            let cell = self.current_session();
            let session = cell
                .get_or_try_init(|| self.initialize())
                .await?
                .clone();

            match self.request(method, params.clone(), session.as_deref()).await {
                Err(RpcFailure::SessionExpired) if !retried => {
                    warn!(server = %self.name, "session expired; reinitializing");
                    self.reset_session(&cell);
                    retried = true;
                }
                other => return other,
            }
        }
    }

    fn current_session(&self) -> Arc<OnceCell<Option<String>>> {
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in a fresh session cell unless another caller already did.
    fn reset_session(&self, stale: &Arc<OnceCell<Option<String>>>) {
        if let Ok(mut guard) = self.session.write() {
            if Arc::ptr_eq(&*guard, stale) {
                *guard = Arc::new(OnceCell::new());
            }
        }
    }

    async fn initialize(&self) -> Result<Option<String>, RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "agentmesh",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }
        });

        let response = self.post(&body, None).await?;
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        read_reply(response, id).await?;

        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        });
        let ack = self.post(&notification, session.as_deref()).await?;
        if !ack.status().is_success() {
            warn!(server = %self.name, status = %ack.status(), "initialized notification was not accepted");
        }

        debug!(server = %self.name, session = ?session, "tool server session established");
        Ok(session)
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        session: Option<&str>,
    ) -> Result<Value, RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.post(&body, session).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND && session.is_some() {
            return Err(RpcFailure::SessionExpired);
        }
        read_reply(response, id).await
    }

    async fn post(&self, body: &Value, session: Option<&str>) -> Result<reqwest::Response, RpcFailure> {
        let mut request = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        request.send().await.map_err(RpcFailure::from_reqwest)
    }

    fn malformed(&self, message: String) -> DiscoveryError {
        DiscoveryError::Malformed {
            server: self.name.clone(),
            message,
        }
    }

    fn discovery_error(&self, failure: RpcFailure) -> DiscoveryError {
        let server = self.name.clone();
        match failure {
            RpcFailure::Transport(message) => DiscoveryError::Transport { server, message },
            RpcFailure::Timeout => DiscoveryError::Timeout {
                server,
                seconds: self.timeout_secs,
            },
            RpcFailure::SessionExpired => DiscoveryError::Server {
                server,
                message: "session expired twice in a row".to_string(),
            },
            RpcFailure::Http { status, body } => DiscoveryError::Server {
                server,
                message: format!("HTTP {status}: {body}"),
            },
            RpcFailure::Malformed(message) => DiscoveryError::Malformed { server, message },
            RpcFailure::Rpc { message, .. } => DiscoveryError::Server { server, message },
        }
    }

    fn invocation_error(&self, tool_name: &str, failure: RpcFailure) -> CapabilityError {
        let capability = tool_name.to_string();
        match failure {
            RpcFailure::Transport(message) => CapabilityError::invocation(
                capability,
                format!("tool server '{}' unreachable: {message}", self.name),
            ),
            RpcFailure::Timeout => CapabilityError::invocation(
                capability,
                format!("tool server '{}' timed out after {}s", self.name, self.timeout_secs),
            ),
            RpcFailure::SessionExpired => {
                CapabilityError::invocation(capability, "tool server session expired")
            }
            RpcFailure::Http { status, body } => {
                CapabilityError::invocation(capability, format!("HTTP {status}: {body}"))
            }
            RpcFailure::Malformed(message) => CapabilityError::invocation(capability, message),
            RpcFailure::Rpc { message, error } => CapabilityError::Invocation {
                capability,
                message,
                payload: Some(error),
            },
        }
    }
}

// ─────────────────────────────────────────────
// Reply parsing
// ─────────────────────────────────────────────

async fn read_reply(response: reqwest::Response, id: u64) -> Result<Value, RpcFailure> {
    let status = response.status();
    let is_sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));
    let text = response.text().await.map_err(RpcFailure::from_reqwest)?;

    if !status.is_success() {
        return Err(RpcFailure::Http {
            status: status.as_u16(),
            body: text,
        });
    }

    let message = if is_sse {
        find_sse_message(&text, id)
            .ok_or_else(|| RpcFailure::Malformed(format!("no event-stream reply with id {id}")))?
    } else {
        serde_json::from_str::<Value>(&text)
            .map_err(|e| RpcFailure::Malformed(format!("invalid JSON-RPC reply: {e}")))?
    };

    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("tool server returned an error")
            .to_string();
        return Err(RpcFailure::Rpc {
            message: text,
            error: error.clone(),
        });
    }
    message
        .get("result")
        .cloned()
        .ok_or_else(|| RpcFailure::Malformed("JSON-RPC reply has neither result nor error".to_string()))
}

/// Find the JSON-RPC message with `id` in an event-stream body.
///
/// Events are separated by blank lines; multiple `data:` lines in one event
/// are joined with newlines.
pub(crate) fn find_sse_message(body: &str, id: u64) -> Option<Value> {
    let normalized = body.replace("\r\n", "\n");
    normalized.split("\n\n").find_map(|event| {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();
        if data.is_empty() {
            return None;
        }
        let message: Value = serde_json::from_str(&data.join("\n")).ok()?;
        (message.get("id").and_then(Value::as_u64) == Some(id)).then_some(message)
    })
}

/// Concatenate `text` content parts; other part types are rendered as JSON.
fn render_content(result: &Value) -> String {
    let Some(parts) = result.get("content").and_then(Value::as_array) else {
        return result.to_string();
    };
    parts
        .iter()
        .map(|part| match part.get("type").and_then(Value::as_str) {
            Some("text") => part
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
