//! Generic HTTP-based reasoning provider for OpenAI-compatible APIs.
//!
//! Supports two URL layouts (see [`ApiStyle`]):
//! - `openai`: `{apiBase}/chat/completions`, Bearer auth, model in the body
//! - `deployments`: `{apiBase}/openai/deployments/{model}/chat/completions`,
//!   `Api-Key` header, model selected by the path

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error, warn};

use agentmesh_core::config::{ApiStyle, ProviderConfig};
use agentmesh_core::error::ProviderError;
use agentmesh_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition,
};

use crate::traits::{LlmProvider, LlmRequestConfig};

// ─────────────────────────────────────────────
// HttpProvider
// ─────────────────────────────────────────────

/// A reasoning provider that talks to any OpenAI-compatible HTTP API.
pub struct HttpProvider {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// API key (Bearer or `Api-Key`, depending on style).
    api_key: String,
    /// URL layout.
    api_style: ApiStyle,
    /// Default model for this provider instance.
    default_model: String,
    /// Extra headers to send with each request.
    extra_headers: HeaderMap,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("api_base", &self.api_base)
            .field("api_style", &self.api_style)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    /// Create a new HttpProvider.
    ///
    /// # Arguments
    /// * `config`: Endpoint, key, style, and extra headers
    /// * `model` : The default model (or deployment) to use
    pub fn new(config: &ProviderConfig, model: &str) -> Result<Self, ProviderError> {
        let mut extra_headers = HeaderMap::new();
        if let Some(ref headers) = config.extra_headers {
            for (key, value) in headers {
                if let (Ok(name), Ok(val)) = (
                    HeaderName::from_bytes(key.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    extra_headers.insert(name, val);
                } else {
                    warn!("Invalid header: {}={}", key, value);
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpProvider {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            api_style: config.api_style,
            default_model: model.to_string(),
            extra_headers,
        })
    }

    /// Build the full chat completions URL for a model.
    fn completions_url(&self, model: &str) -> String {
        let base = self.api_base.trim_end_matches('/');
        match self.api_style {
            ApiStyle::Openai => format!("{base}/chat/completions"),
            ApiStyle::Deployments => format!("{base}/openai/deployments/{model}/chat/completions"),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> Result<LlmResponse, ProviderError> {
        let tools = tools.filter(|t| !t.is_empty());

        debug!(
            model = %model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "Calling LLM"
        );

        let request_body = ChatCompletionRequest {
            model: match self.api_style {
                ApiStyle::Openai => Some(model.to_string()),
                ApiStyle::Deployments => None,
            },
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let mut request = self
            .client
            .post(self.completions_url(model))
            .headers(self.extra_headers.clone())
            .json(&request_body);
        if !self.api_key.is_empty() {
            request = match self.api_style {
                ApiStyle::Openai => request.bearer_auth(&self.api_key),
                ApiStyle::Deployments => request.header("Api-Key", &self.api_key),
            };
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "HTTP request failed");
            ProviderError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(status = %status, body = %body, "API error");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat_resp = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "Failed to parse LLM response");
            ProviderError::Parse(e.to_string())
        })?;

        let llm_resp: LlmResponse = chat_resp.into();
        debug!(
            has_content = llm_resp.content.is_some(),
            tool_calls = llm_resp.tool_calls.len(),
            finish_reason = llm_resp.finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );
        Ok(llm_resp)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        match self.api_style {
            ApiStyle::Openai => "OpenAI-compatible",
            ApiStyle::Deployments => "Deployments",
        }
    }
}

/// Build an HttpProvider from config, failing when no API key is set.
pub fn create_provider(config: &ProviderConfig, model: &str) -> Result<HttpProvider, ProviderError> {
    if !config.is_configured() {
        return Err(ProviderError::NotConfigured(format!(
            "no API key for {}. Set AGENTMESH_PROVIDER__API_KEY (or DIAL_API_KEY).",
            config.api_base
        )));
    }

    debug!(
        model = model,
        api_base = %config.api_base,
        style = ?config.api_style,
        "Creating LLM provider"
    );

    HttpProvider::new(config, model)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(api_key: &str, api_base: &str, api_style: ApiStyle) -> ProviderConfig {
        ProviderConfig {
            api_key: api_key.to_string(),
            api_base: api_base.to_string(),
            api_style,
            ..Default::default()
        }
    }

    // ── Unit tests ──

    #[test]
    fn test_completions_url_openai_trailing_slash() {
        let config = make_config("key", "https://api.openai.com/v1/", ApiStyle::Openai);
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();
        assert_eq!(
            provider.completions_url("gpt-4o"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_completions_url_deployments() {
        let config = make_config("key", "http://localhost:8080", ApiStyle::Deployments);
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();
        assert_eq!(
            provider.completions_url("gpt-4o"),
            "http://localhost:8080/openai/deployments/gpt-4o/chat/completions"
        );
    }

    #[test]
    fn test_extra_headers() {
        let mut headers = HashMap::new();
        headers.insert("X-App-Code".to_string(), "my-app-code".to_string());
        let config = ProviderConfig {
            api_key: "key".to_string(),
            extra_headers: Some(headers),
            ..Default::default()
        };
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();
        assert!(provider.extra_headers.contains_key("x-app-code"));
    }

    #[test]
    fn test_create_provider_requires_key() {
        let err = create_provider(&ProviderConfig::default(), "gpt-4o").unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(err.to_string().contains("AGENTMESH_PROVIDER__API_KEY"));
    }

    // ── Integration tests with mock server ──

    #[tokio::test]
    async fn test_chat_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-test",
                "choices": [{
                    "message": { "content": "Hello!", "tool_calls": null },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
            })))
            .mount(&mock_server)
            .await;

        let config = make_config("test-key-123", &mock_server.uri(), ApiStyle::Openai);
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();

        let resp = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap();

        assert_eq!(resp.content.as_deref(), Some("Hello!"));
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.usage.as_ref().unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_chat_deployments_style_with_tools() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(header("Api-Key", "dial-key"))
            .and(body_partial_json(serde_json::json!({ "tool_choice": "auto" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc123",
                            "type": "function",
                            "function": { "name": "web_search_agent", "arguments": "{\"prompt\":\"rust\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&mock_server)
            .await;

        let config = make_config("dial-key", &mock_server.uri(), ApiStyle::Deployments);
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();

        let tool_def = ToolDefinition::new(
            "web_search_agent",
            "Search the web",
            serde_json::json!({"type": "object", "properties": {"prompt": {"type": "string"}}}),
        );

        let resp = provider
            .chat(
                &[Message::user("Search for Rust")],
                Some(&[tool_def]),
                "gpt-4o",
                &LlmRequestConfig::default(),
            )
            .await
            .unwrap();

        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_abc123");
    }

    #[tokio::test]
    async fn test_chat_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded", "type": "rate_limit_error" }
            })))
            .mount(&mock_server)
            .await;

        let config = make_config("key", &mock_server.uri(), ApiStyle::Openai);
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();

        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("Rate limit exceeded"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_network_error() {
        let config = make_config("key", "http://127.0.0.1:1", ApiStyle::Openai);
        let provider = HttpProvider::new(&config, "gpt-4o").unwrap();

        let err = provider
            .chat(&[Message::user("Hello")], None, "gpt-4o", &LlmRequestConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[tokio::test]
    async fn test_chat_sends_correct_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 4096
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "ok" }, "finish_reason": "stop" }]
            })))
            .mount(&mock_server)
            .await;

        let config = make_config("key", &mock_server.uri(), ApiStyle::Openai);
        let provider = HttpProvider::new(&config, "gpt-4o-mini").unwrap();

        // If the body matcher fails, wiremock returns 404 → we'd get an error
        let resp = provider
            .chat(&[Message::user("test")], None, "gpt-4o-mini", &LlmRequestConfig::default())
            .await
            .unwrap();
        assert_eq!(resp.content.as_deref(), Some("ok"));
    }
}
