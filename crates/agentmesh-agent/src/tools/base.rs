//! Tool trait: the in-process function behind a local capability.
//!
//! A [`Tool`] only knows how to run; argument validation against
//! [`Tool::parameters`] happens in [`crate::capability::Capability::invoke`]
//! before `execute` is called.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// An async function exposed to the model as a local capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used by the model to call this tool (e.g. `"simple_calculator"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters.
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Run the tool with already-validated arguments.
    ///
    /// Returns the output the model reads. An `Err` becomes a
    /// `CapabilityError::Invocation` folded into the conversation.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required `String` param, returning a user-friendly error.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract a required numeric param (integers are widened).
pub fn require_f64(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<f64> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| anyhow::anyhow!("Missing required numeric parameter: {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_string_present() {
        let mut params = HashMap::new();
        params.insert("prompt".into(), json!("what is 2+2"));
        assert_eq!(require_string(&params, "prompt").unwrap(), "what is 2+2");
    }

    #[test]
    fn test_require_string_wrong_type() {
        let mut params = HashMap::new();
        params.insert("prompt".into(), json!(42));
        assert!(require_string(&params, "prompt").is_err());
    }

    #[test]
    fn test_require_f64_accepts_integers() {
        let mut params = HashMap::new();
        params.insert("a".into(), json!(2));
        params.insert("b".into(), json!(2.5));
        assert_eq!(require_f64(&params, "a").unwrap(), 2.0);
        assert_eq!(require_f64(&params, "b").unwrap(), 2.5);
        assert!(require_f64(&params, "c").is_err());
    }
}
