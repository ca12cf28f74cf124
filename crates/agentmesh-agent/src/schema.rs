//! Argument validation against a capability's JSON Schema.

use jsonschema::JSONSchema;
use serde_json::Value;
use tracing::warn;

use agentmesh_core::error::CapabilityError;

/// A compiled parameter schema.
///
/// Schemas that fail to compile (some tool servers ship loose ones) are kept
/// as `None` and accept any JSON object.
pub struct ArgumentSchema {
    compiled: Option<JSONSchema>,
}

impl ArgumentSchema {
    /// Compile `schema`, logging and falling back to object-only checking on failure.
    pub fn compile(capability: &str, schema: &Value) -> Self {
        let compiled = match JSONSchema::compile(schema) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                warn!(capability = capability, error = %e, "parameter schema does not compile; skipping validation");
                None
            }
        };
        Self { compiled }
    }

    /// Validate `args`, returning `InvalidArguments` listing every violation.
    pub fn validate(&self, capability: &str, args: &Value) -> Result<(), CapabilityError> {
        if !args.is_object() {
            return Err(CapabilityError::invalid_arguments(
                capability,
                "arguments must be a JSON object",
            ));
        }
        let Some(compiled) = &self.compiled else {
            return Ok(());
        };
        if let Err(errors) = compiled.validate(args) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(CapabilityError::invalid_arguments(capability, messages.join("; ")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArgumentSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentSchema")
            .field("compiled", &self.compiled.is_some())
            .finish()
    }
}
