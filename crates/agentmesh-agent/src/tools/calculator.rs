//! `simple_calculator`: arithmetic on two numbers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_f64, require_string, Tool};

/// Adds, subtracts, multiplies, or divides two numbers.
pub struct SimpleCalculatorTool;

#[async_trait]
impl Tool for SimpleCalculatorTool {
    fn name(&self) -> &str {
        "simple_calculator"
    }

    fn description(&self) -> &str {
        "Performs a basic arithmetic operation (add, subtract, multiply, divide) on two numbers."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide"],
                    "description": "The operation to perform"
                },
                "a": { "type": "number", "description": "First operand" },
                "b": { "type": "number", "description": "Second operand" }
            },
            "required": ["operation", "a", "b"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let operation = require_string(&params, "operation")?;
        let a = require_f64(&params, "a")?;
        let b = require_f64(&params, "b")?;

        let result = match operation.as_str() {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" => {
                if b == 0.0 {
                    anyhow::bail!("Division by zero");
                }
                a / b
            }
            other => anyhow::bail!("Unsupported operation: {other}"),
        };

        Ok(format_number(result))
    }
}

/// Render whole numbers without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Look up a built-in tool by configured name.
pub fn builtin_tool(name: &str) -> Option<std::sync::Arc<dyn Tool>> {
    match name {
        "simple_calculator" => Some(std::sync::Arc::new(SimpleCalculatorTool)),
        _ => None,
    }
}
