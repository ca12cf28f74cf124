//! Built-in local tools.

pub mod base;
pub mod calculator;

pub use base::{require_f64, require_string, Tool};
pub use calculator::{builtin_tool, SimpleCalculatorTool};
