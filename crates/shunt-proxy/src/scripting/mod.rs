//! User-script execution against request/response contexts.
//!
//! Scripts are Rhai, compiled once to an [`rhai::AST`] through the script
//! cache and executed with a fresh engine per invocation. Each invocation is
//! bounded by a wall-clock budget; scripts see only the documented bindings
//! and have no filesystem, network, or process access.

mod engine;

pub use engine::{
    eval_expression, run_body_transform, run_response_script, run_validation_script,
};

use rhai::AST;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Wall-clock budget for a single script invocation. Long-running user
/// scripts degrade only their own request; the budget bounds the worst case.
pub const SCRIPT_WALL_BUDGET: Duration = Duration::from_millis(500);

/// A script compiled to an AST, or a sentinel for source that failed to
/// compile (reported once, never retried until the cache is invalidated).
pub enum CompiledProgram {
    Ready(AST),
    Invalid,
}

impl CompiledProgram {
    pub fn compile(source: &str) -> Self {
        match engine::compiler().compile(source) {
            Ok(ast) => CompiledProgram::Ready(ast),
            Err(e) => {
                warn!(error = %e, "script failed to compile; rule will never produce a script result");
                CompiledProgram::Invalid
            }
        }
    }

    pub fn ast(&self) -> Option<&AST> {
        match self {
            CompiledProgram::Ready(ast) => Some(ast),
            CompiledProgram::Invalid => None,
        }
    }
}

/// Read-only request context exposed to scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Path parameters bound by the matched rule's pattern.
    pub params: HashMap<String, String>,
    /// Variables extracted by request validation.
    pub vars: HashMap<String, String>,
    pub body: String,
}

/// Mutable response context for `script` response mode. The script's final
/// field values are what gets emitted.
#[derive(Debug, Clone)]
pub struct ScriptResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub delay_ms: u64,
}

impl Default for ScriptResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: String::new(),
            delay_ms: 0,
        }
    }
}

/// Outcome of a validation script.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub vars: HashMap<String, String>,
}
