//! Request validation: one terminal pass per request.
//!
//! A failing validation means "this rule does not match" — the matcher moves
//! on to the next candidate. It is never a dispatch error.

use std::collections::HashMap;

use crate::cache::Caches;
use crate::config::{RequestValidation, StaticMatchType};
use crate::pattern::CompiledBodyPattern;
use crate::scripting::{
    run_validation_script, CompiledProgram, ScriptRequest, SCRIPT_WALL_BUDGET,
};
use tracing::debug;

/// Validation verdict plus any extracted variables, later visible to the
/// response generator as `vars`.
#[derive(Debug, Clone, Default)]
pub struct Verdict {
    pub valid: bool,
    pub vars: HashMap<String, String>,
}

impl Verdict {
    fn pass() -> Self {
        Self {
            valid: true,
            vars: HashMap::new(),
        }
    }

    fn fail() -> Self {
        Self::default()
    }
}

/// Apply a validation policy to a request.
pub fn validate(
    validation: &RequestValidation,
    request: &ScriptRequest,
    caches: &Caches,
) -> Verdict {
    match validation {
        RequestValidation::None => Verdict::pass(),

        RequestValidation::Static {
            pattern,
            match_type,
        } => {
            let matched = match match_type {
                StaticMatchType::Exact => request.body == *pattern,
                StaticMatchType::Contains => request.body.contains(pattern.as_str()),
            };
            if matched {
                Verdict::pass()
            } else {
                Verdict::fail()
            }
        }

        RequestValidation::Regex { pattern } => {
            let compiled = caches
                .body_patterns
                .get_or_compile(pattern, CompiledBodyPattern::compile);
            match compiled.captures(&request.body) {
                Some(vars) => Verdict { valid: true, vars },
                None => Verdict::fail(),
            }
        }

        RequestValidation::Script { script } => {
            let program = caches.scripts.get_or_compile(script, CompiledProgram::compile);
            let Some(ast) = program.ast() else {
                // Compile failure was already reported; the rule never matches.
                return Verdict::fail();
            };
            match run_validation_script(ast, request, SCRIPT_WALL_BUDGET) {
                Ok(outcome) => Verdict {
                    valid: outcome.valid,
                    vars: outcome.vars,
                },
                Err(e) => {
                    // Script exceptions are validation failures, not errors.
                    debug!(error = %e, "validation script failed; treating as non-match");
                    Verdict::fail()
                }
            }
        }
    }
}
