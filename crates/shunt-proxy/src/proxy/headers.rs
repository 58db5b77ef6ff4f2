//! Header manipulation for forwarded requests and responses.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::cache::Caches;
use crate::config::{HeaderAction, HeaderManipulation};
use crate::scripting::{eval_expression, CompiledProgram, ScriptRequest, SCRIPT_WALL_BUDGET};

/// Apply manipulations to a header map, in list order. Later entries may
/// overwrite earlier ones for the same name. `expression` values are computed
/// against the original request; a failing expression leaves the header
/// untouched (reported, not fatal).
pub fn apply_manipulations(
    headers: &mut HeaderMap,
    manipulations: &[HeaderManipulation],
    request: &ScriptRequest,
    caches: &Caches,
) {
    for manipulation in manipulations {
        let Ok(name) = manipulation.name.parse::<HeaderName>() else {
            warn!(name = %manipulation.name, "invalid header name in manipulation; skipped");
            continue;
        };

        match &manipulation.action {
            HeaderAction::Drop => {
                headers.remove(&name);
            }
            HeaderAction::Replace { value } => {
                set_header(headers, &name, value);
            }
            HeaderAction::Expression { expression } => {
                let program = caches
                    .scripts
                    .get_or_compile(expression, CompiledProgram::compile);
                let Some(ast) = program.ast() else {
                    continue; // compile failure already reported
                };
                match eval_expression(ast, request, SCRIPT_WALL_BUDGET) {
                    Ok(value) => set_header(headers, &name, &value),
                    Err(e) => {
                        warn!(header = %manipulation.name, error = %e, "header expression failed; header left untouched");
                    }
                }
            }
        }
    }
}

fn set_header(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    match value.parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert(name.clone(), value);
        }
        Err(_) => {
            warn!(header = %name, "manipulation produced an invalid header value; skipped");
        }
    }
}
