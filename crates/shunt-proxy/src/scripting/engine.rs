//! Rhai engine construction and script evaluation.

use anyhow::{anyhow, Result};
use rhai::{Dynamic, Engine, Map, Scope, AST};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{ScriptRequest, ScriptResponse, ValidationOutcome};

/// Engine used only for compilation (no execution budget needed).
pub(super) fn compiler() -> Engine {
    Engine::new()
}

/// Build an evaluation engine with a wall-clock budget.
///
/// The progress hook aborts evaluation once the deadline passes; everything
/// else is the default sandbox (no file/network/process access is registered).
fn eval_engine(budget: Duration) -> Engine {
    let mut engine = Engine::new();
    let deadline = Instant::now() + budget;
    engine.on_progress(move |_| {
        if Instant::now() > deadline {
            Some(Dynamic::from("script wall-clock budget exceeded"))
        } else {
            None
        }
    });
    engine
}

fn request_map(request: &ScriptRequest) -> Map {
    let mut map = Map::new();
    map.insert("method".into(), Dynamic::from(request.method.clone()));
    map.insert("path".into(), Dynamic::from(request.path.clone()));
    map.insert("body".into(), Dynamic::from(request.body.clone()));
    // The body parsed as JSON, when it is JSON; unit otherwise.
    map.insert(
        "json".into(),
        json_to_dynamic(serde_json::from_str(&request.body).unwrap_or(Value::Null)),
    );
    map.insert("headers".into(), string_map(&request.headers));
    map.insert("query".into(), string_map(&request.query));
    map.insert("params".into(), string_map(&request.params));
    map.insert("vars".into(), string_map(&request.vars));
    map
}

fn string_map(entries: &HashMap<String, String>) -> Dynamic {
    let mut map = Map::new();
    for (k, v) in entries {
        map.insert(k.clone().into(), Dynamic::from(v.clone()));
    }
    Dynamic::from(map)
}

/// Execute a response script: the script mutates a `response` object whose
/// final `status`/`headers`/`body`/`delay` values are emitted.
pub fn run_response_script(
    ast: &AST,
    request: &ScriptRequest,
    initial: ScriptResponse,
    budget: Duration,
) -> Result<ScriptResponse> {
    let engine = eval_engine(budget);
    let mut scope = Scope::new();

    let mut response = Map::new();
    response.insert("status".into(), Dynamic::from(initial.status as i64));
    response.insert("headers".into(), string_map(&initial.headers));
    response.insert("body".into(), Dynamic::from(initial.body.clone()));
    response.insert("delay".into(), Dynamic::from(initial.delay_ms as i64));

    scope.push("request", request_map(request));
    scope.push("response", response);

    engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
        .map_err(|e| anyhow!("script execution error: {e}"))?;

    let map = scope
        .get_value::<Map>("response")
        .ok_or_else(|| anyhow!("script removed the response object"))?;

    Ok(ScriptResponse {
        status: map
            .get("status")
            .and_then(|v| v.as_int().ok())
            .map(|s| s as u16)
            .unwrap_or(initial.status),
        headers: dynamic_string_map(map.get("headers")),
        body: map.get("body").map(body_to_string).unwrap_or_default(),
        delay_ms: map
            .get("delay")
            .and_then(|v| v.as_int().ok())
            .map(|d| d.max(0) as u64)
            .unwrap_or(0),
    })
}

/// Execute a validation script: the script sets `result.valid` and
/// `result.vars`. Errors are returned for the caller to treat as failure.
pub fn run_validation_script(
    ast: &AST,
    request: &ScriptRequest,
    budget: Duration,
) -> Result<ValidationOutcome> {
    let engine = eval_engine(budget);
    let mut scope = Scope::new();

    let mut result = Map::new();
    result.insert("valid".into(), Dynamic::from(false));
    result.insert("vars".into(), Dynamic::from(Map::new()));

    scope.push("body", request.body.clone());
    scope.push("request", request_map(request));
    scope.push("result", result);

    engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
        .map_err(|e| anyhow!("validation script error: {e}"))?;

    let map = scope
        .get_value::<Map>("result")
        .ok_or_else(|| anyhow!("validation script removed the result object"))?;

    Ok(ValidationOutcome {
        valid: map
            .get("valid")
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(false),
        vars: dynamic_string_map(map.get("vars")),
    })
}

/// Evaluate a header expression against the original request; the script's
/// resulting value becomes the header value.
pub fn eval_expression(ast: &AST, request: &ScriptRequest, budget: Duration) -> Result<String> {
    let engine = eval_engine(budget);
    let mut scope = Scope::new();
    scope.push("request", request_map(request));

    let value = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
        .map_err(|e| anyhow!("header expression error: {e}"))?;

    Ok(body_to_string(&value))
}

/// Run a body-transform script over a backend response body; the script's
/// resulting value replaces the body.
pub fn run_body_transform(
    ast: &AST,
    body: &str,
    status: u16,
    budget: Duration,
) -> Result<String> {
    let engine = eval_engine(budget);
    let mut scope = Scope::new();
    scope.push("body", body.to_string());
    scope.push("status", status as i64);

    let value = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
        .map_err(|e| anyhow!("body transform error: {e}"))?;

    // A script that mutates `body` in place evaluates to unit; read the
    // variable back rather than discarding the mutation.
    if value.is_unit() {
        return Ok(scope.get_value::<String>("body").unwrap_or_default());
    }
    Ok(body_to_string(&value))
}

/// Render a script value as a response body: strings verbatim, maps/arrays
/// as JSON, everything else via display.
fn body_to_string(value: &Dynamic) -> String {
    if value.is_unit() {
        return String::new();
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return s;
    }
    if value.is_map() || value.is_array() {
        return serde_json::to_string(&dynamic_to_json(value.clone()))
            .unwrap_or_else(|_| "{}".to_string());
    }
    format!("{value}")
}

fn dynamic_string_map(value: Option<&Dynamic>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(map) = value.and_then(|v| v.clone().try_cast::<Map>()) {
        for (k, v) in map {
            out.insert(k.to_string(), body_to_string(&v));
        }
    }
    out
}

pub(crate) fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

pub(crate) fn dynamic_to_json(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        Value::Number(serde_json::Number::from_f64(f).unwrap_or(0.into()))
    } else if let Some(s) = value.clone().try_cast::<String>() {
        Value::String(s)
    } else if let Some(arr) = value.clone().try_cast::<Vec<Dynamic>>() {
        Value::Array(arr.into_iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        let mut obj = serde_json::Map::new();
        for (k, v) in map {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        Value::Object(obj)
    } else {
        Value::String(format!("{value}"))
    }
}
