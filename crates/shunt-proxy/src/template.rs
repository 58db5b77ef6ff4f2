//! Response body templating.
//!
//! Template bodies use `{{…}}` placeholders resolved against the request and
//! the validator's variables:
//!
//! - `{{.Method}}`, `{{.Path}}`, `{{.Body}}`
//! - `{{.Params.<name>}}` — path parameters (alias `{{.PathParams.<name>}}`)
//! - `{{.Query.<name>}}`, `{{.Headers.<name>}}` (header lookup is
//!   case-insensitive), `{{.Vars.<name>}}`
//! - `{{.JSON.<field>[.<field>…]}}` — fields of the JSON-parsed request body
//! - built-ins: `{{now}}` (RFC 3339), `{{timestamp}}` (Unix seconds),
//!   `{{uuid}}`, `{{upper X}}`, `{{lower X}}`, `{{json X}}` (JSON re-encode)
//!
//! Unknown placeholders render as empty; a template never aborts a response.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*(?:(upper|lower|json)\s+)?([A-Za-z_.][A-Za-z0-9_.\-]*)\s*\}\}")
        .expect("placeholder regex is valid")
});

/// Request data a template can draw from.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub method: String,
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub vars: HashMap<String, String>,
    pub body: String,
    /// The body parsed as JSON, when it is JSON.
    pub json: Option<serde_json::Value>,
}

impl TemplateContext {
    /// Resolve a dotted placeholder path; `None` for anything unknown.
    fn get(&self, path: &str) -> Option<String> {
        if let Some(rest) = path.strip_prefix(".JSON.") {
            return self.json_field(rest);
        }

        let parts: Vec<&str> = path.splitn(3, '.').collect();
        match parts.as_slice() {
            ["", "Method"] => Some(self.method.clone()),
            ["", "Path"] => Some(self.path.clone()),
            ["", "Body"] => Some(self.body.clone()),
            ["", "Params", name] | ["", "PathParams", name] => self.params.get(*name).cloned(),
            ["", "Query", name] => self.query.get(*name).cloned(),
            ["", "Headers", name] => self.headers.get(&name.to_lowercase()).cloned(),
            ["", "Vars", name] => self.vars.get(*name).cloned(),
            _ => None,
        }
    }

    fn json_field(&self, dotted: &str) -> Option<String> {
        let mut value = self.json.as_ref()?;
        for key in dotted.split('.') {
            value = value.get(key)?;
        }
        Some(render_json_value(value))
    }
}

/// Scalars render bare; objects and arrays render as compact JSON.
fn render_json_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Render a template, substituting every placeholder.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let func = caps.get(1).map(|m| m.as_str());
            let target = &caps[2];
            apply(func, target, ctx)
        })
        .to_string()
}

fn apply(func: Option<&str>, target: &str, ctx: &TemplateContext) -> String {
    let value = match target {
        "uuid" => uuid::Uuid::new_v4().to_string(),
        "now" => chrono::Utc::now().to_rfc3339(),
        "timestamp" => chrono::Utc::now().timestamp().to_string(),
        dotted => ctx.get(dotted).unwrap_or_default(),
    };

    match func {
        Some("upper") => value.to_uppercase(),
        Some("lower") => value.to_lowercase(),
        Some("json") => json_encode(target, &value, ctx),
        _ => value,
    }
}

/// `{{json .Body}}` re-encodes a JSON body compactly; everything else is
/// encoded as a JSON string literal.
fn json_encode(target: &str, value: &str, ctx: &TemplateContext) -> String {
    if target == ".Body" {
        if let Some(parsed) = ctx.json.as_ref() {
            return parsed.to_string();
        }
    }
    serde_json::to_string(value).unwrap_or_default()
}

/// Whether a body contains placeholders at all (cheap pre-check).
pub fn has_placeholders(body: &str) -> bool {
    PLACEHOLDER.is_match(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TemplateContext {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());
        let mut query = HashMap::new();
        query.insert("page".to_string(), "3".to_string());
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let mut vars = HashMap::new();
        vars.insert("id".to_string(), "7".to_string());
        let body = r#"{"user": {"name": "ada"}, "count": 2}"#.to_string();
        let json = serde_json::from_str(&body).ok();

        TemplateContext {
            method: "Post".to_string(),
            path: "/users/42".to_string(),
            params,
            query,
            headers,
            vars,
            body,
            json,
        }
    }

    #[test]
    fn substitutes_request_fields() {
        let ctx = context();
        assert_eq!(render("{{.Method}} {{.Path}}", &ctx), "Post /users/42");
        assert_eq!(render("id={{.Params.id}}", &ctx), "id=42");
        assert_eq!(render("page={{.Query.page}}", &ctx), "page=3");
        assert_eq!(
            render("ct={{.Headers.Content-Type}}", &ctx),
            "ct=application/json"
        );
    }

    #[test]
    fn substitutes_validator_vars() {
        let ctx = context();
        assert_eq!(render("{{.Vars.id}}", &ctx), "7");
    }

    #[test]
    fn json_body_fields() {
        let ctx = context();
        assert_eq!(render("{{.JSON.user.name}}", &ctx), "ada");
        assert_eq!(render("{{.JSON.count}}", &ctx), "2");
        assert_eq!(render("{{.JSON.user}}", &ctx), r#"{"name":"ada"}"#);
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let ctx = context();
        assert_eq!(render("[{{.Vars.missing}}]", &ctx), "[]");
        assert_eq!(render("[{{.JSON.nope.deep}}]", &ctx), "[]");
        assert_eq!(render("[{{.Nonsense}}]", &ctx), "[]");
    }

    #[test]
    fn case_conversion() {
        let ctx = context();
        assert_eq!(render("{{upper .Method}}", &ctx), "POST");
        assert_eq!(render("{{lower .Method}}", &ctx), "post");
    }

    #[test]
    fn builtin_generators() {
        let ctx = context();
        let rendered = render("{{uuid}}", &ctx);
        assert_eq!(rendered.len(), 36);
        assert!(uuid::Uuid::parse_str(&rendered).is_ok());

        let ts: i64 = render("{{timestamp}}", &ctx).parse().unwrap();
        assert!(ts > 1_500_000_000);

        assert!(render("{{now}}", &ctx).contains('T'));
    }

    #[test]
    fn json_reencoding() {
        let ctx = context();
        // String values become JSON string literals.
        assert_eq!(render("{{json .Vars.id}}", &ctx), r#""7""#);
        // The body re-encodes compactly.
        assert_eq!(
            render("{{json .Body}}", &ctx),
            r#"{"count":2,"user":{"name":"ada"}}"#
        );
    }

    #[test]
    fn plain_text_untouched() {
        let ctx = context();
        assert_eq!(render("no placeholders here", &ctx), "no placeholders here");
        assert!(!has_placeholders("plain"));
        assert!(has_placeholders("{{.Path}}"));
    }
}
