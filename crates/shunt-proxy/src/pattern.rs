//! Path pattern classification and compilation.
//!
//! A pattern string is classified once and compiled to a matchable form:
//!
//! - No `*`, `^`, `:` or `{}` — exact byte comparison
//! - `:name` or `{name}` segments — anchored regex with one named group per
//!   segment; a segment matches one or more non-`/` characters
//! - Leading `^` — regex compiled as-is, anchored by the author's own `^`/`$`
//! - Otherwise containing `*` — wildcard, `*` is zero or more characters,
//!   anchored at both ends
//!
//! A pattern that fails to compile becomes [`CompiledPattern::Invalid`]: it is
//! reported once at compile time and never matches, so a bad rule can't take
//! down the dispatch path.

use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

/// Path parameters bound by a parameterized pattern match.
pub type PathParams = HashMap<String, String>;

/// A compiled path pattern, ready for repeated matching.
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    /// Byte-equal comparison.
    Exact(String),
    /// `*` wildcard, anchored at both ends.
    Wildcard(Regex),
    /// `:name` / `{name}` segments compiled to named capture groups.
    Params { regex: Regex, names: Vec<String> },
    /// Author-written regex (leading `^`).
    Regex(Regex),
    /// Compilation failed; matches nothing until the pattern is corrected.
    Invalid,
}

impl CompiledPattern {
    /// Classify and compile a pattern string.
    ///
    /// Never fails: a bad regex is logged and yields [`CompiledPattern::Invalid`].
    pub fn compile(pattern: &str) -> Self {
        if pattern.starts_with('^') {
            return match Regex::new(pattern) {
                Ok(re) => CompiledPattern::Regex(re),
                Err(e) => {
                    warn!(pattern, error = %e, "invalid regex pattern; rule will never match");
                    CompiledPattern::Invalid
                }
            };
        }

        if has_param_segments(pattern) {
            return Self::compile_params(pattern);
        }

        if pattern.contains('*') {
            return Self::compile_wildcard(pattern);
        }

        CompiledPattern::Exact(pattern.to_string())
    }

    fn compile_params(pattern: &str) -> Self {
        // Groups are numbered positionally so a repeated parameter name can't
        // produce an invalid regex; `names` maps them back in segment order.
        let mut names = Vec::new();
        let mut source = String::from("^");

        for (i, segment) in pattern.split('/').enumerate() {
            if i > 0 {
                source.push('/');
            }
            if let Some(name) = param_name(segment) {
                source.push_str(&format!("(?P<p{}>[^/]+)", names.len()));
                names.push(name.to_string());
            } else {
                source.push_str(&regex::escape(segment));
            }
        }
        source.push('$');

        match Regex::new(&source) {
            Ok(regex) => CompiledPattern::Params { regex, names },
            Err(e) => {
                warn!(pattern, error = %e, "invalid parameterized pattern; rule will never match");
                CompiledPattern::Invalid
            }
        }
    }

    fn compile_wildcard(pattern: &str) -> Self {
        let source = format!(
            "^{}$",
            pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*")
        );
        match Regex::new(&source) {
            Ok(re) => CompiledPattern::Wildcard(re),
            Err(e) => {
                warn!(pattern, error = %e, "invalid wildcard pattern; rule will never match");
                CompiledPattern::Invalid
            }
        }
    }

    /// Test a path against this pattern.
    ///
    /// Returns the bound path parameters on a match (empty for
    /// non-parameterized patterns), `None` otherwise.
    pub fn match_path(&self, path: &str) -> Option<PathParams> {
        match self {
            CompiledPattern::Exact(p) => (path == p).then(PathParams::new),
            CompiledPattern::Wildcard(re) | CompiledPattern::Regex(re) => {
                re.is_match(path).then(PathParams::new)
            }
            CompiledPattern::Params { regex, names } => {
                let caps = regex.captures(path)?;
                let mut params = PathParams::new();
                for (i, name) in names.iter().enumerate() {
                    if let Some(m) = caps.name(&format!("p{i}")) {
                        // First binding wins for a repeated parameter name.
                        params
                            .entry(name.clone())
                            .or_insert_with(|| m.as_str().to_string());
                    }
                }
                Some(params)
            }
            CompiledPattern::Invalid => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, CompiledPattern::Invalid)
    }
}

/// A compiled request-body pattern used by regex validation.
///
/// Unlike path patterns the source is compiled verbatim and searched
/// (unanchored) against the body; named capture groups become validation
/// variables.
#[derive(Debug, Clone)]
pub struct CompiledBodyPattern {
    re: Option<Regex>,
}

impl CompiledBodyPattern {
    pub fn compile(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Self { re: Some(re) },
            Err(e) => {
                warn!(pattern, error = %e, "invalid body validation regex; rule will never match");
                Self { re: None }
            }
        }
    }

    /// Search the body; on a match, named capture groups become variables.
    pub fn captures(&self, body: &str) -> Option<HashMap<String, String>> {
        let re = self.re.as_ref()?;
        let caps = re.captures(body)?;
        let mut vars = HashMap::new();
        for name in re.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                vars.insert(name.to_string(), m.as_str().to_string());
            }
        }
        Some(vars)
    }

    pub fn is_invalid(&self) -> bool {
        self.re.is_none()
    }
}

fn has_param_segments(pattern: &str) -> bool {
    pattern.split('/').any(|s| param_name(s).is_some())
}

fn param_name(segment: &str) -> Option<&str> {
    if let Some(name) = segment.strip_prefix(':') {
        return (!name.is_empty()).then_some(name);
    }
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_is_byte_equal() {
        let p = CompiledPattern::compile("/health");
        assert!(matches!(p, CompiledPattern::Exact(_)));
        assert!(p.match_path("/health").is_some());
        assert!(p.match_path("/healthx").is_none());
        assert!(p.match_path("/Health").is_none());
    }

    #[test]
    fn param_binds_segment() {
        let p = CompiledPattern::compile("/users/:id");
        let params = p.match_path("/users/42").expect("should match");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
        assert!(p.match_path("/users/42/posts").is_none());
        assert!(p.match_path("/users/").is_none());
    }

    #[test]
    fn brace_param_syntax() {
        let p = CompiledPattern::compile("/users/{id}/posts/{post}");
        let params = p.match_path("/users/7/posts/99").expect("should match");
        assert_eq!(params.get("id").map(String::as_str), Some("7"));
        assert_eq!(params.get("post").map(String::as_str), Some("99"));
    }

    #[test]
    fn wildcard_spans_segments() {
        let p = CompiledPattern::compile("/api/*");
        assert!(matches!(p, CompiledPattern::Wildcard(_)));
        assert!(p.match_path("/api/anything/nested").is_some());
        assert!(p.match_path("/api/").is_some());
        assert!(p.match_path("/ap").is_none());
    }

    #[test]
    fn author_regex_used_as_is() {
        let p = CompiledPattern::compile(r"^/v\d+/items$");
        assert!(p.match_path("/v2/items").is_some());
        assert!(p.match_path("/vx/items").is_none());
    }

    #[test]
    fn bad_regex_never_matches() {
        let p = CompiledPattern::compile("^/items/(unclosed");
        assert!(p.is_invalid());
        assert!(p.match_path("/items/1").is_none());
    }

    #[test]
    fn exact_with_dot_is_not_regex() {
        // Dots in exact patterns are literal, not regex metacharacters.
        let p = CompiledPattern::compile("/file.txt");
        assert!(p.match_path("/file.txt").is_some());
        assert!(p.match_path("/fileXtxt").is_none());
    }

    #[test]
    fn body_pattern_extracts_named_groups() {
        let p = CompiledBodyPattern::compile(r#""id":\s*"(?P<id>\d+)""#);
        let vars = p.captures(r#"{"id": "7"}"#).expect("should match");
        assert_eq!(vars.get("id").map(String::as_str), Some("7"));
        assert!(p.captures(r#"{"id": "x"}"#).is_none());
    }

    #[test]
    fn bad_body_pattern_never_matches() {
        let p = CompiledBodyPattern::compile("(oops");
        assert!(p.is_invalid());
        assert!(p.captures("anything").is_none());
    }
}
