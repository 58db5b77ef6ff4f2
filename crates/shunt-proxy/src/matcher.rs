//! Endpoint and rule matching.
//!
//! The configuration is compiled once into an [`EndpointSet`]; per request the
//! set picks the endpoint by longest path-prefix, applies the endpoint's path
//! translation, then walks its items in order. The first enabled rule whose
//! method, effective path, domain scope, and validation all pass wins. No
//! later rule fires even if it would also match.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::cache::Caches;
use crate::config::{DomainScope, Endpoint, EndpointKind, ForwardConfig, Item, Rule, Translation};
use crate::pattern::{CompiledPattern, PathParams};
use crate::scripting::ScriptRequest;
use crate::validator::{validate, Verdict};

/// One inbound request as seen by the matcher, already decoupled from the
/// transport (plain listener or SOCKS interception).
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    /// Raw request path, before any endpoint translation.
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Effective domain (Host header or SNI), when known.
    pub domain: Option<String>,
    /// Whether the request arrived through SOCKS domain interception.
    pub intercepted: bool,
}

impl InboundRequest {
    /// Build the script/validation view of this request. The path is the
    /// original request path; translation only affects pattern matching.
    pub fn script_request(&self, params: &PathParams, vars: &HashMap<String, String>) -> ScriptRequest {
        ScriptRequest {
            method: self.method.clone(),
            path: self.path.clone(),
            headers: self.headers.clone(),
            query: self.query.clone(),
            params: params.clone(),
            vars: vars.clone(),
            body: self.body.clone(),
        }
    }
}

/// Outcome of dispatching one request.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// A mock rule matched.
    Rule {
        rule: Arc<Rule>,
        params: PathParams,
        vars: HashMap<String, String>,
    },
    /// No rule matched inside a forwarding endpoint: fall through to the
    /// proxy forwarder.
    Forward { forward: Arc<ForwardConfig> },
    /// No endpoint or rule applies.
    NotFound,
}

/// The compiled, immutable view of the endpoint configuration. Replaced
/// wholesale on configuration changes.
pub struct EndpointSet {
    endpoints: Vec<CompiledEndpoint>,
}

struct CompiledEndpoint {
    prefix: String,
    kind: EndpointKind,
    translation: CompiledTranslation,
    items: Vec<CompiledItem>,
    forward: Option<Arc<ForwardConfig>>,
    enabled: bool,
}

enum CompiledTranslation {
    None,
    Strip,
    Translate { regex: Regex, replacement: String },
}

enum CompiledItem {
    Rule(CompiledRule),
    Group {
        enabled: bool,
        rules: Vec<CompiledRule>,
    },
}

pub struct CompiledRule {
    rule: Arc<Rule>,
    pattern: Arc<CompiledPattern>,
    /// Uppercased method set.
    methods: Vec<String>,
    domain_scope: CompiledDomainScope,
}

enum CompiledDomainScope {
    Any,
    AllIntercepted,
    Specific(Vec<Regex>),
}

impl EndpointSet {
    /// Compile the configured endpoints. Pattern and regex compilation goes
    /// through the caches; a pattern that fails to compile was already
    /// reported and simply never matches.
    pub fn compile(endpoints: &[Endpoint], caches: &Caches) -> Self {
        let compiled = endpoints
            .iter()
            .map(|ep| CompiledEndpoint::compile(ep, caches))
            .collect();
        Self {
            endpoints: compiled,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Decide which rule (or fall-through) applies to a request.
    pub fn dispatch(&self, request: &InboundRequest, caches: &Caches) -> Dispatch {
        let Some(endpoint) = self.select_endpoint(&request.path) else {
            return Dispatch::NotFound;
        };

        // Translation is applied once, before matching begins, and is fixed
        // for the lifetime of this request.
        let effective_path = endpoint.effective_path(&request.path);

        for compiled in endpoint.enabled_rules() {
            if let Some((params, verdict)) = compiled.try_match(request, &effective_path, caches) {
                return Dispatch::Rule {
                    rule: Arc::clone(&compiled.rule),
                    params,
                    vars: verdict.vars,
                };
            }
        }

        if endpoint.kind == EndpointKind::Forward {
            if let Some(forward) = &endpoint.forward {
                return Dispatch::Forward {
                    forward: Arc::clone(forward),
                };
            }
        }
        Dispatch::NotFound
    }

    /// Longest-prefix endpoint selection; configuration order breaks ties.
    fn select_endpoint(&self, path: &str) -> Option<&CompiledEndpoint> {
        let mut best: Option<&CompiledEndpoint> = None;
        for endpoint in self.endpoints.iter().filter(|e| e.enabled) {
            if !path.starts_with(&endpoint.prefix) {
                continue;
            }
            let longer = best.map_or(true, |b| endpoint.prefix.len() > b.prefix.len());
            if longer {
                best = Some(endpoint);
            }
        }
        best
    }
}

impl CompiledEndpoint {
    fn compile(endpoint: &Endpoint, caches: &Caches) -> Self {
        let translation = match &endpoint.translation {
            Translation::None => CompiledTranslation::None,
            Translation::Strip => CompiledTranslation::Strip,
            Translation::Translate {
                pattern,
                replacement,
            } => match Regex::new(pattern) {
                Ok(regex) => CompiledTranslation::Translate {
                    regex,
                    replacement: replacement.clone(),
                },
                Err(e) => {
                    warn!(
                        prefix = %endpoint.path_prefix,
                        error = %e,
                        "invalid translation regex; endpoint matches against the untranslated path"
                    );
                    CompiledTranslation::None
                }
            },
        };

        let items = endpoint
            .items
            .iter()
            .map(|item| match item {
                Item::Rule(rule) => CompiledItem::Rule(CompiledRule::compile(rule, caches)),
                Item::Group(group) => CompiledItem::Group {
                    enabled: group.enabled,
                    rules: group
                        .rules
                        .iter()
                        .map(|r| CompiledRule::compile(r, caches))
                        .collect(),
                },
            })
            .collect();

        Self {
            prefix: endpoint.path_prefix.clone(),
            kind: endpoint.kind,
            translation,
            items,
            forward: endpoint.forward.clone().map(Arc::new),
            enabled: endpoint.enabled,
        }
    }

    fn effective_path(&self, path: &str) -> String {
        match &self.translation {
            CompiledTranslation::None => path.to_string(),
            CompiledTranslation::Strip => {
                let stripped = path.strip_prefix(&self.prefix).unwrap_or(path);
                if stripped.is_empty() {
                    "/".to_string()
                } else {
                    stripped.to_string()
                }
            }
            CompiledTranslation::Translate { regex, replacement } => {
                regex.replace(path, replacement.as_str()).to_string()
            }
        }
    }

    /// Enabled rules in item order; a disabled group's rules are skipped as
    /// if absent, without disturbing the items that follow.
    fn enabled_rules(&self) -> impl Iterator<Item = &CompiledRule> {
        self.items.iter().flat_map(|item| {
            let rules: &[CompiledRule] = match item {
                CompiledItem::Rule(rule) => std::slice::from_ref(rule),
                CompiledItem::Group { enabled: true, rules } => rules,
                CompiledItem::Group { enabled: false, .. } => &[],
            };
            rules.iter()
        })
    }
}

impl CompiledRule {
    fn compile(rule: &Rule, caches: &Caches) -> Self {
        let pattern = caches
            .patterns
            .get_or_compile(&rule.path_pattern, CompiledPattern::compile);

        let domain_scope = match &rule.domain_scope {
            DomainScope::Any => CompiledDomainScope::Any,
            DomainScope::AllIntercepted => CompiledDomainScope::AllIntercepted,
            DomainScope::Specific(patterns) => CompiledDomainScope::Specific(
                patterns
                    .iter()
                    .filter_map(|p| match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!(rule = %rule.id, pattern = %p, error = %e, "invalid domain pattern dropped");
                            None
                        }
                    })
                    .collect(),
            ),
        };

        Self {
            rule: Arc::new(rule.clone()),
            pattern,
            methods: rule.methods.iter().map(|m| m.to_uppercase()).collect(),
            domain_scope,
        }
    }

    /// Method, path, domain scope, then validation — in that order, cheapest
    /// first. Returns the bound params and validation verdict on a full match.
    fn try_match(
        &self,
        request: &InboundRequest,
        effective_path: &str,
        caches: &Caches,
    ) -> Option<(PathParams, Verdict)> {
        if !self.rule.enabled {
            return None;
        }
        if !self.methods.iter().any(|m| m == &request.method.to_uppercase()) {
            return None;
        }
        let params = self.pattern.match_path(effective_path)?;
        if !self.domain_matches(request) {
            return None;
        }

        // A rule whose response script failed to compile is permanently
        // non-matching until corrected; the failure was reported at compile.
        if self.rule.response_mode == crate::config::ResponseMode::Script {
            if let Some(script) = &self.rule.script_body {
                let program = caches
                    .scripts
                    .get_or_compile(script, crate::scripting::CompiledProgram::compile);
                if program.ast().is_none() {
                    return None;
                }
            }
        }

        let script_request = request.script_request(&params, &HashMap::new());
        let verdict = validate(&self.rule.request_validation, &script_request, caches);
        if !verdict.valid {
            // Validation failure is not terminal: the rule just doesn't match.
            return None;
        }
        Some((params, verdict))
    }

    fn domain_matches(&self, request: &InboundRequest) -> bool {
        match &self.domain_scope {
            CompiledDomainScope::Any => true,
            CompiledDomainScope::AllIntercepted => request.intercepted,
            CompiledDomainScope::Specific(patterns) => request
                .domain
                .as_deref()
                .map(|domain| patterns.iter().any(|re| re.is_match(domain)))
                .unwrap_or(false),
        }
    }
}
