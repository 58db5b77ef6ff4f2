//! Request validation policy configuration.

use serde::{Deserialize, Serialize};

/// How an inbound request is validated before a rule is considered matched.
///
/// A failing validation is not an error: the rule is treated as non-matching
/// and matching continues with the next candidate.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RequestValidation {
    /// Always passes, binds no variables.
    #[default]
    None,
    /// String comparison against the raw request body.
    Static {
        pattern: String,
        #[serde(default)]
        match_type: StaticMatchType,
    },
    /// Regex tested against the body; named capture groups become variables.
    Regex { pattern: String },
    /// Script with `body` and `request` bindings; sets `result.valid` and
    /// `result.vars`. Script exceptions count as validation failure.
    Script { script: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StaticMatchType {
    #[default]
    Exact,
    Contains,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        let v: RequestValidation = serde_yaml::from_str("mode: none").unwrap();
        assert_eq!(v, RequestValidation::None);

        let v: RequestValidation =
            serde_yaml::from_str("mode: static\npattern: ping\nmatch_type: contains").unwrap();
        assert_eq!(
            v,
            RequestValidation::Static {
                pattern: "ping".into(),
                match_type: StaticMatchType::Contains
            }
        );

        let v: RequestValidation =
            serde_yaml::from_str(r#"{mode: regex, pattern: '"id":\s*"(?P<id>\d+)"'}"#).unwrap();
        assert!(matches!(v, RequestValidation::Regex { .. }));
    }

    #[test]
    fn static_match_type_defaults_to_exact() {
        let v: RequestValidation = serde_yaml::from_str("mode: static\npattern: x").unwrap();
        assert_eq!(
            v,
            RequestValidation::Static {
                pattern: "x".into(),
                match_type: StaticMatchType::Exact
            }
        );
    }
}
