//! Crate error types.

use thiserror::Error;

/// Errors surfaced by configuration loading and engine setup.
///
/// Dispatch-path problems (bad patterns, script failures, backend errors)
/// are deliberately *not* here: they degrade the affected rule or request
/// and are logged, never propagated as setup errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_cause() {
        let err = EngineError::Invalid("rule 'x' has an empty method set".into());
        assert!(err.to_string().contains("empty method set"));

        let io = EngineError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"));
        assert!(io.to_string().contains("read configuration"));
    }
}
