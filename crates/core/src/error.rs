use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

/// Classification of a failure, shared by every crate in the workspace.
///
/// Serialized in `snake_case` so callers outside Rust can match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed template, mapping, or settings. Not retryable.
    Configuration,
    /// Transport failure talking to the engine.
    Connectivity,
    /// The engine answered with a structured failure.
    EngineRejected,
    /// An engine payload did not have the expected shape.
    Protocol,
    /// No terminal event arrived within the bound.
    Timeout,
    /// The job finished but produced no qualifying output.
    ResultNotFound,
    /// Caller input was rejected before any engine call.
    Validation,
    /// The caller cancelled the run.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connectivity => "connectivity",
            Self::EngineRejected => "engine_rejected",
            Self::Protocol => "protocol",
            Self::Timeout => "timeout",
            Self::ResultNotFound => "result_not_found",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ResultNotFound).unwrap();
        assert_eq!(json, "\"result_not_found\"");
    }

    #[test]
    fn display_matches_serialized_name() {
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::Connectivity,
            ErrorKind::EngineRejected,
            ErrorKind::Protocol,
            ErrorKind::Timeout,
            ErrorKind::ResultNotFound,
            ErrorKind::Validation,
            ErrorKind::Cancelled,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn core_error_kinds() {
        assert_eq!(
            CoreError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CoreError::Configuration("x".into()).kind(),
            ErrorKind::Configuration
        );
    }
}
