use thiserror::Error;

/// Classifies storage errors for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Value could not be serialized or the stored document is unreadable
    Serialization,
    /// Write would exceed the backend's byte quota
    Quota,
    /// Underlying medium failed (file system, permissions)
    Io,
}

/// Classifies redirect engine errors for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Engine refused the directive set (bad pattern, duplicate id, ...)
    Rejected,
    /// Directive set is larger than the engine accepts
    LimitExceeded,
    /// Engine could not be reached
    Unavailable,
}

/// Proxy rule engine error types
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Parse error at line {line}: {message}")]
    ParseAtLine { line: usize, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rule {rule_id} not found in rule text")]
    RuleNotFound { rule_id: u64 },

    #[error("Storage error: {message}")]
    Storage {
        kind: StorageErrorKind,
        message: String,
    },

    #[error("Engine update error: {message}")]
    EngineUpdate {
        kind: EngineErrorKind,
        message: String,
    },

    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub(crate) fn storage(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        ProxyError::Storage {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn engine(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        ProxyError::EngineUpdate {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_kind_is_matchable() {
        let err = ProxyError::storage(StorageErrorKind::Quota, "quota exceeded");
        match &err {
            ProxyError::Storage { kind, .. } => {
                assert!(matches!(kind, StorageErrorKind::Quota));
            }
            _ => panic!("expected Storage error"),
        }
    }

    #[test]
    fn test_engine_error_kind_is_matchable() {
        let err = ProxyError::engine(EngineErrorKind::LimitExceeded, "too many rules");
        match &err {
            ProxyError::EngineUpdate { kind, .. } => {
                assert!(matches!(kind, EngineErrorKind::LimitExceeded));
            }
            _ => panic!("expected EngineUpdate error"),
        }
    }

    #[test]
    fn test_engine_error_display_includes_message() {
        let err = ProxyError::engine(EngineErrorKind::Rejected, "invalid regexFilter");
        let display = format!("{}", err);
        assert!(display.contains("invalid regexFilter"), "got: {}", display);
    }

    #[test]
    fn test_rule_not_found_display() {
        let err = ProxyError::RuleNotFound { rule_id: 7 };
        assert_eq!(err.to_string(), "Rule 7 not found in rule text");
    }

    #[test]
    fn test_parse_at_line_display() {
        let err = ProxyError::ParseAtLine {
            line: 3,
            message: "expected `,` or `]`".to_string(),
        };
        assert_eq!(err.to_string(), "Parse error at line 3: expected `,` or `]`");
    }
}
