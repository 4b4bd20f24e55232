use thiserror::Error;

/// All errors generated in `whalewatch-engine`.
///
/// Degenerate market inputs (empty books, zero trades, zero-duration scrubs)
/// are valid states and never surface here; only malformed wire payloads do.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to parse event payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown event kind: {0}")]
    UnknownKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let engine_err = EngineError::from(err);
        assert!(matches!(engine_err, EngineError::Parse(_)));
        assert!(engine_err.to_string().contains("failed to parse"));
    }
}
