//! Settings error types.

use thiserror::Error;

/// Errors that can occur when resolving hook settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Host config could not be deserialized into settings.
    #[error("failed to parse hook config: {0}")]
    Json(#[from] serde_json::Error),
    /// A value was present but out of range.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SettingsError::from(json_err);
        assert!(err.to_string().starts_with("failed to parse hook config"));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("cxdbPort must be non-zero".into());
        assert_eq!(
            err.to_string(),
            "invalid settings value: cxdbPort must be non-zero"
        );
    }
}
