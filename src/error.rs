/// Result type for data operations
pub type DataResult<T> = Result<T, DataError>;

/// Errors raised by the pool, cache, interceptor and record operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum DataError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Backend error: {message}")]
    Backend {
        message: String,
        code: Option<String>,
        details: Option<String>,
        hint: Option<String>,
    },

    #[error("Simulated failure for {0}")]
    Simulated(String),

    #[error("Failed to decode {entity}: {message}")]
    Decode { entity: &'static str, message: String },

    #[error("{operation} failed for '{key}': {source}")]
    Operation {
        operation: &'static str,
        key: String,
        #[source]
        source: Box<DataError>,
    },
}

impl DataError {
    pub fn backend(message: impl Into<String>) -> Self {
        DataError::Backend {
            message: message.into(),
            code: None,
            details: None,
            hint: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DataError::Validation(message.into())
    }

    /// Attach the logical operation and key this error came from.
    pub fn context(self, operation: &'static str, key: impl Into<String>) -> Self {
        DataError::Operation {
            operation,
            key: key.into(),
            source: Box::new(self),
        }
    }

    /// The error underneath any context wrappers.
    pub fn root(&self) -> &DataError {
        match self {
            DataError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Transport and backend failures are worth another attempt; caller and
    /// credential problems are not. A backend error whose code blames the
    /// request itself is a caller problem.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            DataError::Connection(_) | DataError::Simulated(_) => true,
            DataError::Backend { code, .. } => !code.as_deref().is_some_and(is_request_fault),
            _ => false,
        }
    }

    /// Reads may report these as "nothing found" instead of failing.
    pub fn is_absence_safe(&self) -> bool {
        matches!(
            self.root(),
            DataError::Connection(_) | DataError::Backend { .. } | DataError::Decode { .. }
        )
    }

    /// Machine-readable backend code, if the backend sent one.
    pub fn code(&self) -> Option<&str> {
        match self.root() {
            DataError::Backend { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// 4xx statuses, SQLSTATE classes 22 (data exception) and 23 (integrity
/// constraint violation), and PostgREST request errors (PGRST1xx).
fn is_request_fault(code: &str) -> bool {
    let numeric = code.len() == 3 && code.starts_with('4') && code.bytes().all(|b| b.is_ascii_digit());
    let sqlstate = code.len() == 5 && (code.starts_with("22") || code.starts_with("23"));
    numeric || sqlstate || code.starts_with("PGRST1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DataError::Connection("refused".into()).is_retryable());
        assert!(DataError::backend("boom").is_retryable());
        assert!(!DataError::validation("bad email").is_retryable());
        assert!(!DataError::Authentication("expired".into()).is_retryable());
    }

    fn coded(code: &str) -> DataError {
        DataError::Backend {
            message: "rejected".into(),
            code: Some(code.into()),
            details: None,
            hint: None,
        }
    }

    #[test]
    fn test_request_faults_not_retried() {
        for code in ["23505", "23503", "22P02", "409", "400", "PGRST102"] {
            assert!(!coded(code).is_retryable(), "{} should not be retried", code);
        }
        for code in ["502", "503", "57014", "PGRST000", "08006"] {
            assert!(coded(code).is_retryable(), "{} should be retried", code);
        }
        assert!(!coded("23505").context("patients.create", "patients").is_retryable());
    }

    #[test]
    fn test_context_preserves_root() {
        let err = DataError::Backend {
            message: "duplicate key".into(),
            code: Some("23505".into()),
            details: None,
            hint: None,
        }
        .context("patients.create", "patients");

        assert!(!err.is_retryable());
        assert_eq!(err.code(), Some("23505"));
        assert_eq!(
            err.to_string(),
            "patients.create failed for 'patients': Backend error: duplicate key"
        );
    }
}
