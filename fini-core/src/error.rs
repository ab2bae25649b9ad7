use thiserror::Error;

#[derive(Error, Debug)]
pub enum FiniError {
    #[error("scan error: {0}")]
    Scan(String),

    #[error("missing API token")]
    MissingToken,

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("store error: {message}")]
    Store { message: String },

    #[error("manifest write error: {0}")]
    ManifestWrite(String),

    #[error("failed to close blockstore: {0}")]
    ResourceRelease(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Format error: {0}")]
    Format(String),
}

impl FiniError {
    pub fn store(message: impl Into<String>) -> Self {
        FiniError::Store {
            message: message.into(),
        }
    }

    /// Errors that abort the current job (and, under fail-fast, the run).
    pub fn is_job_fatal(&self) -> bool {
        !matches!(
            self,
            FiniError::ManifestWrite(_) | FiniError::ResourceRelease(_)
        )
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, FiniError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_underlying_message() {
        let e = FiniError::store("HTTP 503: service unavailable");
        assert_eq!(e.to_string(), "store error: HTTP 503: service unavailable");
        assert_eq!(FiniError::MissingToken.to_string(), "missing API token");
    }

    #[test]
    fn only_persistence_and_release_errors_are_survivable() {
        assert!(FiniError::MissingToken.is_job_fatal());
        assert!(FiniError::Encoding("empty".into()).is_job_fatal());
        assert!(FiniError::store("x").is_job_fatal());
        assert!(!FiniError::ManifestWrite("disk full".into()).is_job_fatal());
        assert!(!FiniError::ResourceRelease("busy".into()).is_job_fatal());
    }
}
