//! Error types for the Strata asset cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside the cache.
///
/// None of these escape a public cache operation: the layered core maps
/// every failure to a miss or a `false` result and logs the transient
/// ones. The taxonomy exists so internal layers can tell the cases apart.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The asset (or its file) is not present
    #[error("asset not found")]
    NotFound,

    /// On-disk record failed codec validation
    #[error("bad on-disk format: {0}")]
    BadFormat(String),

    /// Transient filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write reservation for the path is already held
    #[error("write already in progress for path")]
    Contention,

    /// The upstream service failed (distinct from returning absent)
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl CacheError {
    /// True for the plain-miss case
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }

    /// True when the on-disk record should be discarded and refetched
    pub fn is_bad_format(&self) -> bool {
        matches!(self, CacheError::BadFormat(_))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(CacheError::NotFound.is_not_found());
        assert!(!CacheError::NotFound.is_bad_format());
        assert!(CacheError::BadFormat("wrong magic".into()).is_bad_format());
        assert!(!CacheError::Contention.is_not_found());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Io(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::BadFormat("truncated stream".into());
        assert_eq!(err.to_string(), "bad on-disk format: truncated stream");
    }
}
