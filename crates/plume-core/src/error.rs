use thiserror::Error;

/// Hard failures surfaced to callers.
///
/// Almost nothing in this crate escalates: empty relay sets, timeouts,
/// unclassifiable cached records, and stale fetches all degrade to empty
/// results with a log line. The one exception is a malformed subject key,
/// which is rejected before any network activity.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid profile pubkey: {input}")]
    InvalidSubjectKey { input: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_subject_key_display() {
        let err = CoreError::InvalidSubjectKey {
            input: "nope".to_string(),
        };
        assert!(err.to_string().contains("nope"));
    }
}
