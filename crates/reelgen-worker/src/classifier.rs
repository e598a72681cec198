//! Failure classification.
//!
//! Two ordered lookup tables over the lower-cased error message:
//! [`RETRY_PATTERNS`] decides whether a failed attempt may be retried, and
//! [`CATEGORY_PATTERNS`] picks the cause category shown to users. The first
//! matching entry wins. Anything unmatched is fatal and `Generic`.

use reelgen_models::FailureCategory;

use crate::error::StageError;

/// `(substring, retryable)` in match order. Permanent denials come first so
/// that e.g. "quota exceeded (rate limit)" stays fatal.
pub const RETRY_PATTERNS: &[(&str, bool)] = &[
    ("quota exceeded", false),
    ("permission denied", false),
    ("unauthorized", false),
    ("forbidden", false),
    ("did not finish within", false),
    ("error decoding response body", false),
    ("json error", false),
    ("etimedout", true),
    ("econnreset", true),
    ("econnrefused", true),
    ("enotfound", true),
    ("eai_again", true),
    ("socket hang up", true),
    ("network timeout", true),
    ("timeout", true),
    ("timed out", true),
    ("network error", true),
    ("connection reset", true),
    ("connection refused", true),
    ("connection closed", true),
    ("dns", true),
    ("temporary failure", true),
    ("temporarily unavailable", true),
    ("service unavailable", true),
    ("internal server error", true),
    ("bad gateway", true),
    ("gateway timeout", true),
    ("too many requests", true),
    ("rate limit", true),
    ("error sending request", true),
];

/// `(substring, category)` in match order.
pub const CATEGORY_PATTERNS: &[(&str, FailureCategory)] = &[
    ("upload", FailureCategory::Storage),
    ("storage", FailureCategory::Storage),
    ("bucket", FailureCategory::Storage),
    ("no space left", FailureCategory::Storage),
    ("disk", FailureCategory::Storage),
    ("service unavailable", FailureCategory::ServiceUnavailable),
    ("temporarily unavailable", FailureCategory::ServiceUnavailable),
    ("internal server error", FailureCategory::ServiceUnavailable),
    ("bad gateway", FailureCategory::ServiceUnavailable),
    ("too many requests", FailureCategory::ServiceUnavailable),
    ("rate limit", FailureCategory::ServiceUnavailable),
    ("overloaded", FailureCategory::ServiceUnavailable),
    ("etimedout", FailureCategory::Connectivity),
    ("econnreset", FailureCategory::Connectivity),
    ("econnrefused", FailureCategory::Connectivity),
    ("enotfound", FailureCategory::Connectivity),
    ("eai_again", FailureCategory::Connectivity),
    ("socket hang up", FailureCategory::Connectivity),
    ("timeout", FailureCategory::Connectivity),
    ("timed out", FailureCategory::Connectivity),
    ("network", FailureCategory::Connectivity),
    ("connection", FailureCategory::Connectivity),
    ("dns", FailureCategory::Connectivity),
    ("error sending request", FailureCategory::Connectivity),
];

/// Whether an error message describes a transient failure.
pub fn is_retryable_message(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRY_PATTERNS
        .iter()
        .find(|(pattern, _)| message.contains(pattern))
        .is_some_and(|(_, retryable)| *retryable)
}

/// Whether a failed stage may be retried. Render timeouts are always fatal.
pub fn is_retryable(error: &StageError) -> bool {
    if error.is_render_timeout() {
        return false;
    }
    is_retryable_message(&error.to_string())
}

/// Best-effort cause category for user display.
pub fn failure_category(message: &str) -> FailureCategory {
    let message = message.to_lowercase();
    CATEGORY_PATTERNS
        .iter()
        .find(|(pattern, _)| message.contains(pattern))
        .map(|(_, category)| *category)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(is_retryable_message("connect ETIMEDOUT 10.0.0.4:443"));
        assert!(is_retryable_message("read ECONNRESET"));
        assert!(is_retryable_message("getaddrinfo EAI_AGAIN api.example.com"));
        assert!(is_retryable_message("Network Error"));
        assert!(is_retryable_message("image service returned 503 Service Unavailable: busy"));
        assert!(is_retryable_message("500 Internal Server Error"));
        assert!(is_retryable_message("Request timeout after 30000ms"));
    }

    #[test]
    fn test_unknown_and_permanent_errors_are_fatal() {
        assert!(!is_retryable_message("Invalid prompt: too short."));
        assert!(!is_retryable_message("content policy violation"));
        assert!(!is_retryable_message(""));
        assert!(!is_retryable_message("quota exceeded: rate limit for this billing period"));
        assert!(!is_retryable_message("401 Unauthorized"));
        assert!(!is_retryable_message(
            "Network error: error decoding response body: expected value at line 1 column 1"
        ));
        assert!(!is_retryable_message("JSON error: expected value at line 1 column 1"));
    }

    #[test]
    fn test_render_timeout_is_fatal() {
        let err = StageError::RenderTimedOut {
            render_id: "r-1".to_string(),
            waited_secs: 600,
        };
        assert!(!is_retryable(&err));
        assert!(is_retryable(&StageError::failed("socket hang up")));
        assert!(!is_retryable(&StageError::RenderFailed("composition error".to_string())));
    }

    #[test]
    fn test_failure_category() {
        assert_eq!(failure_category("S3 upload failed: access"), FailureCategory::Storage);
        assert_eq!(
            failure_category("502 Bad Gateway"),
            FailureCategory::ServiceUnavailable
        );
        assert_eq!(failure_category("connect ECONNREFUSED"), FailureCategory::Connectivity);
        assert_eq!(failure_category("script was empty"), FailureCategory::Generic);
    }
}
