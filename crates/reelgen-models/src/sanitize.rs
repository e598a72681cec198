//! Error-text sanitization.
//!
//! Diagnostic text from external services routinely carries things that must
//! not reach a client-visible record: bearer tokens, API keys, local file
//! paths and internal addresses. Every free-text error field goes through
//! [`sanitize_error_text`] before it is persisted.

use std::sync::LazyLock;

use regex::Regex;

pub const REDACTED_BEARER: &str = "Bearer [REDACTED]";
pub const REDACTED_IP: &str = "[IP]";
pub const REDACTED_PATH: &str = "[PATH]";
pub const REDACTED_TOKEN: &str = "[TOKEN]";

static BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/\-]+=*").unwrap());

static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}(?::\d{1,5})?\b").unwrap());

// Unix paths need a boundary before the leading slash so URLs are left alone
// (the host part of `https://host/...` is preceded by another slash).
static UNIX_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s'"(=:,\[])(/[\w.\-@]+(?:/[\w.\-@]*)*)"#).unwrap()
});

static WINDOWS_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b[A-Za-z]:\\[^\s'"]*"#).unwrap());

// Long base64 / base64url / hex runs.
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/_\-]{32,}={0,2}").unwrap());

/// Redact secrets, paths and addresses from diagnostic text.
pub fn sanitize_error_text(input: &str) -> String {
    let text = BEARER.replace_all(input, REDACTED_BEARER);
    let text = IPV4.replace_all(&text, REDACTED_IP);
    let text = WINDOWS_PATH.replace_all(&text, REDACTED_PATH);
    let text = UNIX_PATH.replace_all(&text, format!("${{1}}{}", REDACTED_PATH).as_str());
    let text = TOKEN.replace_all(&text, REDACTED_TOKEN);
    text.into_owned()
}
