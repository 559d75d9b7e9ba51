//! Keyword-based error classification

use crate::types::ErrorKind;

const URL_FORMAT_PATTERNS: &[&str] = &["invalid url", "url format", "invalid format", "malformed"];

const NETWORK_PATTERNS: &[&str] = &["network", "fetch", "connection", "timeout", "timed out", "cors"];

const AUTH_PATTERNS: &[&str] = &[
    "auth",
    "unauthorized",
    "permission",
    "forbidden",
    "credentials",
    "jwt",
];

const DATABASE_PATTERNS: &[&str] = &["database", "table", "sql", "query", "schema", "relation"];

const CONFIG_PATTERNS: &[&str] = &["config", "settings", "initialization"];

/// Classify a free-text error message.
///
/// Categories are checked in a fixed order and the first match wins. URL
/// format phrasing is checked ahead of every other category, not only ahead
/// of the generic config keywords: a malformed endpoint is a configuration
/// problem even when the message also mentions the fetch that tripped over
/// it, so "failed to fetch: invalid url" is config, not network.
pub fn determine_error_type(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if matches(URL_FORMAT_PATTERNS) {
        ErrorKind::Config
    } else if matches(NETWORK_PATTERNS) {
        ErrorKind::Network
    } else if matches(AUTH_PATTERNS) {
        ErrorKind::Auth
    } else if matches(DATABASE_PATTERNS) {
        ErrorKind::Database
    } else if matches(CONFIG_PATTERNS) {
        ErrorKind::Config
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_examples() {
        assert_eq!(
            determine_error_type("CORS error while fetching"),
            ErrorKind::Network
        );
        assert_eq!(determine_error_type("permission denied"), ErrorKind::Auth);
        assert_eq!(determine_error_type("invalid url format"), ErrorKind::Config);
        assert_eq!(determine_error_type(""), ErrorKind::Unknown);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(determine_error_type("Request TIMEOUT"), ErrorKind::Network);
        assert_eq!(determine_error_type("Unauthorized"), ErrorKind::Auth);
    }

    #[test]
    fn test_first_category_wins() {
        // "connection" (network) beats "settings" (config)
        assert_eq!(
            determine_error_type("connection refused while loading settings"),
            ErrorKind::Network
        );
        // url-format phrasing beats the network keyword "fetch"
        assert_eq!(
            determine_error_type("malformed endpoint in fetch"),
            ErrorKind::Config
        );
        assert_eq!(
            determine_error_type("failed to fetch: invalid url"),
            ErrorKind::Config
        );
        assert_eq!(
            determine_error_type("relation \"system_settings\" does not exist"),
            ErrorKind::Database
        );
        assert_eq!(
            determine_error_type("missing initialization flag"),
            ErrorKind::Config
        );
    }
}
