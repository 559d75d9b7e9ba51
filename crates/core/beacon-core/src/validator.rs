//! Structural validation of configuration candidates

use crate::types::Configuration;
use crate::{BeaconError, Result};

/// Check that a candidate is fully populated and its URL is usable.
///
/// Failures are always [`BeaconError::Validation`], which classifies as a
/// config error regardless of message text.
pub fn validate_configuration(config: &Configuration) -> Result<()> {
    if config.url.trim().is_empty() {
        return Err(BeaconError::validation("Configuration URL is empty"));
    }
    if config.anon_key.trim().is_empty() {
        return Err(BeaconError::validation("Configuration public key is empty"));
    }

    let parsed = url::Url::parse(config.url.trim()).map_err(|e| {
        BeaconError::validation(format!("Invalid URL format '{}': {}", config.url, e))
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BeaconError::validation(format!(
            "Invalid URL format '{}': unsupported scheme {}",
            config.url,
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(BeaconError::validation(format!(
            "Invalid URL format '{}': missing host",
            config.url
        )));
    }

    Ok(())
}

/// Whether a candidate passes [`validate_configuration`]
pub fn is_valid(config: &Configuration) -> bool {
    validate_configuration(config).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn test_accepts_complete_configuration() {
        let config = Configuration::new("https://x.example.com", "abc123def456");
        assert!(validate_configuration(&config).is_ok());
    }

    #[test]
    fn test_rejects_empty_fields() {
        for config in [
            Configuration::new("", "abc"),
            Configuration::new("https://x.example.com", ""),
            Configuration::new("   ", "   "),
        ] {
            let err = validate_configuration(&config).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }
    }

    #[test]
    fn test_rejects_malformed_url() {
        assert!(!is_valid(&Configuration::new("x.example.com", "abc")));
        assert!(!is_valid(&Configuration::new("ftp://x.example.com", "abc")));
        assert!(!is_valid(&Configuration::new("https://", "abc")));
    }

    #[test]
    fn test_network_sounding_message_still_config() {
        let err =
            validate_configuration(&Configuration::new("connection://timeout", "k")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
