// =============================================================================
// Error taxonomy
// =============================================================================
//
// SourceError and CatalogError are caught at their call boundary and turned
// into a recorded failure or an empty result; they never abort sibling work.
// ConfigurationError is fatal for the operation that needs the missing piece.
// =============================================================================

use thiserror::Error;

/// One upstream source failed or timed out.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("rate limit reached: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Upstream(String),
}

impl From<anyhow::Error> for SourceError {
    fn from(err: anyhow::Error) -> Self {
        // Alternate format keeps the whole context chain on one line.
        Self::Upstream(format!("{err:#}"))
    }
}

/// The scheduled-event catalog could not be fetched or parsed.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("calendar request failed: {0}")]
    Fetch(String),

    #[error("calendar returned HTTP {0}")]
    Status(u16),

    #[error("calendar payload could not be parsed: {0}")]
    Parse(String),
}

/// Required configuration is missing or invalid.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// A push notification could not be delivered.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("push request failed: {0}")]
    Transport(String),

    #[error("push endpoint returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_context_is_flattened_into_upstream() {
        let err = anyhow::anyhow!("connection reset").context("GET premiumIndex");
        let source_err: SourceError = err.into();
        assert_eq!(source_err.to_string(), "GET premiumIndex: connection reset");
    }

    #[test]
    fn timeout_message_names_duration() {
        assert_eq!(SourceError::Timeout(45_000).to_string(), "timed out after 45000ms");
    }

    #[test]
    fn configuration_error_messages() {
        assert_eq!(
            ConfigurationError::Missing("SC_SENDKEY").to_string(),
            "missing required setting: SC_SENDKEY"
        );
        let invalid = ConfigurationError::Invalid {
            name: "reference_utc_offset_hours",
            reason: "out of range".into(),
        };
        assert!(invalid.to_string().contains("reference_utc_offset_hours"));
    }
}
