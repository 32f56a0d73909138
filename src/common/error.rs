//! Error types for the resolution core

use std::io;
use thiserror::Error;

/// Agent error type
#[derive(Error, Debug)]
pub enum Error {
    /// No usable hostname is configured for the destination
    #[error("Destination not configured: {0}")]
    ConfigurationInvalid(String),

    /// Channel rebuild refused while lookups are still outstanding
    #[error("Resolver channel busy: {0} lookups outstanding")]
    ChannelBusy(usize),

    /// Dispatch attempted before the channel was ever built
    #[error("Resolver channel not initialized")]
    ChannelUninitialized,

    /// Refused, timed out or cancelled lookup; recorded and retried
    #[error("Transient resolution failure: {0}")]
    TransientResolutionFailure(String),

    /// Empty or exhausted address list
    #[error("No address available for {0}")]
    AddressUnavailable(String),

    #[error("Format error: {0}")]
    FormatError(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn dns<S: Into<String>>(msg: S) -> Self {
        Error::Dns(msg.into())
    }

    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::FormatError(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Error::AddressUnavailable(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether the owning loop should simply retry later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ChannelBusy(_)
                | Error::ChannelUninitialized
                | Error::TransientResolutionFailure(_)
                | Error::AddressUnavailable(_)
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::config("missing destination");
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::ChannelBusy(2);
        assert_eq!(e.to_string(), "Resolver channel busy: 2 lookups outstanding");

        let e = Error::unavailable("manager");
        assert_eq!(e.to_string(), "No address available for manager");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::ChannelBusy(1).is_retryable());
        assert!(Error::ChannelUninitialized.is_retryable());
        assert!(!Error::ConfigurationInvalid("redirector".into()).is_retryable());
        assert!(!Error::format("bad family").is_retryable());
    }
}
