// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for configuration, proxy validation and batch aggregation.
//!
//! Delivery failures are deliberately absent: a batch send never returns an
//! error, it resolves to a [`crate::delivery::DeliveryOutcome`] instead.

/// Errors raised while validating configuration, before any send occurs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Buffer capacity must be greater than zero")]
    InvalidCapacity,

    #[error("messages_per_request must be at least 1")]
    InvalidMessagesPerRequest,

    #[error("flushing_accuracy_ms must be greater than zero")]
    InvalidFlushingAccuracy,

    #[error("Endpoint URL is not set")]
    MissingUrl,

    #[error("Invalid retryable status pattern: {0}")]
    InvalidRetryPattern(#[from] regex::Error),

    #[error("Invalid value for header {name}")]
    InvalidHeader { name: &'static str },

    #[error("Invalid proxy settings: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),

    #[error("Invalid configuration document: {0}")]
    Document(#[from] serde_json::Error),
}

/// Proxy validation failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("port property must be set")]
    MissingPort,

    #[error("username and password properties must be set if authType property is set")]
    MissingCredentials,

    #[error("domain property must be set if authType property is ntlm")]
    MissingDomain,

    #[error("authType type not supported: {0}")]
    UnsupportedAuth(String),

    #[error("NTLM proxy authentication is not supported by the HTTP transport")]
    NtlmUnsupported,
}

/// Raised by a [`crate::flush::BatchAggregator`] that cannot turn a batch into a payload.
#[derive(Debug, thiserror::Error)]
#[error("Failed to aggregate batch of {items} items: {message}")]
pub struct AggregateError {
    pub items: usize,
    pub message: String,
}

/// Why a flush cycle ended early. Contained at the cycle boundary.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Flush cycle panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Flush scheduler already started")]
    AlreadyStarted,

    #[error("Flush scheduler must be started from within a Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::InvalidHeader { name: "X-Sumo-Name" };
        assert_eq!(error.to_string(), "Invalid value for header X-Sumo-Name");

        let error = ConfigError::from(ProxyError::MissingPort);
        assert_eq!(
            error.to_string(),
            "Invalid proxy settings: port property must be set"
        );
    }

    #[test]
    fn test_retry_pattern_error_converts() {
        #[allow(clippy::invalid_regex)]
        let regex_error = regex::Regex::new("(").unwrap_err();
        let error: ConfigError = regex_error.into();
        assert!(matches!(error, ConfigError::InvalidRetryPattern(_)));
    }

    #[test]
    fn test_aggregate_error_display() {
        let error = AggregateError {
            items: 3,
            message: "payload too large".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to aggregate batch of 3 items: payload too large"
        );
    }
}
