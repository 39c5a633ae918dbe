// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipper configuration.
//!
//! [`ShipperConfig`] is plain data: it can be built in code, deserialized from
//! JSON, or read from `LOG_SHIPPER_*` environment variables. It is validated
//! exactly once, when converted into the immutable [`DeliverySettings`] and
//! [`FlushSettings`] consumed by the core. Nothing re-validates on later use.
//!
//! | Variable                               | Field                       |
//! |----------------------------------------|-----------------------------|
//! | `LOG_SHIPPER_URL`                      | `url`                       |
//! | `LOG_SHIPPER_SOURCE_NAME`              | `source_name`               |
//! | `LOG_SHIPPER_SOURCE_CATEGORY`          | `source_category`           |
//! | `LOG_SHIPPER_SOURCE_HOST`              | `source_host`               |
//! | `LOG_SHIPPER_CLIENT_HEADER`            | `client_header_value`       |
//! | `LOG_SHIPPER_FIELDS`                   | `fields`                    |
//! | `LOG_SHIPPER_RETRY_INTERVAL_MS`        | `retry_interval_ms`         |
//! | `LOG_SHIPPER_MAX_NUMBER_OF_RETRIES`    | `max_number_of_retries`     |
//! | `LOG_SHIPPER_CONNECTION_TIMEOUT_MS`    | `connection_timeout_ms`     |
//! | `LOG_SHIPPER_SOCKET_TIMEOUT_MS`        | `socket_timeout_ms`         |
//! | `LOG_SHIPPER_RETRYABLE_STATUS_PATTERN` | `retryable_status_pattern`  |
//! | `LOG_SHIPPER_MAX_QUEUE_SIZE_BYTES`     | `max_queue_size_bytes`      |
//! | `LOG_SHIPPER_MESSAGES_PER_REQUEST`     | `messages_per_request`      |
//! | `LOG_SHIPPER_MAX_FLUSH_INTERVAL_MS`    | `max_flush_interval_ms`     |
//! | `LOG_SHIPPER_FLUSHING_ACCURACY_MS`     | `flushing_accuracy_ms`      |
//! | `LOG_SHIPPER_FLUSH_ALL_BEFORE_STOPPING`| `flush_all_before_stopping` |
//! | `LOG_SHIPPER_PROXY_HOST`, `_PORT`, `_AUTH`, `_USER`, `_PASSWORD`, `_DOMAIN` | `proxy` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use tracing::warn;

use crate::constants;
use crate::errors::{ConfigError, ProxyError};

const NTLM_AUTH: &str = "ntlm";
const BASIC_AUTH: &str = "basic";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShipperConfig {
    pub url: Option<String>,
    pub source_name: Option<String>,
    pub source_category: Option<String>,
    pub source_host: Option<String>,
    pub client_header_value: Option<String>,
    /// Structured fields, sent verbatim as `key=value,key=value`.
    pub fields: Option<String>,
    pub retry_interval_ms: u64,
    /// Retries after the first attempt. Negative means unlimited.
    pub max_number_of_retries: i64,
    pub connection_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    /// Tested against the whole decimal status code.
    pub retryable_status_pattern: String,
    pub max_queue_size_bytes: u64,
    pub messages_per_request: usize,
    /// Zero or negative makes every tick due.
    pub max_flush_interval_ms: i64,
    pub flushing_accuracy_ms: u64,
    pub flush_all_before_stopping: bool,
    pub proxy: Option<ProxySettings>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        ShipperConfig {
            url: None,
            source_name: None,
            source_category: None,
            source_host: None,
            client_header_value: Some(constants::DEFAULT_CLIENT_HEADER_VALUE.to_string()),
            fields: None,
            retry_interval_ms: constants::DEFAULT_RETRY_INTERVAL_MS,
            max_number_of_retries: constants::DEFAULT_MAX_NUMBER_OF_RETRIES,
            connection_timeout_ms: constants::DEFAULT_CONNECTION_TIMEOUT_MS,
            socket_timeout_ms: constants::DEFAULT_SOCKET_TIMEOUT_MS,
            retryable_status_pattern: constants::DEFAULT_RETRYABLE_STATUS_PATTERN.to_string(),
            max_queue_size_bytes: constants::DEFAULT_MAX_QUEUE_SIZE_BYTES,
            messages_per_request: constants::DEFAULT_MESSAGES_PER_REQUEST,
            max_flush_interval_ms: constants::DEFAULT_MAX_FLUSH_INTERVAL_MS,
            flushing_accuracy_ms: constants::DEFAULT_FLUSHING_ACCURACY_MS,
            flush_all_before_stopping: false,
            proxy: None,
        }
    }
}

impl ShipperConfig {
    /// Reads configuration from `LOG_SHIPPER_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Parses a JSON document; absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Document`] if the document is not valid.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// Unparsable numbers and booleans are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ShipperConfig::default();
        let string = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let proxy = string("LOG_SHIPPER_PROXY_HOST").map(|hostname| ProxySettings {
            hostname: Some(hostname),
            port: parse_or(&lookup, "LOG_SHIPPER_PROXY_PORT", None::<u16>, |v| {
                v.parse().ok().map(Some)
            }),
            auth_type: string("LOG_SHIPPER_PROXY_AUTH"),
            username: string("LOG_SHIPPER_PROXY_USER"),
            password: string("LOG_SHIPPER_PROXY_PASSWORD"),
            domain: string("LOG_SHIPPER_PROXY_DOMAIN"),
        });

        ShipperConfig {
            url: string("LOG_SHIPPER_URL"),
            source_name: string("LOG_SHIPPER_SOURCE_NAME"),
            source_category: string("LOG_SHIPPER_SOURCE_CATEGORY"),
            source_host: string("LOG_SHIPPER_SOURCE_HOST"),
            client_header_value: string("LOG_SHIPPER_CLIENT_HEADER")
                .or(defaults.client_header_value),
            fields: string("LOG_SHIPPER_FIELDS"),
            retry_interval_ms: parse_number(
                &lookup,
                "LOG_SHIPPER_RETRY_INTERVAL_MS",
                defaults.retry_interval_ms,
            ),
            max_number_of_retries: parse_number(
                &lookup,
                "LOG_SHIPPER_MAX_NUMBER_OF_RETRIES",
                defaults.max_number_of_retries,
            ),
            connection_timeout_ms: parse_number(
                &lookup,
                "LOG_SHIPPER_CONNECTION_TIMEOUT_MS",
                defaults.connection_timeout_ms,
            ),
            socket_timeout_ms: parse_number(
                &lookup,
                "LOG_SHIPPER_SOCKET_TIMEOUT_MS",
                defaults.socket_timeout_ms,
            ),
            retryable_status_pattern: string("LOG_SHIPPER_RETRYABLE_STATUS_PATTERN")
                .unwrap_or(defaults.retryable_status_pattern),
            max_queue_size_bytes: parse_number(
                &lookup,
                "LOG_SHIPPER_MAX_QUEUE_SIZE_BYTES",
                defaults.max_queue_size_bytes,
            ),
            messages_per_request: parse_number(
                &lookup,
                "LOG_SHIPPER_MESSAGES_PER_REQUEST",
                defaults.messages_per_request,
            ),
            max_flush_interval_ms: parse_number(
                &lookup,
                "LOG_SHIPPER_MAX_FLUSH_INTERVAL_MS",
                defaults.max_flush_interval_ms,
            ),
            flushing_accuracy_ms: parse_number(
                &lookup,
                "LOG_SHIPPER_FLUSHING_ACCURACY_MS",
                defaults.flushing_accuracy_ms,
            ),
            flush_all_before_stopping: parse_or(
                &lookup,
                "LOG_SHIPPER_FLUSH_ALL_BEFORE_STOPPING",
                defaults.flush_all_before_stopping,
                parse_bool,
            ),
            proxy,
        }
    }
}

fn parse_number<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    parse_or(lookup, name, default, |v| v.parse().ok())
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match parse(raw.trim()) {
        Some(value) => value,
        None => {
            warn!("Ignoring invalid value '{raw}' for {name}, using default");
            default
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Proxy settings as configured. Use [`ProxySettings::validate`] before applying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    /// `basic` or `ntlm`; defaults to `basic` when a username is given.
    pub auth_type: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyAuth {
    Basic {
        username: String,
        password: String,
    },
    Ntlm {
        username: String,
        password: String,
        domain: String,
    },
}

/// Only produced by [`ProxySettings::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProxy {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) auth: Option<ProxyAuth>,
}

impl ValidatedProxy {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn auth(&self) -> Option<&ProxyAuth> {
        self.auth.as_ref()
    }
}

impl ProxySettings {
    /// Returns `Ok(None)` when no proxy host is configured.
    ///
    /// # Errors
    ///
    /// Returns a [`ProxyError`] naming the first missing or unsupported property.
    pub fn validate(&self) -> Result<Option<ValidatedProxy>, ProxyError> {
        let Some(host) = non_blank(self.hostname.as_deref()) else {
            return Ok(None);
        };
        let port = self.port.ok_or(ProxyError::MissingPort)?;

        let auth_type = non_blank(self.auth_type.as_deref())
            .map(str::to_lowercase)
            .or_else(|| self.username.as_ref().map(|_| BASIC_AUTH.to_string()));
        let Some(auth_type) = auth_type else {
            return Ok(Some(ValidatedProxy {
                host: host.to_string(),
                port,
                auth: None,
            }));
        };

        let (Some(username), Some(password)) = (self.username.clone(), self.password.clone())
        else {
            return Err(ProxyError::MissingCredentials);
        };
        let auth = match auth_type.as_str() {
            NTLM_AUTH => ProxyAuth::Ntlm {
                username,
                password,
                domain: self.domain.clone().ok_or(ProxyError::MissingDomain)?,
            },
            BASIC_AUTH => ProxyAuth::Basic { username, password },
            _ => return Err(ProxyError::UnsupportedAuth(auth_type)),
        };

        Ok(Some(ValidatedProxy {
            host: host.to_string(),
            port,
            auth: Some(auth),
        }))
    }
}

/// How many retries a batch gets after its first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    Unlimited,
    Limited(u32),
}

impl RetryBudget {
    #[must_use]
    pub fn from_max_retries(max_number_of_retries: i64) -> Self {
        match u32::try_from(max_number_of_retries) {
            Ok(retries) => RetryBudget::Limited(retries),
            Err(_) if max_number_of_retries < 0 => RetryBudget::Unlimited,
            Err(_) => RetryBudget::Limited(u32::MAX),
        }
    }

    /// Whether another attempt is allowed after `retries_used` retries.
    #[must_use]
    pub fn allows_retry(self, retries_used: u32) -> bool {
        match self {
            RetryBudget::Unlimited => true,
            RetryBudget::Limited(max) => retries_used < max,
        }
    }
}

/// Validated, immutable settings for the [`crate::delivery::DeliveryClient`].
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Parsed on every send so a malformed URL drops the batch instead of
    /// stopping the shipper from starting.
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) retry_interval: Duration,
    pub(crate) retry_budget: RetryBudget,
    pub(crate) connection_timeout: Duration,
    pub(crate) socket_timeout: Duration,
    pub(crate) retryable_status: Regex,
    pub(crate) proxy: Option<ValidatedProxy>,
}

impl DeliverySettings {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    #[must_use]
    pub fn retry_budget(&self) -> RetryBudget {
        self.retry_budget
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&ValidatedProxy> {
        self.proxy.as_ref()
    }
}

impl TryFrom<&ShipperConfig> for DeliverySettings {
    type Error = ConfigError;

    fn try_from(config: &ShipperConfig) -> Result<Self, Self::Error> {
        let url = non_blank(config.url.as_deref())
            .ok_or(ConfigError::MissingUrl)?
            .to_string();
        let retryable_status = Regex::new(&format!(
            "^(?:{})$",
            config.retryable_status_pattern
        ))?;
        let proxy = match &config.proxy {
            Some(settings) => settings.validate()?,
            None => None,
        };

        Ok(DeliverySettings {
            url,
            headers: build_headers(config)?,
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            retry_budget: RetryBudget::from_max_retries(config.max_number_of_retries),
            connection_timeout: Duration::from_millis(config.connection_timeout_ms),
            socket_timeout: Duration::from_millis(config.socket_timeout_ms),
            retryable_status,
            proxy,
        })
    }
}

/// Headers with a blank configured value are left out entirely.
fn build_headers(config: &ShipperConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(constants::CONTENT_TYPE),
    );
    let annotations = [
        (constants::SOURCE_NAME_HEADER, &config.source_name),
        (constants::SOURCE_CATEGORY_HEADER, &config.source_category),
        (constants::SOURCE_HOST_HEADER, &config.source_host),
        (constants::CLIENT_HEADER, &config.client_header_value),
        (constants::FIELDS_HEADER, &config.fields),
    ];
    for (name, value) in annotations {
        let Some(value) = non_blank(value.as_deref()) else {
            continue;
        };
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader { name })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader { name })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Validated settings for the [`crate::flush::FlushEngine`] and its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSettings {
    pub messages_per_request: usize,
    pub max_flush_interval_ms: i64,
    pub flushing_accuracy: Duration,
    pub flush_all_before_stopping: bool,
}

impl TryFrom<&ShipperConfig> for FlushSettings {
    type Error = ConfigError;

    fn try_from(config: &ShipperConfig) -> Result<Self, Self::Error> {
        if config.messages_per_request == 0 {
            return Err(ConfigError::InvalidMessagesPerRequest);
        }
        if config.flushing_accuracy_ms == 0 {
            return Err(ConfigError::InvalidFlushingAccuracy);
        }
        Ok(FlushSettings {
            messages_per_request: config.messages_per_request,
            max_flush_interval_ms: config.max_flush_interval_ms,
            flushing_accuracy: Duration::from_millis(config.flushing_accuracy_ms),
            flush_all_before_stopping: config.flush_all_before_stopping,
        })
    }
}
