// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of aggregated batches with status-driven retry.
//!
//! # Architecture
//!
//! ```text
//!   payload
//!      │
//!      v
//!   ┌─────────────┐   200                     ┌───────────┐
//!   │  HTTP POST  │ ────────────────────────> │ Delivered │
//!   └──────┬──────┘                           └───────────┘
//!          │ retryable status / I/O error
//!          v
//!   ┌─────────────┐   budget exhausted        ┌───────────┐
//!   │   Budget?   │ ────────────────────────> │  Dropped  │
//!   └──────┬──────┘                           └───────────┘
//!          │ retry left                             ^
//!          v                                        │ cancelled
//!   ┌─────────────┐                                 │
//!   │    Sleep    │ ────────────────────────────────┘
//!   └─────────────┘
//! ```
//!
//! A status that is neither 200 nor retryable, and any failure to construct
//! the request (malformed URL, disallowed scheme), drops the batch at once
//! without consuming retry budget. Transport failures while performing the
//! request are retried like a retryable status.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{DeliverySettings, ProxyAuth};
use crate::errors::{ConfigError, ProxyError};
use crate::events::{EventObserver, RetryCause, ShipperEvent, TracingObserver};

/// Why a batch was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Non-200 status that does not match the retryable pattern.
    FatalStatus(u16),
    /// The request could not be constructed.
    FatalRequest(String),
    RetryBudgetExhausted,
    /// Cancelled while waiting to retry.
    Interrupted,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalStatus(status) => write!(f, "non-retryable status {status}"),
            Self::FatalRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::RetryBudgetExhausted => write!(f, "retry budget exhausted"),
            Self::Interrupted => write!(f, "interrupted while waiting to retry"),
        }
    }
}

/// Final resolution of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Dropped { reason: DropReason, attempts: u32 },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Dropped { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Classification of a single attempt.
#[derive(Debug)]
enum Attempt {
    Accepted,
    Retryable(RetryCause),
    Fatal(DropReason),
}

/// Sends payloads to the ingestion endpoint over one pooled HTTP client.
///
/// Sends are issued sequentially by the flush task, so the client is never
/// shared between concurrent sends.
#[derive(Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    settings: Arc<DeliverySettings>,
    observer: Arc<dyn EventObserver>,
}

impl DeliveryClient {
    /// # Errors
    ///
    /// Fails if the proxy cannot be applied or the HTTP client cannot be built.
    pub fn new(settings: DeliverySettings) -> Result<Self, ConfigError> {
        let client = build_client(&settings)?;
        Ok(DeliveryClient {
            client,
            settings: Arc::new(settings),
            observer: Arc::new(TracingObserver),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Delivers `body`, retrying per the configured budget.
    ///
    /// Returns only once the payload was accepted with a 200 or dropped.
    /// Cancelling `cancel` aborts a pending backoff sleep and drops the payload.
    pub async fn send(&self, body: String, cancel: &CancellationToken) -> DeliveryOutcome {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            let time = Instant::now();
            let cause = match self.try_send(&body).await {
                Attempt::Accepted => {
                    debug!(
                        "LOGS | Successfully sent log request in {} ms",
                        time.elapsed().as_millis()
                    );
                    self.observer.on_event(&ShipperEvent::Delivered {
                        attempts,
                        bytes: body.len(),
                    });
                    return DeliveryOutcome::Delivered { attempts };
                }
                Attempt::Fatal(reason) => return self.drop_batch(reason, attempts),
                Attempt::Retryable(cause) => cause,
            };

            if !self.settings.retry_budget.allows_retry(attempts - 1) {
                return self.drop_batch(DropReason::RetryBudgetExhausted, attempts);
            }
            self.observer.on_event(&ShipperEvent::RetryScheduled {
                attempt: attempts,
                cause,
            });
            if !backoff(self.settings.retry_interval, cancel).await {
                return self.drop_batch(DropReason::Interrupted, attempts);
            }
        }
    }

    async fn try_send(&self, body: &str) -> Attempt {
        let url = match Url::parse(&self.settings.url) {
            Ok(url) => url,
            Err(e) => {
                return Attempt::Fatal(DropReason::FatalRequest(format!(
                    "invalid URL {}: {e}",
                    self.settings.url
                )))
            }
        };

        let response = self
            .client
            .post(url)
            .headers(self.settings.headers.clone())
            .body(body.to_owned())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                // Read the body to completion so the connection goes back to the pool
                let text = response.text().await.unwrap_or_default();
                if status == StatusCode::OK {
                    return Attempt::Accepted;
                }
                debug!("LOGS | Received HTTP error from ingestion endpoint: {status} {text:?}");
                if self.settings.retryable_status.is_match(status.as_str()) {
                    Attempt::Retryable(RetryCause::Status(status.as_u16()))
                } else {
                    Attempt::Fatal(DropReason::FatalStatus(status.as_u16()))
                }
            }
            Err(e) if e.is_builder() => Attempt::Fatal(DropReason::FatalRequest(e.to_string())),
            Err(e) => {
                debug!("LOGS | Could not send log request: {e:?}");
                Attempt::Retryable(RetryCause::Transport(e.to_string()))
            }
        }
    }

    fn drop_batch(&self, reason: DropReason, attempts: u32) -> DeliveryOutcome {
        self.observer.on_event(&ShipperEvent::Dropped {
            reason: reason.clone(),
            attempts,
        });
        DeliveryOutcome::Dropped { reason, attempts }
    }
}

/// Sleeps for `interval`. Returns false if cancelled first.
async fn backoff(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(interval) => true,
    }
}

fn build_client(settings: &DeliverySettings) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(settings.connection_timeout)
        .timeout(settings.socket_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(proxy) = &settings.proxy {
        let mut reqwest_proxy = reqwest::Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))?;
        match &proxy.auth {
            Some(ProxyAuth::Basic { username, password }) => {
                reqwest_proxy = reqwest_proxy.basic_auth(username, password);
            }
            Some(ProxyAuth::Ntlm { .. }) => return Err(ProxyError::NtlmUnsupported.into()),
            None => {}
        }
        builder = builder.proxy(reqwest_proxy);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxySettings, ShipperConfig};
    use crate::events::test_support::RecordingObserver;

    fn settings(url: &str) -> DeliverySettings {
        DeliverySettings::try_from(&ShipperConfig {
            url: Some(url.to_string()),
            retry_interval_ms: 1,
            max_number_of_retries: 3,
            ..Default::default()
        })
        .expect("valid settings")
    }

    fn proxied_settings(auth_type: &str, domain: Option<&str>) -> DeliverySettings {
        DeliverySettings::try_from(&ShipperConfig {
            url: Some("http://localhost/receiver".to_string()),
            proxy: Some(ProxySettings {
                hostname: Some("proxy".to_string()),
                port: Some(8080),
                auth_type: Some(auth_type.to_string()),
                username: Some("alice".to_string()),
                password: Some("secret".to_string()),
                domain: domain.map(str::to_string),
            }),
            ..Default::default()
        })
        .expect("valid settings")
    }

    #[test]
    fn test_ntlm_proxy_is_rejected_at_construction() {
        let settings = proxied_settings("ntlm", Some("CORP"));
        assert!(matches!(
            settings.proxy().and_then(|p| p.auth()),
            Some(ProxyAuth::Ntlm { .. })
        ));
        assert!(matches!(
            DeliveryClient::new(settings),
            Err(ConfigError::Proxy(ProxyError::NtlmUnsupported))
        ));
    }

    #[test]
    fn test_basic_proxy_builds_client() {
        let settings = proxied_settings("basic", None);
        assert_eq!(settings.proxy().map(|p| (p.host(), p.port())), Some(("proxy", 8080)));
        assert!(DeliveryClient::new(settings).is_ok());
    }

    #[tokio::test]
    async fn test_malformed_url_is_dropped_without_retry() {
        let observer = Arc::new(RecordingObserver::default());
        let client = DeliveryClient::new(settings("not a url"))
            .expect("client")
            .with_observer(observer.clone());

        let outcome = client
            .send("line\n".to_string(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.attempts(), 1);
        assert!(matches!(
            outcome,
            DeliveryOutcome::Dropped {
                reason: DropReason::FatalRequest(_),
                ..
            }
        ));
        let events = observer.events();
        assert_eq!(events.len(), 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, ShipperEvent::RetryScheduled { .. })));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_fatal() {
        let client = DeliveryClient::new(settings("ftp://localhost/receiver")).expect("client");
        let outcome = client
            .send("line\n".to_string(), &CancellationToken::new())
            .await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::Dropped {
                reason: DropReason::FatalRequest(_),
                attempts: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_backoff_returns_false_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!backoff(Duration::from_secs(60), &cancel).await);
        assert!(backoff(Duration::from_millis(1), &CancellationToken::new()).await);
    }

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(
            DropReason::FatalStatus(429).to_string(),
            "non-retryable status 429"
        );
        assert_eq!(
            DropReason::Interrupted.to_string(),
            "interrupted while waiting to retry"
        );
    }
}
