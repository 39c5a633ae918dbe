// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Events reported by the delivery core.
//!
//! The core never formats or owns diagnostic output for loss and failure: it
//! reports a [`ShipperEvent`] to an [`EventObserver`] and carries on. The
//! default observer, [`TracingObserver`], forwards every event to `tracing`.
//!
//! ```text
//!   EvictingBuffer ──> Evicted
//!   FlushEngine    ──> FlushStarted, CycleFailed
//!   DeliveryClient ──> RetryScheduled, Delivered, Dropped
//! ```

use std::fmt;

use tracing::{debug, error, warn};

use crate::delivery::DropReason;

/// Why an attempt is being retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCause {
    /// Response status matched the retryable pattern.
    Status(u16),
    /// Transport-level I/O failure (connect, timeout, reset).
    Transport(String),
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "status {status}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipperEvent {
    /// Oldest buffered items were removed to admit a new one.
    Evicted { items: u64, cost: u64 },
    /// A batch was drained and is about to be aggregated and sent.
    FlushStarted { items: usize, remaining: usize },
    RetryScheduled { attempt: u32, cause: RetryCause },
    Delivered { attempts: u32, bytes: usize },
    Dropped { reason: DropReason, attempts: u32 },
    /// Aggregation failed or the cycle panicked; the cycle was ended early.
    CycleFailed { error: String },
}

/// Receives events from the core. Implementations must not block.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &ShipperEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn on_event(&self, event: &ShipperEvent) {
        match event {
            ShipperEvent::Evicted { items, cost } => {
                warn!("LOGS | Buffer full, evicted {items} oldest messages ({cost} bytes)");
            }
            ShipperEvent::FlushStarted { items, remaining } => {
                debug!("LOGS | Flushing and sending out {items} messages ({remaining} messages left)");
            }
            ShipperEvent::RetryScheduled { attempt, cause } => {
                warn!("LOGS | Could not send logs on attempt {attempt} ({cause}), retrying");
            }
            ShipperEvent::Delivered { attempts, bytes } => {
                debug!("LOGS | Successfully sent {bytes} bytes after {attempts} attempts");
            }
            ShipperEvent::Dropped { reason, attempts } => {
                error!("LOGS | Dropping batch after {attempts} attempts: {reason}");
            }
            ShipperEvent::CycleFailed { error } => {
                warn!("LOGS | Exception while attempting to flush and send: {error}");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_tracing_observer_reports_drops() {
        TracingObserver.on_event(&ShipperEvent::Dropped {
            reason: DropReason::RetryBudgetExhausted,
            attempts: 4,
        });
        assert!(logs_contain("Dropping batch after 4 attempts"));
        assert!(logs_contain("retry budget exhausted"));
    }

    #[traced_test]
    #[test]
    fn test_tracing_observer_reports_evictions() {
        TracingObserver.on_event(&ShipperEvent::Evicted { items: 2, cost: 8 });
        assert!(logs_contain("evicted 2 oldest messages (8 bytes)"));
    }

    #[test]
    fn test_retry_cause_display() {
        assert_eq!(RetryCause::Status(503).to_string(), "status 503");
        assert_eq!(
            RetryCause::Transport("connection refused".to_string()).to_string(),
            "transport error: connection refused"
        );
    }
}
