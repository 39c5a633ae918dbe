// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-oriented log shipping assembled from a [`ShipperConfig`].

use std::sync::Arc;

use tracing::debug;

use crate::buffer::EvictingBuffer;
use crate::config::{DeliverySettings, FlushSettings, ShipperConfig};
use crate::delivery::DeliveryClient;
use crate::errors::{AggregateError, ShipperError};
use crate::events::{EventObserver, TracingObserver};
use crate::flush::{BatchAggregator, FlushEngine, FlushSummary};
use crate::scheduler::FlushScheduler;

/// Joins log lines into one request body. Lines keep their own terminators.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineAggregator;

impl BatchAggregator<String, String> for LineAggregator {
    fn aggregate(&self, batch: Vec<String>) -> Result<String, AggregateError> {
        Ok(batch.concat())
    }
}

/// Cost of a log line is its length in bytes.
#[allow(clippy::ptr_arg)]
fn line_cost(line: &String) -> u64 {
    line.len() as u64
}

/// Buffers log lines and ships them in the background until stopped.
pub struct LogShipper {
    buffer: Arc<EvictingBuffer<String>>,
    scheduler: FlushScheduler<String, String>,
}

impl LogShipper {
    /// Validates `config` and starts the flush task on the current runtime.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, or when called outside a Tokio runtime.
    pub fn start(config: &ShipperConfig) -> Result<Self, ShipperError> {
        Self::start_with_observer(config, Arc::new(TracingObserver))
    }

    /// Like [`LogShipper::start`], reporting every event to `observer`.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, or when called outside a Tokio runtime.
    pub fn start_with_observer(
        config: &ShipperConfig,
        observer: Arc<dyn EventObserver>,
    ) -> Result<Self, ShipperError> {
        let delivery = DeliverySettings::try_from(config)?;
        let flush = FlushSettings::try_from(config)?;
        let client = DeliveryClient::new(delivery)?.with_observer(Arc::clone(&observer));
        let buffer = Arc::new(
            EvictingBuffer::new(config.max_queue_size_bytes, line_cost)?
                .with_observer(Arc::clone(&observer)),
        );

        let engine = FlushEngine::from_settings(
            Arc::clone(&buffer),
            Arc::new(LineAggregator),
            Arc::new(client),
            &flush,
        )
        .with_observer(observer);
        let mut scheduler =
            FlushScheduler::new(engine, flush.flushing_accuracy, flush.flush_all_before_stopping)?;
        scheduler.start()?;

        debug!(
            "LOGS | Log shipper started, {} bytes of buffer, {} messages per request",
            config.max_queue_size_bytes, flush.messages_per_request
        );
        Ok(LogShipper { buffer, scheduler })
    }

    /// Buffers one log line. Never blocks on the network.
    pub fn log(&self, line: impl Into<String>) {
        self.buffer.add(line.into());
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<EvictingBuffer<String>> {
        &self.buffer
    }

    /// Stops the flush task, flushing what is left if configured to.
    pub async fn stop(self) -> FlushSummary {
        let summary = self.scheduler.stop().await;
        debug!(
            "LOGS | Log shipper stopped, {} messages evicted over its lifetime",
            self.buffer.evicted_items()
        );
        summary
    }
}
