// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The flush decision and the drain, aggregate, send loop.
//!
//! A [`FlushEngine`] is driven from outside, one cycle at a time. A cycle first
//! checks whether a flush is due:
//!
//! - **size**: at least `messages_per_request` messages are buffered, or
//! - **time**: `max_flush_interval_ms` has elapsed since the last flush
//!   (zero or negative means always due).
//!
//! When due, the cycle drains batches of at most `messages_per_request`
//! messages, oldest first, aggregating and sending each one before draining
//! the next, until the buffer is empty. Aggregation errors and panics end the
//! cycle and are reported as [`ShipperEvent::CycleFailed`]; they never reach
//! the caller.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::buffer::EvictingBuffer;
use crate::config::FlushSettings;
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::errors::{AggregateError, CycleError};
use crate::events::{EventObserver, ShipperEvent, TracingObserver};

/// Turns a drained batch into one request payload.
pub trait BatchAggregator<In, Out>: Send + Sync {
    /// # Errors
    ///
    /// An error ends the current flush cycle; the batch is not re-queued.
    fn aggregate(&self, batch: Vec<In>) -> Result<Out, AggregateError>;
}

impl<In, Out, F> BatchAggregator<In, Out> for F
where
    F: Fn(Vec<In>) -> Result<Out, AggregateError> + Send + Sync,
{
    fn aggregate(&self, batch: Vec<In>) -> Result<Out, AggregateError> {
        self(batch)
    }
}

/// Delivers one payload, returning only once it is delivered or dropped.
#[async_trait]
pub trait BatchSender<P>: Send + Sync {
    async fn send(&self, payload: P, cancel: &CancellationToken) -> DeliveryOutcome;
}

#[async_trait]
impl BatchSender<String> for DeliveryClient {
    async fn send(&self, payload: String, cancel: &CancellationToken) -> DeliveryOutcome {
        DeliveryClient::send(self, payload, cancel).await
    }
}

/// Thresholds and the time of the last flush. Owned by the flush task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushState {
    pub time_of_last_flush: Instant,
    /// Size threshold and maximum batch size.
    pub messages_per_request: usize,
    pub max_flush_interval_ms: i64,
}

/// What a flush cycle sent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub batches: usize,
    pub items: usize,
    pub delivered: usize,
    pub dropped: usize,
}

impl FlushSummary {
    fn record(&mut self, items: usize, outcome: &DeliveryOutcome) {
        self.batches += 1;
        self.items += items;
        if outcome.is_delivered() {
            self.delivered += 1;
        } else {
            self.dropped += 1;
        }
    }
}

pub struct FlushEngine<In, Out> {
    buffer: Arc<EvictingBuffer<In>>,
    aggregator: Arc<dyn BatchAggregator<In, Out>>,
    sender: Arc<dyn BatchSender<Out>>,
    observer: Arc<dyn EventObserver>,
    state: FlushState,
}

impl<In, Out> FlushEngine<In, Out>
where
    In: Send,
    Out: Send,
{
    /// `messages_per_request` is clamped to at least 1.
    pub fn new(
        buffer: Arc<EvictingBuffer<In>>,
        aggregator: Arc<dyn BatchAggregator<In, Out>>,
        sender: Arc<dyn BatchSender<Out>>,
        messages_per_request: usize,
        max_flush_interval_ms: i64,
    ) -> Self {
        FlushEngine {
            buffer,
            aggregator,
            sender,
            observer: Arc::new(TracingObserver),
            state: FlushState {
                time_of_last_flush: Instant::now(),
                messages_per_request: messages_per_request.max(1),
                max_flush_interval_ms,
            },
        }
    }

    pub fn from_settings(
        buffer: Arc<EvictingBuffer<In>>,
        aggregator: Arc<dyn BatchAggregator<In, Out>>,
        sender: Arc<dyn BatchSender<Out>>,
        settings: &FlushSettings,
    ) -> Self {
        Self::new(
            buffer,
            aggregator,
            sender,
            settings.messages_per_request,
            settings.max_flush_interval_ms,
        )
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn state(&self) -> &FlushState {
        &self.state
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<EvictingBuffer<In>> {
        &self.buffer
    }

    pub fn set_messages_per_request(&mut self, messages_per_request: usize) {
        self.state.messages_per_request = messages_per_request.max(1);
    }

    #[must_use]
    pub fn needs_flushing(&self) -> bool {
        self.needs_flushing_at(Instant::now())
    }

    fn needs_flushing_at(&self, now: Instant) -> bool {
        if self.buffer.len() >= self.state.messages_per_request {
            return true;
        }
        match u64::try_from(self.state.max_flush_interval_ms) {
            Ok(ms) if ms > 0 => self
                .state
                .time_of_last_flush
                .checked_add(Duration::from_millis(ms))
                .is_some_and(|next_flush| now >= next_flush),
            _ => true,
        }
    }

    /// One scheduled cycle: flush everything if due, otherwise do nothing.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> FlushSummary {
        if !self.needs_flushing() {
            return FlushSummary::default();
        }
        self.contained_flush(cancel).await
    }

    /// Sends every remaining message one per batch, regardless of thresholds.
    ///
    /// Not interruptible: retries run until delivered or the budget is spent.
    pub async fn drain_all(&mut self) -> FlushSummary {
        self.set_messages_per_request(1);
        self.contained_flush(&CancellationToken::new()).await
    }

    async fn contained_flush(&mut self, cancel: &CancellationToken) -> FlushSummary {
        let result = AssertUnwindSafe(self.flush_and_send(cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(CycleError::Panicked(panic_message(panic.as_ref()))));
        match result {
            Ok(summary) => summary,
            Err(error) => {
                self.observer.on_event(&ShipperEvent::CycleFailed {
                    error: error.to_string(),
                });
                FlushSummary::default()
            }
        }
    }

    /// Drains and sends bounded batches until the buffer is empty.
    ///
    /// Stops between batches once `cancel` fires, leaving the rest buffered.
    ///
    /// # Errors
    ///
    /// Returns the first aggregation error; the failing batch is lost.
    pub async fn flush_and_send(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<FlushSummary, CycleError> {
        let mut summary = FlushSummary::default();
        while !cancel.is_cancelled() {
            let limit = self.state.messages_per_request;
            let mut batch = Vec::with_capacity(limit.min(self.buffer.len()));
            self.buffer.drain_to(&mut batch, limit);
            if batch.is_empty() {
                break;
            }

            let items = batch.len();
            self.observer.on_event(&ShipperEvent::FlushStarted {
                items,
                remaining: self.buffer.len(),
            });
            let payload = self.aggregator.aggregate(batch)?;
            let outcome = self.sender.send(payload, cancel).await;
            self.state.time_of_last_flush = Instant::now();
            summary.record(items, &outcome);
        }
        Ok(summary)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
