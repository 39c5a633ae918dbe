// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs a [`FlushEngine`] on a single background task.
//!
//! The task ticks every `flushing_accuracy`, the first tick immediately after
//! start, and runs one flush cycle per tick. Ticks never overlap: a slow cycle
//! delays the next tick instead of queueing a burst.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::{ConfigError, SchedulerError};
use crate::flush::{FlushEngine, FlushSummary};

pub struct FlushScheduler<In, Out> {
    engine: Option<FlushEngine<In, Out>>,
    task: Option<JoinHandle<FlushEngine<In, Out>>>,
    cancel: CancellationToken,
    flushing_accuracy: Duration,
    flush_all_before_stopping: bool,
}

impl<In, Out> FlushScheduler<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFlushingAccuracy`] if `flushing_accuracy` is zero.
    pub fn new(
        engine: FlushEngine<In, Out>,
        flushing_accuracy: Duration,
        flush_all_before_stopping: bool,
    ) -> Result<Self, ConfigError> {
        if flushing_accuracy.is_zero() {
            return Err(ConfigError::InvalidFlushingAccuracy);
        }
        Ok(FlushScheduler {
            engine: Some(engine),
            task: None,
            cancel: CancellationToken::new(),
            flushing_accuracy,
            flush_all_before_stopping,
        })
    }

    /// Token cancelled by [`FlushScheduler::stop`]. Cancelling it directly
    /// stops the loop and interrupts pending retry sleeps.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the flush task onto the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if already started or if called outside a Tokio runtime.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let engine = self.engine.take().ok_or(SchedulerError::AlreadyStarted)?;
        debug!(
            "LOGS | Starting flush task, checking every {} ms",
            self.flushing_accuracy.as_millis()
        );
        self.task = Some(runtime.spawn(run(
            engine,
            self.flushing_accuracy,
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Stops the flush task and waits for it to exit.
    ///
    /// A retry sleep in progress is interrupted and its batch dropped. With
    /// `flush_all_before_stopping`, every remaining message is then sent one
    /// per request; otherwise remaining messages are discarded.
    pub async fn stop(mut self) -> FlushSummary {
        self.cancel.cancel();
        let engine = match self.task.take() {
            Some(task) => match task.await {
                Ok(engine) => Some(engine),
                Err(e) => {
                    error!("LOGS | Flush task failed: {e}");
                    None
                }
            },
            None => self.engine.take(),
        };
        let Some(mut engine) = engine else {
            return FlushSummary::default();
        };

        if self.flush_all_before_stopping {
            debug!(
                "LOGS | Flushing {} remaining messages before stopping",
                engine.buffer().len()
            );
            engine.drain_all().await
        } else {
            let remaining = engine.buffer().len();
            if remaining > 0 {
                warn!("LOGS | Discarding {remaining} buffered messages on stop");
            }
            FlushSummary::default()
        }
    }
}

impl<In, Out> Drop for FlushScheduler<In, Out> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<In, Out>(
    mut engine: FlushEngine<In, Out>,
    flushing_accuracy: Duration,
    cancel: CancellationToken,
) -> FlushEngine<In, Out>
where
    In: Send,
    Out: Send,
{
    let mut ticker = interval(flushing_accuracy);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                engine.run_cycle(&cancel).await;
            }
        }
    }
    debug!("LOGS | Flush task stopped");
    engine
}
