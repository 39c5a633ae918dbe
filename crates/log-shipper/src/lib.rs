// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered, batched and retried delivery of log lines to an HTTP ingestion
//! endpoint.
//!
//! Producers append to a cost-bounded [`buffer::EvictingBuffer`] that evicts
//! the oldest entries instead of blocking. A single background task, the
//! [`scheduler::FlushScheduler`], decides when to flush by size or by age and
//! hands bounded batches to a [`delivery::DeliveryClient`], which retries
//! transient failures under a configurable budget. [`shipper::LogShipper`]
//! wires the three together from a [`config::ShipperConfig`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod flush;
pub mod scheduler;
pub mod shipper;

pub use config::ShipperConfig;
pub use delivery::{DeliveryOutcome, DropReason};
pub use events::{EventObserver, ShipperEvent};
pub use shipper::LogShipper;
