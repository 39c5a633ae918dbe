// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Header names and configuration defaults.

pub const SOURCE_NAME_HEADER: &str = "X-Sumo-Name";
pub const SOURCE_CATEGORY_HEADER: &str = "X-Sumo-Category";
pub const SOURCE_HOST_HEADER: &str = "X-Sumo-Host";
pub const CLIENT_HEADER: &str = "X-Sumo-Client";
pub const FIELDS_HEADER: &str = "X-Sumo-Fields";

pub(crate) const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Identifies this client to the ingestion endpoint unless overridden.
pub const DEFAULT_CLIENT_HEADER_VALUE: &str = "log-shipper-rust";

pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 10_000;
/// Negative means retry until delivered or interrupted.
pub const DEFAULT_MAX_NUMBER_OF_RETRIES: i64 = -1;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 60_000;
/// Any 5xx status is worth another attempt.
pub const DEFAULT_RETRYABLE_STATUS_PATTERN: &str = "^5.*";

/// Buffer budget in bytes of buffered log text (~1MB).
pub const DEFAULT_MAX_QUEUE_SIZE_BYTES: u64 = 1_000_000;
pub const DEFAULT_MESSAGES_PER_REQUEST: usize = 100;
pub const DEFAULT_MAX_FLUSH_INTERVAL_MS: i64 = 10_000;
pub const DEFAULT_FLUSHING_ACCURACY_MS: u64 = 250;
