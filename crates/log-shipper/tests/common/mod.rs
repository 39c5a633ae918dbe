// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities for integration tests

#![allow(dead_code)]

pub mod mock_server;

use log_shipper::{EventObserver, ShipperEvent};
use std::sync::Mutex;
use std::time::Duration;

/// Keeps every reported event for later inspection
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ShipperEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ShipperEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventObserver for RecordingObserver {
    fn on_event(&self, event: &ShipperEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Polls `condition` every 10ms, panicking once `limit` has passed
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met within {limit:?}");
}
