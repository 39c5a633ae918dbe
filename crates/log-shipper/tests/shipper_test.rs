// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::mock_server::ScriptedServer;
use common::{wait_until, RecordingObserver};
use log_shipper::{DropReason, LogShipper, ShipperConfig, ShipperEvent};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

fn config(url: String) -> ShipperConfig {
    ShipperConfig {
        url: Some(url),
        retry_interval_ms: 10,
        messages_per_request: 100,
        max_flush_interval_ms: i64::MAX,
        flushing_accuracy_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_ships_full_batches_in_order() {
    let server = ScriptedServer::start(vec![200]).await;
    let mut config = config(server.url("/receiver"));
    config.messages_per_request = 2;
    let shipper = LogShipper::start(&config).expect("failed to start shipper");

    for line in ["l1\n", "l2\n", "l3\n", "l4\n"] {
        shipper.log(line);
    }
    wait_until(Duration::from_secs(5), || server.requests().len() == 2).await;

    let bodies: Vec<String> = server.requests().into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec!["l1\nl2\n", "l3\nl4\n"]);
    assert!(shipper.buffer().is_empty());
    shipper.stop().await;
}

#[tokio::test]
async fn test_flushes_partial_batch_once_interval_elapses() {
    let server = ScriptedServer::start(vec![200]).await;
    let mut config = config(server.url("/receiver"));
    config.max_flush_interval_ms = 100;
    let shipper = LogShipper::start(&config).expect("failed to start shipper");

    shipper.log("only\n");
    wait_until(Duration::from_secs(5), || server.requests().len() == 1).await;

    assert_eq!(server.requests()[0].body, "only\n");
    shipper.stop().await;
}

#[tokio::test]
async fn test_stop_flushes_everything_one_per_request() {
    let server = ScriptedServer::start(vec![200]).await;
    let mut config = config(server.url("/receiver"));
    config.flush_all_before_stopping = true;
    let shipper = LogShipper::start(&config).expect("failed to start shipper");

    for line in ["a\n", "b\n", "c\n"] {
        shipper.log(line);
    }
    let summary = shipper.stop().await;

    let bodies: Vec<String> = server.requests().into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec!["a\n", "b\n", "c\n"]);
    assert_eq!(summary.delivered, 3);
}

#[tokio::test]
async fn test_stop_without_flush_sends_nothing() {
    let server = ScriptedServer::start(vec![200]).await;
    let shipper = LogShipper::start(&config(server.url("/receiver"))).expect("failed to start");

    shipper.log("a\n");
    let summary = shipper.stop().await;

    assert_eq!(summary.batches, 0);
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_stop_interrupts_retry_sleep() {
    let server = ScriptedServer::start(vec![503]).await;
    let mut config = config(server.url("/receiver"));
    config.retry_interval_ms = 60_000;
    config.max_flush_interval_ms = -1;
    let observer = Arc::new(RecordingObserver::default());
    let shipper =
        LogShipper::start_with_observer(&config, observer.clone()).expect("failed to start");

    shipper.log("line\n");
    wait_until(Duration::from_secs(5), || server.requests().len() == 1).await;

    timeout(Duration::from_secs(5), shipper.stop())
        .await
        .expect("stop waited for the retry sleep");
    assert!(observer.events().contains(&ShipperEvent::Dropped {
        reason: DropReason::Interrupted,
        attempts: 1
    }));
}

#[tokio::test]
async fn test_full_buffer_evicts_oldest_lines() {
    let server = ScriptedServer::start(vec![200]).await;
    let mut config = config(server.url("/receiver"));
    config.max_queue_size_bytes = 10;
    let observer = Arc::new(RecordingObserver::default());
    let shipper =
        LogShipper::start_with_observer(&config, observer.clone()).expect("failed to start");

    shipper.log("aaaa\n");
    shipper.log("bbbb\n");
    shipper.log("cccc\n");

    assert_eq!(shipper.buffer().len(), 2);
    assert_eq!(shipper.buffer().total_cost(), 10);
    assert_eq!(shipper.buffer().evicted_items(), 1);
    assert!(observer
        .events()
        .contains(&ShipperEvent::Evicted { items: 1, cost: 5 }));
    shipper.stop().await;
}

#[tokio::test]
async fn test_starts_from_json_document() {
    let server = ScriptedServer::start(vec![200]).await;
    let document = format!(
        r#"{{
            "url": "{}",
            "source_name": "json-app",
            "messages_per_request": 1,
            "flushing_accuracy_ms": 10
        }}"#,
        server.url("/receiver")
    );
    let config = ShipperConfig::from_json(&document).expect("valid document");
    let shipper = LogShipper::start(&config).expect("failed to start shipper");

    shipper.log("hello\n");
    wait_until(Duration::from_secs(5), || server.requests().len() == 1).await;

    let request = &server.requests()[0];
    assert_eq!(request.header("X-Sumo-Name"), Some("json-app"));
    assert_eq!(request.body, "hello\n");
    shipper.stop().await;
}
