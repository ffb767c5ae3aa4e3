// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The downstream channel: tagged fire-and-forget delivery from server
//! to client, with no reply correlation.

use crate::utils::client_with_service;
use farcall_core::Value;

#[tokio::test]
async fn published_payloads_reach_the_client_stream() {
    let (client, loopback, service) = client_with_service();
    let mut messages = client.downstream();

    let mut socket = service.downstream().register("c1");
    assert!(service.downstream().publish("c1", &Value::from("ping")).unwrap());

    // Pump the frame from the registry to the transport, as a socket
    // writer would.
    let frame = socket.try_next().unwrap().expect("frame queued");
    loopback.deliver(&frame);

    let payload = messages.next().await.unwrap().unwrap();
    assert_eq!(payload.as_str(), Some("ping"));
}

#[tokio::test]
async fn structured_payloads_decode() {
    let (client, loopback, service) = client_with_service();
    let mut messages = client.downstream();
    let mut socket = service.downstream().register("c2");

    let payload = Value::object([
        ("kind".to_owned(), Value::from("tick")),
        ("count".to_owned(), Value::from(3)),
    ]);
    service.downstream().publish("c2", &payload).unwrap();
    loopback.deliver(&socket.try_next().unwrap().unwrap());

    let out = messages.next().await.unwrap().unwrap();
    assert_eq!(out.get("kind").unwrap().as_str(), Some("tick"));
    assert_eq!(out.get("count").unwrap().as_f64(), Some(3.0));
}

#[tokio::test]
async fn unconnected_clients_drop_payloads() {
    let (_client, _loopback, service) = client_with_service();
    assert!(!service.downstream().publish("nobody", &Value::from("lost")).unwrap());
}
