// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! End-to-end behaviour: batching, pipelining, aliasing, prefix
//! subsumption, remote function handles, error fidelity and the
//! validation boundaries.

use crate::utils::{client_and_loopback, client_with_config, unreachable_transport};
use assert_matches::assert_matches;
use farcall::{Client, Error, RemoteValue, call_args, diagnostics};
use farcall_core::{Limits, Value};
use farcall_server::ServiceConfig;
use std::future::IntoFuture;

#[tokio::test]
async fn counter_increments_across_separate_batches() {
    let (client, loopback) = client_and_loopback();
    let one = client.call("increment", call_args![]).await.unwrap();
    let two = client.call("increment", call_args![]).await.unwrap();
    assert_eq!(one.as_f64(), Some(1.0));
    assert_eq!(two.as_f64(), Some(2.0));
    assert_eq!(loopback.calls(), 2);
}

#[tokio::test]
async fn concurrent_increments_share_one_round_trip() {
    let (client, loopback) = client_and_loopback();
    let a = client.call("increment", call_args![]);
    let b = client.call("increment", call_args![]);
    let c = client.call("increment", call_args![]);
    let (a, b, c) = futures::join!(a.into_future(), b.into_future(), c.into_future());
    assert_eq!(loopback.calls(), 1);
    assert_eq!(a.unwrap().as_f64(), Some(1.0));
    assert_eq!(b.unwrap().as_f64(), Some(2.0));
    assert_eq!(c.unwrap().as_f64(), Some(3.0));
}

#[tokio::test]
async fn pipelined_arguments_execute_before_their_consumer() {
    let (client, loopback) = client_and_loopback();
    let sum = client
        .call(
            "add",
            call_args![
                client.call("increment", call_args![]),
                client.call("increment", call_args![])
            ],
        )
        .await
        .unwrap();
    // One round-trip; the increments ran host-side before add, so the
    // sum is 1 + 2.
    assert_eq!(loopback.calls(), 1);
    assert_eq!(sum.as_f64(), Some(3.0));
}

#[tokio::test]
async fn aliased_arguments_share_identity_on_both_sides() {
    let (client, loopback) = client_and_loopback();
    diagnostics::capture(true);
    let h = client.call("getObject", call_args![]);
    let pair = client.call("echo", call_args![&h, &h]).await.unwrap();
    let wire: serde_json::Value =
        serde_json::from_str(&diagnostics::last_batch().unwrap()).unwrap();
    diagnostics::capture(false);

    assert_eq!(loopback.calls(), 1);

    // Wire shape: one definer marker, one ref-id-only alias.
    let args = wire["batch"][0]["operations"][1]["args"].as_array().unwrap();
    assert_eq!(args.len(), 2);
    assert_eq!(args[0]["isNestedOperation"], true);
    assert!(args[0]["operationChain"].is_array());
    assert!(args[1].get("operationChain").is_none());
    assert_eq!(args[0]["refId"], args[1]["refId"]);

    // Client-side identity: both positions are the same node.
    let x = pair.index(0).unwrap();
    let y = pair.index(1).unwrap();
    assert!(RemoteValue::same_node(&x, &y));
    assert_eq!(x.get("value").unwrap().as_f64(), Some(42.0));
}

#[tokio::test]
async fn remote_function_handles_reinvoke_with_their_receiver() {
    let (client, loopback) = client_and_loopback();
    let object = client.call("getObject", call_args![]).await.unwrap();

    diagnostics::capture(true);
    let nested = object.get("nested").unwrap();
    let get_value = nested.get("getValue").unwrap();
    let value = get_value
        .as_function()
        .unwrap()
        .call(call_args![])
        .await
        .unwrap();
    let wire: serde_json::Value =
        serde_json::from_str(&diagnostics::last_batch().unwrap()).unwrap();
    diagnostics::capture(false);

    assert_eq!(value.as_f64(), Some(42.0));
    assert_eq!(loopback.calls(), 2);

    // The second batch replays the absolute chain:
    // getObject . apply . nested . getValue . apply
    let ops = wire["batch"][0]["operations"].as_array().unwrap();
    let shape: Vec<String> = ops
        .iter()
        .map(|op| {
            let ty = op["type"].as_str().unwrap();
            match ty {
                "get" => format!("get:{}", op["key"].as_str().unwrap()),
                other => other.to_owned(),
            }
        })
        .collect();
    assert_eq!(
        shape,
        ["get:getObject", "apply", "get:nested", "get:getValue", "apply"]
    );
}

#[tokio::test]
async fn thrown_errors_keep_name_message_and_properties() {
    let (client, _loopback) = client_and_loopback();
    let err = client.call("throwIt", call_args![]).await.unwrap_err();
    let remote = err.as_remote().unwrap();
    assert_eq!(remote.name, "ValidationError");
    assert_eq!(remote.message, "bad");
    assert_eq!(remote.properties.get("field").unwrap().as_str(), Some("email"));
}

#[tokio::test]
async fn failing_items_do_not_abort_their_siblings() {
    let (client, loopback) = client_and_loopback();
    let good = client.call("increment", call_args![]);
    let bad = client.call("throwIt", call_args![]);
    let (good, bad) = futures::join!(good.into_future(), bad.into_future());
    assert_eq!(loopback.calls(), 1);
    assert_eq!(good.unwrap().as_f64(), Some(1.0));
    assert_matches!(bad, Err(Error::Remote(_)));
}

#[tokio::test]
async fn ancestor_chains_are_subsumed_without_extra_round_trips() {
    let (client, loopback) = client_and_loopback();
    let object = client.call("getObject", call_args![]);
    let value = object
        .get("nested")
        .call_method("getValue", call_args![])
        .await
        .unwrap();
    assert_eq!(loopback.calls(), 1);
    assert_eq!(value.as_f64(), Some(42.0));
}

#[tokio::test]
async fn as_object_renders_functions_as_strings() {
    let (client, _loopback) = client_and_loopback();
    let shape = client.call("getObject", call_args![]).as_object().await.unwrap();
    assert_eq!(shape.get("value").unwrap().as_f64(), Some(42.0));
    let nested = shape.get("nested").unwrap();
    assert_eq!(
        nested.get("getValue").unwrap().as_str(),
        Some("getValue [Function]")
    );
}

#[tokio::test]
async fn then_never_appears_on_the_wire() {
    let (client, _loopback) = client_and_loopback();
    diagnostics::capture(true);
    let h = client.call("increment", call_args![]);
    h.clone().await.unwrap();
    h.await.unwrap();
    let wire = diagnostics::last_batch().unwrap();
    diagnostics::capture(false);
    assert!(!wire.contains("then"));
}

#[tokio::test]
async fn chains_at_the_depth_cap_pass_and_one_more_fails() {
    let config = ServiceConfig {
        limits: Limits {
            max_depth: 3,
            max_args: 100,
        },
        ..ServiceConfig::default()
    };
    let (client, _loopback) = client_with_config(config);

    // getObject . apply . value — exactly three operations.
    let ok = client
        .call("getObject", call_args![])
        .get("value")
        .await
        .unwrap();
    assert_eq!(ok.as_f64(), Some(42.0));

    // One more operation crosses the cap.
    let err = client
        .call("getObject", call_args![])
        .get("nested")
        .get("value")
        .await
        .unwrap_err();
    let remote = err.as_remote().unwrap();
    assert_eq!(remote.name, "RangeError");
}

#[tokio::test]
async fn arity_at_the_cap_passes_and_one_more_fails() {
    let config = ServiceConfig {
        limits: Limits {
            max_depth: 50,
            max_args: 2,
        },
        ..ServiceConfig::default()
    };
    let (client, _loopback) = client_with_config(config);

    let ok = client.call("echo", call_args![1, 2]).await.unwrap();
    assert_eq!(ok.index(0).unwrap().as_f64(), Some(1.0));

    let err = client.call("echo", call_args![1, 2, 3]).await.unwrap_err();
    assert_eq!(err.as_remote().unwrap().name, "RangeError");
}

#[tokio::test]
async fn undefined_dereference_is_a_type_error_naming_the_key() {
    let (client, _loopback) = client_and_loopback();
    let err = client
        .get("missing")
        .get("deeper")
        .await
        .unwrap_err();
    let remote = err.as_remote().unwrap();
    assert_eq!(remote.name, "TypeError");
    assert!(remote.message.contains("deeper"));
}

#[tokio::test]
async fn unreachable_hosts_reject_all_awaiting_items() {
    let client = Client::new(unreachable_transport());
    let a = client.call("increment", call_args![]);
    let b = client.call("increment", call_args![]);
    let (a, b) = futures::join!(a.into_future(), b.into_future());
    assert_matches!(a, Err(Error::Disconnected(_)));
    assert_matches!(b, Err(Error::Disconnected(_)));
}

#[tokio::test]
async fn two_awaits_of_one_expression_invoke_twice() {
    let (client, loopback) = client_and_loopback();
    let h = client.call("increment", call_args![]);
    let first = h.clone().await.unwrap();
    let second = h.await.unwrap();
    assert_eq!(loopback.calls(), 2);
    assert_eq!(first.as_f64(), Some(1.0));
    assert_eq!(second.as_f64(), Some(2.0));
}

#[tokio::test]
async fn integer_keys_index_into_arrays() {
    let (client, _loopback) = client_and_loopback();
    // echo returns its arguments as an array; index into it remotely.
    let first = client
        .call("echo", call_args!["x", "y"])
        .get(0u64)
        .await
        .unwrap();
    assert_eq!(first.as_str(), Some("x"));

    let len = client
        .call("echo", call_args!["x", "y"])
        .get("length")
        .await
        .unwrap();
    assert_eq!(len.as_f64(), Some(2.0));
}

#[tokio::test]
async fn aliases_work_across_batch_items() {
    let (client, loopback) = client_and_loopback();
    diagnostics::capture(true);
    let h = client.call("getObject", call_args![]);
    let first = client.call("echoOne", call_args![&h]);
    let second = client.call("echoOne", call_args![&h]);
    let (first, second) = futures::join!(first.into_future(), second.into_future());
    assert_eq!(loopback.calls(), 1);

    let wire: serde_json::Value =
        serde_json::from_str(&diagnostics::last_batch().unwrap()).unwrap();
    diagnostics::capture(false);

    // Two top-level items; the definer marker lives in the first, the
    // second aliases it by ref id.
    let items = wire["batch"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    let def = &items[0]["operations"][1]["args"][0];
    let alias = &items[1]["operations"][1]["args"][0];
    assert!(def["operationChain"].is_array());
    assert!(alias.get("operationChain").is_none());
    assert_eq!(def["refId"], alias["refId"]);

    // Both consumers observe the same computed object.
    assert_eq!(
        first.unwrap().get("value").unwrap().as_f64(),
        second.unwrap().get("value").unwrap().as_f64()
    );
}

#[tokio::test]
async fn values_can_flow_back_as_arguments() {
    let (client, _loopback) = client_and_loopback();
    let object = client.call("getObject", call_args![]).await.unwrap();
    let value = object.get("value").unwrap();
    let echoed = client
        .call("echoOne", call_args![Value::Number(value.as_f64().unwrap())])
        .await
        .unwrap();
    assert_eq!(echoed.as_f64(), Some(42.0));
}
