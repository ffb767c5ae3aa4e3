// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Value fidelity: what goes through `echoOne` comes back equal, and
//! cyclic graphs keep their structure.

use crate::utils::client_and_loopback;
use farcall::{RemoteValue, call_args};
use farcall_core::value::{
    HeadersValue, HttpRequestValue, HttpResponseValue, RegExpValue, TypedArrayKind,
    TypedArrayValue,
};
use farcall_core::{ErrorValue, Value};
use num_bigint::BigInt;
use std::rc::Rc;

async fn echo(value: Value) -> Value {
    let (client, _loopback) = client_and_loopback();
    let out = client.call("echoOne", call_args![value]).await.unwrap();
    out.to_value().expect("echoed data has no functions")
}

#[tokio::test]
async fn special_numbers_survive() {
    for v in [
        Value::Number(f64::NAN),
        Value::Number(f64::INFINITY),
        Value::Number(f64::NEG_INFINITY),
        Value::Number(-0.0),
        Value::Number(1.25),
    ] {
        assert_eq!(echo(v.clone()).await, v);
    }
}

#[tokio::test]
async fn bigints_keep_magnitude_and_sign() {
    let big: BigInt = "-123456789012345678901234567890123456789".parse().unwrap();
    let out = echo(Value::BigInt(big.clone())).await;
    assert_eq!(out, Value::BigInt(big));
}

#[tokio::test]
async fn dates_and_regexps_survive() {
    assert_eq!(
        echo(Value::Date(1_700_000_000_000.0)).await,
        Value::Date(1_700_000_000_000.0)
    );
    let re = Value::RegExp(RegExpValue {
        source: "^a(b|c)+$".into(),
        flags: "gi".into(),
    });
    assert_eq!(echo(re.clone()).await, re);
}

#[tokio::test]
async fn containers_survive_in_order() {
    let map = Value::map([
        (Value::from("z"), Value::from(1)),
        (Value::from(2), Value::from("two")),
    ]);
    assert_eq!(echo(map.clone()).await, map);

    let set = Value::set([Value::from("a"), Value::from("b")]);
    assert_eq!(echo(set.clone()).await, set);
}

#[tokio::test]
async fn byte_buffers_survive() {
    let bytes = Value::Bytes(vec![0, 1, 2, 254, 255]);
    assert_eq!(echo(bytes.clone()).await, bytes);

    let typed = Value::TypedArray(TypedArrayValue {
        kind: TypedArrayKind::F64,
        bytes: 42.5_f64.to_le_bytes().to_vec(),
    });
    assert_eq!(echo(typed.clone()).await, typed);
}

#[tokio::test]
async fn http_shapes_survive() {
    let url = Value::Url(url::Url::parse("https://example.com/a?b=c").unwrap());
    assert_eq!(echo(url.clone()).await, url);

    let headers = HeadersValue(vec![
        ("content-type".into(), "application/json".into()),
        ("x-token".into(), "abc".into()),
    ]);
    let request = Value::HttpRequest(Rc::new(HttpRequestValue {
        method: "POST".into(),
        url: "https://example.com/call".into(),
        headers: headers.clone(),
        body: Some(Value::from("ping")),
    }));
    assert_eq!(echo(request.clone()).await, request);

    let response = Value::HttpResponse(Rc::new(HttpResponseValue {
        status: 200,
        status_text: "OK".into(),
        headers,
        body: None,
    }));
    assert_eq!(echo(response.clone()).await, response);
}

#[tokio::test]
async fn error_values_survive_with_own_properties() {
    let err = Value::error(
        ErrorValue::new("QuotaError", "over the line").with_property("limit", 10),
    );
    assert_eq!(echo(err.clone()).await, err);
}

#[tokio::test]
async fn cyclic_results_keep_their_cycle() {
    let (client, _loopback) = client_and_loopback();
    let g = client.call("getCycle", call_args![]).await.unwrap();
    let a = g.get("a").unwrap();
    let b = a.get("b").unwrap();
    assert!(RemoteValue::same_node(&g, &b));
}

#[tokio::test]
async fn cyclic_arguments_round_trip() {
    let root = Value::empty_object();
    if let Value::Object(o) = &root {
        o.borrow_mut().insert("me".into(), root.clone());
    }
    let out = echo(root.clone()).await;
    let me = out.get("me").unwrap();
    assert!(Value::same_node(&out, &me));
}

#[tokio::test]
async fn undefined_and_null_are_distinct() {
    assert_eq!(echo(Value::Undefined).await, Value::Undefined);
    assert_eq!(echo(Value::Null).await, Value::Null);
}
