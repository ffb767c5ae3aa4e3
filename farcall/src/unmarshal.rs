// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Result postprocessing: turning decoded wire values into
//! [`RemoteValue`]s with callable members bound to the owning client.
//!
//! Output nodes are installed in the seen-map before their children are
//! converted, so shared nodes and cycles come out with the same shape
//! they arrived with.

use crate::chain::ClientChain;
use crate::client::Client;
use crate::remote_value::{RemoteFunction, RemoteValue};
use farcall_core::Value;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Convert a decoded result into a [`RemoteValue`], binding every
/// remote-function marker to `client`.
pub(crate) fn postprocess(client: &Client, value: &Value) -> RemoteValue {
    let mut seen = HashMap::new();
    convert(client, value, &mut seen)
}

fn convert(
    client: &Client,
    value: &Value,
    seen: &mut HashMap<usize, RemoteValue>,
) -> RemoteValue {
    match value {
        Value::Undefined => RemoteValue::Undefined,
        Value::Null => RemoteValue::Null,
        Value::Bool(b) => RemoteValue::Bool(*b),
        Value::Number(n) => RemoteValue::Number(*n),
        Value::BigInt(b) => RemoteValue::BigInt(b.clone()),
        Value::String(s) => RemoteValue::String(s.clone()),
        Value::Date(d) => RemoteValue::Date(*d),
        Value::RegExp(re) => RemoteValue::RegExp(re.clone()),
        Value::Bytes(b) => RemoteValue::Bytes(b.clone()),
        Value::TypedArray(ta) => RemoteValue::TypedArray(ta.clone()),
        // Native containers and HTTP shapes pass through as decoded.
        Value::Map(m) => RemoteValue::Map(m.clone()),
        Value::Set(s) => RemoteValue::Set(s.clone()),
        Value::Error(e) => RemoteValue::Error(e.clone()),
        Value::Url(u) => RemoteValue::Url(u.clone()),
        Value::Headers(h) => RemoteValue::Headers(h.clone()),
        Value::HttpRequest(r) => RemoteValue::HttpRequest(r.clone()),
        Value::HttpResponse(r) => RemoteValue::HttpResponse(r.clone()),
        Value::RemoteFunction(marker) => RemoteValue::Function(RemoteFunction {
            client: client.clone(),
            chain: Rc::new(ClientChain::from_wire(&marker.operation_chain)),
            name: marker.function_name.clone(),
        }),
        // A nested-operation marker in a result would be a server bug;
        // surface it as undefined rather than a panic.
        Value::NestedOperation(_) => RemoteValue::Undefined,
        Value::Array(a) => {
            let key = Rc::as_ptr(a) as usize;
            if let Some(out) = seen.get(&key) {
                return out.clone();
            }
            let node = Rc::new(RefCell::new(Vec::with_capacity(a.borrow().len())));
            seen.insert(key, RemoteValue::Array(node.clone()));
            for item in a.borrow().iter() {
                let converted = convert(client, item, seen);
                node.borrow_mut().push(converted);
            }
            RemoteValue::Array(node)
        }
        Value::Object(o) => {
            let key = Rc::as_ptr(o) as usize;
            if let Some(out) = seen.get(&key) {
                return out.clone();
            }
            let node = Rc::new(RefCell::new(IndexMap::with_capacity(o.borrow().len())));
            seen.insert(key, RemoteValue::Object(node.clone()));
            for (k, item) in o.borrow().iter() {
                let converted = convert(client, item, seen);
                node.borrow_mut().insert(k.clone(), converted);
            }
            RemoteValue::Object(node)
        }
    }
}

/// The `as_object` rendering: same walk, but callable leaves become the
/// literal string `"<name> [Function]"` and everything stays a plain
/// [`Value`].
pub(crate) fn render_object(value: &Value) -> Value {
    let mut seen = HashMap::new();
    render(value, &mut seen)
}

fn render(value: &Value, seen: &mut HashMap<usize, Value>) -> Value {
    match value {
        Value::RemoteFunction(marker) => {
            Value::String(format!("{} [Function]", marker.function_name))
        }
        Value::Array(a) => {
            let key = Rc::as_ptr(a) as usize;
            if let Some(out) = seen.get(&key) {
                return out.clone();
            }
            let node = Rc::new(RefCell::new(Vec::with_capacity(a.borrow().len())));
            seen.insert(key, Value::Array(node.clone()));
            for item in a.borrow().iter() {
                let rendered = render(item, seen);
                node.borrow_mut().push(rendered);
            }
            Value::Array(node)
        }
        Value::Object(o) => {
            let key = Rc::as_ptr(o) as usize;
            if let Some(out) = seen.get(&key) {
                return out.clone();
            }
            let node = Rc::new(RefCell::new(IndexMap::with_capacity(o.borrow().len())));
            seen.insert(key, Value::Object(node.clone()));
            for (k, item) in o.borrow().iter() {
                let rendered = render(item, seen);
                node.borrow_mut().insert(k.clone(), rendered);
            }
            Value::Object(node)
        }
        other => other.clone(),
    }
}
