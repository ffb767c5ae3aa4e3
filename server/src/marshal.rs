// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Result preprocessing: converting a host value graph into a wire value
//! graph, with callable members replaced by remote-function markers.
//!
//! Marker chains are absolute from the host root: the executed item's
//! chain, extended with the path walked inside the result and the member
//! key the function was found under. Output nodes are installed in the
//! seen-map before their children are processed, so shared nodes and
//! cycles survive with their structure intact.

use crate::host::HostValue;
use farcall_core::{Op, OpChain, RemoteFunctionMarker, Value};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// Marshal an executed chain's result. `base` is the chain that produced
/// it, so embedded callables can be reached again from the root.
pub fn marshal_result(value: &HostValue, base: &OpChain) -> Value {
    let mut seen = HashMap::new();
    walk(value, base, &mut seen)
}

fn walk(value: &HostValue, path: &OpChain, seen: &mut HashMap<usize, Value>) -> Value {
    match value {
        // Plain data passes through untouched: the codec preserves the
        // native container and HTTP shapes by itself.
        HostValue::Data(v) => v.clone(),
        HostValue::Function(f) => Value::RemoteFunction(RemoteFunctionMarker {
            operation_chain: path.clone(),
            function_name: f.name.clone(),
        }),
        // A getter reached as a chain result was already evaluated by
        // traversal; a stray one has nothing useful to show.
        HostValue::Getter(_) => Value::Undefined,
        HostValue::Array(items) => {
            let key = Rc::as_ptr(items) as usize;
            if let Some(out) = seen.get(&key) {
                return out.clone();
            }
            let node = Rc::new(RefCell::new(Vec::with_capacity(items.borrow().len())));
            seen.insert(key, Value::Array(node.clone()));
            for (i, item) in items.borrow().iter().enumerate() {
                let child_path = path.extended(Op::get(i));
                let converted = walk(item, &child_path, seen);
                node.borrow_mut().push(converted);
            }
            Value::Array(node)
        }
        HostValue::Object(members) => {
            let key = Rc::as_ptr(members) as usize;
            if let Some(out) = seen.get(&key) {
                return out.clone();
            }
            let node: Rc<RefCell<IndexMap<String, Value>>> =
                Rc::new(RefCell::new(IndexMap::with_capacity(members.borrow().len())));
            seen.insert(key, Value::Object(node.clone()));
            for (name, member) in members.borrow().iter() {
                let child_path = path.extended(Op::get(name.as_str()));
                let converted = match member {
                    HostValue::Function(_) => Value::RemoteFunction(RemoteFunctionMarker {
                        operation_chain: child_path,
                        function_name: name.clone(),
                    }),
                    HostValue::Getter(g) => {
                        // Computed members are materialised; ones that
                        // fail are skipped silently.
                        match (g.f)(&HostValue::Object(members.clone())) {
                            Ok(computed) => walk(&computed, &child_path, seen),
                            Err(e) => {
                                trace!(member = %name, error = %e, "skipping failing getter");
                                continue;
                            }
                        }
                    }
                    other => walk(other, &child_path, seen),
                };
                node.borrow_mut().insert(name.clone(), converted);
            }
            Value::Object(node)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostObject, HostValue};
    use assert_matches::assert_matches;
    use farcall_core::ErrorValue;

    fn base() -> OpChain {
        OpChain::from_ops(vec![Op::get("getObject"), Op::apply(vec![])])
    }

    #[test]
    fn methods_become_absolute_markers() {
        let host = HostObject::new()
            .value("value", 42)
            .child(
                "nested",
                HostObject::new().method("getValue", |_, _| async { Ok(HostValue::data(42)) }),
            )
            .build();
        let out = marshal_result(&host, &base());
        let marker = out.get("nested").unwrap().get("getValue").unwrap();
        assert_matches!(marker, Value::RemoteFunction(m) => {
            assert_eq!(m.function_name, "getValue");
            // getObject . apply . nested . getValue
            assert_eq!(m.operation_chain.len(), 4);
        });
        assert_eq!(out.get("value").unwrap().as_f64(), Some(42.0));
    }

    #[test]
    fn shared_host_nodes_marshal_to_shared_wire_nodes() {
        let shared = HostObject::new().value("value", 1).build();
        let host = HostValue::array([shared.clone(), shared]);
        let out = marshal_result(&host, &OpChain::new());
        let a = out.index(0).unwrap();
        let b = out.index(1).unwrap();
        assert!(Value::same_node(&a, &b));
    }

    #[test]
    fn failing_getters_are_skipped() {
        let host = HostObject::new()
            .value("ok", 1)
            .getter("boom", |_| Err(ErrorValue::error("nope")))
            .getter("fine", |_| Ok(HostValue::data("yes")))
            .build();
        let out = marshal_result(&host, &OpChain::new());
        assert!(out.get("boom").is_none());
        assert_eq!(out.get("fine").unwrap().as_str(), Some("yes"));
        assert_eq!(out.get("ok").unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn top_level_function_keeps_its_chain() {
        let host = HostValue::function("makeCounter", |_, _| async {
            Ok(HostValue::data(0))
        });
        let chain = OpChain::from_ops(vec![Op::get("makeCounter")]);
        let out = marshal_result(&host, &chain);
        assert_matches!(out, Value::RemoteFunction(m) => {
            assert_eq!(m.operation_chain.len(), 1);
            assert_eq!(m.function_name, "makeCounter");
        });
    }
}
