// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Batch dispatch: validate each item, resolve pipelined arguments,
//! walk the chain against the host and marshal the outcome.
//!
//! Items execute strictly sequentially, so the host observes enqueue
//! order and every alias sees its definer's cached result. A failing
//! item never aborts its siblings; the response envelope always carries
//! one reply per item.

use crate::host::{HostFunction, HostValue};
use crate::marshal::marshal_result;
use farcall_core::{
    BatchReply, BatchRequest, BatchResponse, ErrorValue, Key, Limits, NestedOperationMarker, Op,
    OpChain, Value,
};
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

/// Results of already-executed nested chains, keyed by ref id and scoped
/// to one batch.
type RefIdCache = RefCell<HashMap<String, HostValue>>;

/// Executes batches against a host root.
pub struct Dispatcher {
    root: HostValue,
    limits: Limits,
    serialize_batches: bool,
    gate: futures::lock::Mutex<()>,
}

impl Dispatcher {
    /// A dispatcher over the given host root with default limits.
    pub fn new(root: HostValue) -> Dispatcher {
        Dispatcher {
            root,
            limits: Limits::default(),
            serialize_batches: false,
            gate: futures::lock::Mutex::new(()),
        }
    }

    /// Override the validation caps.
    pub fn with_limits(mut self, limits: Limits) -> Dispatcher {
        self.limits = limits;
        self
    }

    /// Require batches to run one at a time, so no other batch's effects
    /// interleave with this one's.
    pub fn serialize_batches(mut self, enabled: bool) -> Dispatcher {
        self.serialize_batches = enabled;
        self
    }

    /// Execute a whole batch, producing one reply per item.
    pub async fn dispatch(&self, request: BatchRequest) -> BatchResponse {
        let _guard = if self.serialize_batches {
            Some(self.gate.lock().await)
        } else {
            None
        };
        debug!(items = request.batch.len(), "dispatching batch");
        let cache: RefIdCache = RefCell::new(HashMap::new());
        let mut replies = Vec::with_capacity(request.batch.len());
        for item in request.batch {
            let reply = match self.run_item(&item.operations, &cache).await {
                Ok(result) => BatchReply::Success {
                    id: item.id,
                    result,
                },
                Err(error) => {
                    trace!(item = %item.id, error = %error, "item failed");
                    BatchReply::Failure {
                        id: item.id,
                        error: Value::error(error),
                    }
                }
            };
            replies.push(reply);
        }
        BatchResponse { batch: replies }
    }

    async fn run_item(
        &self,
        operations: &OpChain,
        cache: &RefIdCache,
    ) -> Result<Value, ErrorValue> {
        let result = self.execute_chain(operations, cache).await?;
        Ok(marshal_result(&result, operations))
    }

    /// Walk one chain from the host root. Boxed because nested-marker
    /// resolution recurses through here.
    fn execute_chain<'a>(
        &'a self,
        chain: &'a OpChain,
        cache: &'a RefIdCache,
    ) -> LocalBoxFuture<'a, Result<HostValue, ErrorValue>> {
        Box::pin(async move {
            self.limits.validate_chain(chain)?;
            let mut current = self.root.clone();
            let mut holder = self.root.clone();
            let mut last_key: Option<Key> = None;
            for op in &chain.ops {
                match op {
                    Op::Get { key } => {
                        let next = traverse_member(&current, key)?;
                        holder = std::mem::replace(&mut current, next);
                        last_key = Some(key.clone());
                    }
                    Op::Apply { args } => {
                        let function = match &current {
                            HostValue::Function(f) => f.clone(),
                            _ => {
                                return Err(not_callable(&last_key));
                            }
                        };
                        let resolved = self.resolve_args(args, cache).await?;
                        current = invoke(&function, holder.clone(), resolved).await?;
                        // A further apply without a get in between has no
                        // holder; it receives the root, like a bare call.
                        holder = self.root.clone();
                        last_key = None;
                    }
                }
            }
            Ok(current)
        })
    }

    /// Substitute nested-operation markers in an argument list with the
    /// values their chains produce, executing each definer once.
    async fn resolve_args(
        &self,
        args: &[Value],
        cache: &RefIdCache,
    ) -> Result<Vec<HostValue>, ErrorValue> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(match arg {
                Value::NestedOperation(marker) => self.resolve_marker(marker, cache).await?,
                other => HostValue::Data(self.resolve_embedded(other, cache).await?),
            });
        }
        Ok(out)
    }

    async fn resolve_marker(
        &self,
        marker: &NestedOperationMarker,
        cache: &RefIdCache,
    ) -> Result<HostValue, ErrorValue> {
        if let Some(cached) = cache.borrow().get(&marker.ref_id) {
            return Ok(cached.clone());
        }
        let Some(chain) = &marker.operation_chain else {
            return Err(ErrorValue::error(format!(
                "alias marker `{}` appeared before its definition",
                marker.ref_id
            )));
        };
        trace!(ref_id = %marker.ref_id, "resolving pipelined chain");
        let value = self.execute_chain(chain, cache).await?;
        cache
            .borrow_mut()
            .insert(marker.ref_id.clone(), value.clone());
        Ok(value)
    }

    /// Markers can also sit inside container arguments. Those positions
    /// hold plain data, so the substituted result must be data too.
    /// Containers without markers pass through untouched, keeping their
    /// identity.
    fn resolve_embedded<'a>(
        &'a self,
        value: &'a Value,
        cache: &'a RefIdCache,
    ) -> LocalBoxFuture<'a, Result<Value, ErrorValue>> {
        Box::pin(async move {
            if !contains_marker(value, &mut std::collections::HashSet::new()) {
                return Ok(value.clone());
            }
            match value {
                Value::NestedOperation(marker) => {
                    let resolved = self.resolve_marker(marker, cache).await?;
                    match resolved {
                        HostValue::Data(v) => Ok(v),
                        _ => Err(ErrorValue::type_error(format!(
                            "pipelined value `{}` cannot be embedded inside a container argument",
                            marker.ref_id
                        ))),
                    }
                }
                Value::Array(items) => {
                    let snapshot: Vec<Value> = items.borrow().clone();
                    let mut out = Vec::with_capacity(snapshot.len());
                    for item in &snapshot {
                        out.push(self.resolve_embedded(item, cache).await?);
                    }
                    Ok(Value::array(out))
                }
                Value::Object(entries) => {
                    let snapshot: Vec<(String, Value)> = entries
                        .borrow()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    let mut out = Vec::with_capacity(snapshot.len());
                    for (k, v) in &snapshot {
                        out.push((k.clone(), self.resolve_embedded(v, cache).await?));
                    }
                    Ok(Value::object(out))
                }
                other => Ok(other.clone()),
            }
        })
    }
}

/// Whether a marker is reachable from `value`. The seen set keeps cyclic
/// containers from recursing forever; a cycle cannot contain a marker,
/// since markers only enter argument graphs through materialisation.
fn contains_marker(value: &Value, seen: &mut std::collections::HashSet<usize>) -> bool {
    match value {
        Value::NestedOperation(_) => true,
        Value::Array(items) => {
            if !seen.insert(Rc::as_ptr(items) as usize) {
                return false;
            }
            items.borrow().iter().any(|v| contains_marker(v, seen))
        }
        Value::Object(entries) => {
            if !seen.insert(Rc::as_ptr(entries) as usize) {
                return false;
            }
            entries.borrow().values().any(|v| contains_marker(v, seen))
        }
        _ => false,
    }
}

async fn invoke(
    function: &HostFunction,
    receiver: HostValue,
    args: Vec<HostValue>,
) -> Result<HostValue, ErrorValue> {
    trace!(function = %function.name, args = args.len(), "invoking host method");
    (function.f)(receiver, args).await
}

fn not_callable(last_key: &Option<Key>) -> ErrorValue {
    match last_key {
        Some(key) => ErrorValue::type_error(format!("{key} is not a function")),
        None => ErrorValue::type_error("value is not a function"),
    }
}

fn undefined_member(key: &Key, kind: &str) -> ErrorValue {
    ErrorValue::type_error(format!(
        "Cannot read properties of {kind} (reading '{key}')"
    ))
}

/// One `Get` step: member selection on host objects, host arrays and
/// plain data. Missing members yield undefined; selecting on undefined
/// or null is the traversal error that names the offending key.
fn traverse_member(current: &HostValue, key: &Key) -> Result<HostValue, ErrorValue> {
    match current {
        HostValue::Object(members) => {
            let member = match key {
                Key::String(name) => members.borrow().get(name).cloned(),
                Key::Index(_) => None,
            };
            match member {
                Some(HostValue::Getter(getter)) => (getter.f)(current),
                Some(found) => Ok(found),
                None => Ok(HostValue::undefined()),
            }
        }
        HostValue::Array(items) => Ok(match key {
            Key::Index(i) => items
                .borrow()
                .get(*i as usize)
                .cloned()
                .unwrap_or(HostValue::undefined()),
            Key::String(name) if name == "length" => {
                HostValue::data(items.borrow().len())
            }
            Key::String(_) => HostValue::undefined(),
        }),
        HostValue::Function(_) | HostValue::Getter(_) => Ok(HostValue::undefined()),
        HostValue::Data(data) => traverse_data(data, key),
    }
}

fn traverse_data(data: &Value, key: &Key) -> Result<HostValue, ErrorValue> {
    match data {
        Value::Undefined => Err(undefined_member(key, "undefined")),
        Value::Null => Err(undefined_member(key, "null")),
        Value::Object(entries) => Ok(match key {
            Key::String(name) => entries
                .borrow()
                .get(name)
                .cloned()
                .map(HostValue::Data)
                .unwrap_or(HostValue::undefined()),
            Key::Index(_) => HostValue::undefined(),
        }),
        Value::Array(items) => Ok(match key {
            Key::Index(i) => items
                .borrow()
                .get(*i as usize)
                .cloned()
                .map(HostValue::Data)
                .unwrap_or(HostValue::undefined()),
            Key::String(name) if name == "length" => HostValue::data(items.borrow().len()),
            Key::String(_) => HostValue::undefined(),
        }),
        Value::String(s) => Ok(match key {
            Key::String(name) if name == "length" => HostValue::data(s.chars().count()),
            _ => HostValue::undefined(),
        }),
        _ => Ok(HostValue::undefined()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostObject;
    use assert_matches::assert_matches;
    use farcall_core::BatchItem;
    use std::cell::Cell;

    fn counter_host() -> HostValue {
        let count = Rc::new(Cell::new(0));
        HostObject::new()
            .method("increment", move |_, _| {
                let count = count.clone();
                async move {
                    count.set(count.get() + 1);
                    Ok(HostValue::data(count.get()))
                }
            })
            .build()
    }

    fn item(id: &str, ops: Vec<Op>) -> BatchItem {
        BatchItem {
            id: id.to_owned(),
            operations: OpChain::from_ops(ops),
        }
    }

    fn call(name: &str) -> Vec<Op> {
        vec![Op::get(name), Op::apply(vec![])]
    }

    #[tokio::test]
    async fn items_run_sequentially_in_enqueue_order() {
        let dispatcher = Dispatcher::new(counter_host());
        let response = dispatcher
            .dispatch(BatchRequest {
                batch: vec![
                    item("1", call("increment")),
                    item("2", call("increment")),
                    item("3", call("increment")),
                ],
            })
            .await;
        let results: Vec<f64> = response
            .batch
            .iter()
            .map(|r| match r {
                BatchReply::Success { result, .. } => result.as_f64().unwrap(),
                BatchReply::Failure { .. } => panic!("unexpected failure"),
            })
            .collect();
        assert_eq!(results, [1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn nested_markers_resolve_before_their_consumer() {
        let host = HostObject::new()
            .method("one", |_, _| async { Ok(HostValue::data(1)) })
            .method("add", |_, args| async move {
                let sum: f64 = args
                    .iter()
                    .filter_map(|a| a.as_data().and_then(Value::as_f64))
                    .sum();
                Ok(HostValue::data(sum))
            })
            .build();
        let dispatcher = Dispatcher::new(host);
        let nested = Value::NestedOperation(NestedOperationMarker {
            ref_id: "r0".into(),
            operation_chain: Some(OpChain::from_ops(call("one"))),
        });
        let alias = Value::NestedOperation(NestedOperationMarker {
            ref_id: "r0".into(),
            operation_chain: None,
        });
        let response = dispatcher
            .dispatch(BatchRequest {
                batch: vec![item(
                    "1",
                    vec![Op::get("add"), Op::apply(vec![nested, alias])],
                )],
            })
            .await;
        assert_matches!(&response.batch[0], BatchReply::Success { result, .. } => {
            assert_eq!(result.as_f64(), Some(2.0));
        });
    }

    #[tokio::test]
    async fn aliases_before_their_definer_fail_the_item_only() {
        let dispatcher = Dispatcher::new(counter_host());
        let alias = Value::NestedOperation(NestedOperationMarker {
            ref_id: "r9".into(),
            operation_chain: None,
        });
        let response = dispatcher
            .dispatch(BatchRequest {
                batch: vec![
                    item("1", vec![Op::get("increment"), Op::apply(vec![alias])]),
                    item("2", call("increment")),
                ],
            })
            .await;
        assert_matches!(&response.batch[0], BatchReply::Failure { .. });
        assert_matches!(&response.batch[1], BatchReply::Success { result, .. } => {
            assert_eq!(result.as_f64(), Some(1.0));
        });
    }

    #[tokio::test]
    async fn receiver_is_the_holder_of_the_preceding_get() {
        let host = HostObject::new()
            .entry(
                "nested",
                HostObject::new()
                    .value("value", 42)
                    .method("getValue", |recv, _| async move {
                        Ok(recv.member("value").unwrap_or(HostValue::undefined()))
                    })
                    .build(),
            )
            .build();
        let dispatcher = Dispatcher::new(host);
        let response = dispatcher
            .dispatch(BatchRequest {
                batch: vec![item(
                    "1",
                    vec![Op::get("nested"), Op::get("getValue"), Op::apply(vec![])],
                )],
            })
            .await;
        assert_matches!(&response.batch[0], BatchReply::Success { result, .. } => {
            assert_eq!(result.as_f64(), Some(42.0));
        });
    }

    #[tokio::test]
    async fn undefined_dereference_names_the_offending_key() {
        let dispatcher = Dispatcher::new(HostObject::new().build());
        let response = dispatcher
            .dispatch(BatchRequest {
                batch: vec![item("1", vec![Op::get("missing"), Op::get("deeper")])],
            })
            .await;
        assert_matches!(&response.batch[0], BatchReply::Failure { error, .. } => {
            let Value::Error(e) = error else { panic!("expected error value") };
            let e = e.borrow();
            assert_eq!(e.name, "TypeError");
            assert!(e.message.contains("deeper"), "message: {}", e.message);
        });
    }

    #[tokio::test]
    async fn depth_and_arity_caps_are_enforced_per_item() {
        let dispatcher = Dispatcher::new(counter_host())
            .with_limits(Limits { max_depth: 2, max_args: 1 });
        let response = dispatcher
            .dispatch(BatchRequest {
                batch: vec![
                    item("ok", call("increment")),
                    item(
                        "deep",
                        vec![Op::get("a"), Op::get("b"), Op::get("c")],
                    ),
                    item(
                        "wide",
                        vec![
                            Op::get("increment"),
                            Op::apply(vec![Value::Null, Value::Null]),
                        ],
                    ),
                ],
            })
            .await;
        assert_matches!(&response.batch[0], BatchReply::Success { .. });
        assert_matches!(&response.batch[1], BatchReply::Failure { .. });
        assert_matches!(&response.batch[2], BatchReply::Failure { .. });
    }

    #[tokio::test]
    async fn invoking_a_non_function_is_a_type_error() {
        let host = HostObject::new().value("answer", 42).build();
        let dispatcher = Dispatcher::new(host);
        let response = dispatcher
            .dispatch(BatchRequest {
                batch: vec![item("1", vec![Op::get("answer"), Op::apply(vec![])])],
            })
            .await;
        assert_matches!(&response.batch[0], BatchReply::Failure { error, .. } => {
            let Value::Error(e) = error else { panic!("expected error value") };
            assert_eq!(e.borrow().name, "TypeError");
            assert!(e.borrow().message.contains("answer"));
        });
    }
}
