// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Client-side chains.
//!
//! The client records arguments as [`CallArg`]s rather than wire values,
//! so a handle embedded in an argument list is visible to the batcher as
//! a typed variant. Handles are materialised into nested-operation
//! markers at drain time; they can never leak onto the wire by accident.

use crate::handle::CallArg;
use farcall_core::{Key, Op, OpChain, Value};

/// A recorded operation, before argument materialisation.
#[derive(Clone)]
pub(crate) enum ClientOp {
    /// Select a member.
    Get(Key),
    /// Invoke the current value with captured arguments.
    Apply(Vec<CallArg>),
}

/// An ordered trace of recorded operations. Chains are immutable once
/// built; extending one produces a fresh chain.
#[derive(Clone, Default)]
pub(crate) struct ClientChain {
    pub(crate) ops: Vec<ClientOp>,
}

impl ClientChain {
    pub(crate) fn root() -> Self {
        ClientChain { ops: Vec::new() }
    }

    pub(crate) fn extended(&self, op: ClientOp) -> ClientChain {
        let mut ops = self.ops.clone();
        ops.push(op);
        ClientChain { ops }
    }

    /// Rebuild a client chain from an absolute wire chain, as carried by
    /// a remote-function marker. Wire argument values arrive as plain
    /// [`CallArg::Value`]s.
    pub(crate) fn from_wire(chain: &OpChain) -> ClientChain {
        let ops = chain
            .ops
            .iter()
            .map(|op| match op {
                Op::Get { key } => ClientOp::Get(key.clone()),
                Op::Apply { args } => {
                    ClientOp::Apply(args.iter().cloned().map(CallArg::Value).collect())
                }
            })
            .collect();
        ClientChain { ops }
    }
}

/// Deep-copy a value so that later mutation by the caller cannot change
/// what is sent. Internal sharing and cycles are preserved.
pub(crate) fn capture_value(value: &Value) -> Value {
    let mut seen = std::collections::HashMap::new();
    capture_inner(value, &mut seen)
}

fn capture_inner(
    value: &Value,
    seen: &mut std::collections::HashMap<usize, Value>,
) -> Value {
    use std::cell::RefCell;
    use std::rc::Rc;

    match value {
        Value::Object(o) => {
            let key = Rc::as_ptr(o) as usize;
            if let Some(copy) = seen.get(&key) {
                return copy.clone();
            }
            let node = Rc::new(RefCell::new(indexmap::IndexMap::new()));
            seen.insert(key, Value::Object(node.clone()));
            for (k, v) in o.borrow().iter() {
                let copied = capture_inner(v, seen);
                node.borrow_mut().insert(k.clone(), copied);
            }
            Value::Object(node)
        }
        Value::Array(a) => {
            let key = Rc::as_ptr(a) as usize;
            if let Some(copy) = seen.get(&key) {
                return copy.clone();
            }
            let node = Rc::new(RefCell::new(Vec::new()));
            seen.insert(key, Value::Array(node.clone()));
            for v in a.borrow().iter() {
                let copied = capture_inner(v, seen);
                node.borrow_mut().push(copied);
            }
            Value::Array(node)
        }
        Value::Map(m) => {
            let key = Rc::as_ptr(m) as usize;
            if let Some(copy) = seen.get(&key) {
                return copy.clone();
            }
            let node = Rc::new(RefCell::new(Vec::new()));
            seen.insert(key, Value::Map(node.clone()));
            for (k, v) in m.borrow().iter() {
                let pair = (capture_inner(k, seen), capture_inner(v, seen));
                node.borrow_mut().push(pair);
            }
            Value::Map(node)
        }
        Value::Set(s) => {
            let key = Rc::as_ptr(s) as usize;
            if let Some(copy) = seen.get(&key) {
                return copy.clone();
            }
            let node = Rc::new(RefCell::new(Vec::new()));
            seen.insert(key, Value::Set(node.clone()));
            for v in s.borrow().iter() {
                let copied = capture_inner(v, seen);
                node.borrow_mut().push(copied);
            }
            Value::Set(node)
        }
        Value::Error(e) => {
            let key = Rc::as_ptr(e) as usize;
            if let Some(copy) = seen.get(&key) {
                return copy.clone();
            }
            let node = Rc::new(RefCell::new(farcall_core::ErrorValue::default()));
            seen.insert(key, Value::Error(node.clone()));
            let src = e.borrow();
            let mut copied = farcall_core::ErrorValue::new(src.name.clone(), src.message.clone());
            copied.stack = src.stack.clone();
            for (k, v) in src.properties.iter() {
                copied.properties.insert(k.clone(), capture_inner(v, seen));
            }
            *node.borrow_mut() = copied;
            Value::Error(node)
        }
        // Everything else is immutable from the caller's point of view
        // once cloned (plain data or markers).
        other => other.clone(),
    }
}

/// Capture a call's argument list at invocation time.
pub(crate) fn capture_args(args: Vec<CallArg>) -> Vec<CallArg> {
    args.into_iter()
        .map(|arg| match arg {
            CallArg::Value(v) => CallArg::Value(capture_value(&v)),
            handle @ CallArg::Handle(_) => handle,
        })
        .collect()
}

/// Lineage test: whether `ancestor` is a strict ancestor of `handle` in
/// the parent chain recorded at handle creation.
pub(crate) fn is_strict_ancestor(
    ancestor: &std::rc::Rc<crate::handle::HandleInner>,
    handle: &std::rc::Rc<crate::handle::HandleInner>,
) -> bool {
    let target = std::rc::Rc::as_ptr(ancestor);
    let mut cursor = handle.parent.clone();
    while let Some(node) = cursor {
        if std::rc::Rc::as_ptr(&node) == target {
            return true;
        }
        cursor = node.parent.clone();
    }
    false
}
