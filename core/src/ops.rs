// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Operations and operation chains: the serialisable trace of member
//! accesses and invocations that the client records and the server walks.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A member key. Only strings and non-negative integers are expressible
/// on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// A numeric index, eg into an array.
    Index(u64),
    /// A string property name.
    String(String),
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{i}"),
            Key::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<u64> for Key {
    fn from(i: u64) -> Self {
        Key::Index(i)
    }
}

impl From<u32> for Key {
    fn from(i: u32) -> Self {
        Key::Index(i as u64)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i as u64)
    }
}

/// A single recorded operation.
#[derive(Debug, Clone)]
pub enum Op {
    /// Select a member of the current value.
    Get {
        /// The member to select.
        key: Key,
    },
    /// Invoke the current value. The receiver is the holder of the
    /// immediately preceding `Get`, or the host root for a leading apply.
    Apply {
        /// The captured arguments.
        args: Vec<Value>,
    },
}

impl Op {
    /// Shorthand for a `Get` operation.
    pub fn get(key: impl Into<Key>) -> Op {
        Op::Get { key: key.into() }
    }

    /// Shorthand for an `Apply` operation.
    pub fn apply(args: Vec<Value>) -> Op {
        Op::Apply { args }
    }
}

/// An ordered, immutable-once-built sequence of operations, applied left
/// to right starting from the host root.
#[derive(Debug, Clone, Default)]
pub struct OpChain {
    /// The operations, in application order.
    pub ops: Vec<Op>,
}

impl OpChain {
    /// An empty chain, denoting the host root itself.
    pub fn new() -> Self {
        OpChain { ops: Vec::new() }
    }

    /// Build a chain from operations.
    pub fn from_ops(ops: Vec<Op>) -> Self {
        OpChain { ops }
    }

    /// Number of operations in the chain.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the chain is empty (ie denotes the root).
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// A fresh chain with `op` appended; `self` is left untouched.
    pub fn extended(&self, op: Op) -> OpChain {
        let mut ops = self.ops.clone();
        ops.push(op);
        OpChain { ops }
    }

    /// A fresh chain with all of `tail`'s operations appended.
    pub fn joined(&self, tail: &OpChain) -> OpChain {
        let mut ops = self.ops.clone();
        ops.extend(tail.ops.iter().cloned());
        OpChain { ops }
    }
}

impl std::fmt::Display for OpChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for op in &self.ops {
            match op {
                Op::Get { key } => write!(f, ".{key}")?,
                Op::Apply { args } => write!(f, "({} args)", args.len())?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_deserialize_as_string_or_index() {
        let k: Key = serde_json::from_str("\"storage\"").unwrap();
        assert_eq!(k, Key::String("storage".into()));
        let k: Key = serde_json::from_str("3").unwrap();
        assert_eq!(k, Key::Index(3));
        // Negative indices are not expressible.
        assert!(serde_json::from_str::<Key>("-1").is_err());
    }

    #[test]
    fn extending_leaves_the_original_untouched() {
        let base = OpChain::new().extended(Op::get("ctx"));
        let child = base.extended(Op::get("storage"));
        assert_eq!(base.len(), 1);
        assert_eq!(child.len(), 2);
    }
}
