// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Decoded results: plain data plus reinvocable remote functions.

use crate::chain::ClientChain;
use crate::client::Client;
use crate::handle::{CallArg, Handle};
use farcall_core::value::{ErrorRef, MapRef, SetRef};
use farcall_core::{
    HeadersValue, HttpRequestValue, HttpResponseValue, Key, RegExpValue, TypedArrayValue, Value,
};
use indexmap::IndexMap;
use num_bigint::BigInt;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// A value returned from awaiting a handle.
///
/// Plain data mirrors the wire grammar. Callable members of the result
/// arrive as [`RemoteValue::Function`]s which can be invoked to issue a
/// fresh round-trip. Identity is preserved: if the host returned the
/// same node twice, both positions hold the same node here too.
#[derive(Debug, Clone)]
pub enum RemoteValue {
    /// The undefined value.
    Undefined,
    /// The null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number, including ±∞ and NaN.
    Number(f64),
    /// An arbitrary-precision integer.
    BigInt(BigInt),
    /// A string.
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    /// A regular expression.
    RegExp(RegExpValue),
    /// A raw byte buffer.
    Bytes(Vec<u8>),
    /// A typed numeric buffer.
    TypedArray(TypedArrayValue),
    /// An ordered sequence of decoded values.
    Array(Rc<RefCell<Vec<RemoteValue>>>),
    /// A string-keyed mapping of decoded values.
    Object(Rc<RefCell<IndexMap<String, RemoteValue>>>),
    /// An ordered key-value container, passed through as plain data.
    Map(MapRef),
    /// An ordered unique container, passed through as plain data.
    Set(SetRef),
    /// An error value, passed through as plain data.
    Error(ErrorRef),
    /// A URL.
    Url(url::Url),
    /// HTTP headers.
    Headers(HeadersValue),
    /// An HTTP-request-shaped object.
    HttpRequest(Rc<HttpRequestValue>),
    /// An HTTP-response-shaped object.
    HttpResponse(Rc<HttpResponseValue>),
    /// A callable member of the result, reinvocable remotely.
    Function(RemoteFunction),
}

/// A reinvocable stand-in for a callable member of a marshalled result.
///
/// Calling it appends an invocation to the absolute chain the server
/// provided and queues it for execution, exactly as if the whole path
/// had been spelled out on the client.
#[derive(Clone)]
pub struct RemoteFunction {
    pub(crate) client: Client,
    pub(crate) chain: Rc<ClientChain>,
    pub(crate) name: String,
}

impl std::fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("name", &self.name)
            .field("ops", &self.chain.ops.len())
            .finish()
    }
}

impl RemoteFunction {
    /// The member name the function was found under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the remote function. The returned handle is awaitable and
    /// further chainable, like any recorded invocation.
    pub fn call(&self, args: Vec<CallArg>) -> Handle {
        self.handle().call(args)
    }

    /// A handle standing for the function itself, for further member
    /// access before invoking.
    pub fn handle(&self) -> Handle {
        Handle::from_chain(self.client.clone(), (*self.chain).clone())
    }
}

impl RemoteValue {
    /// The string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RemoteValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RemoteValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RemoteValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, RemoteValue::Undefined)
    }

    /// Member lookup on decoded objects.
    pub fn get(&self, key: &str) -> Option<RemoteValue> {
        match self {
            RemoteValue::Object(o) => o.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Element lookup on decoded arrays.
    pub fn index(&self, i: usize) -> Option<RemoteValue> {
        match self {
            RemoteValue::Array(a) => a.borrow().get(i).cloned(),
            _ => None,
        }
    }

    /// The remote function, if this is one.
    pub fn as_function(&self) -> Option<&RemoteFunction> {
        match self {
            RemoteValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Invoke the member `name` of this object as a remote method.
    ///
    /// Shorthand for `get(name)` + [`RemoteFunction::call`]; returns
    /// `None` when the member is absent or not callable.
    pub fn invoke(&self, name: impl Into<Key>, args: Vec<CallArg>) -> Option<Handle> {
        let key = name.into();
        let member = match &key {
            Key::String(s) => self.get(s)?,
            Key::Index(i) => self.index(*i as usize)?,
        };
        Some(member.as_function()?.call(args))
    }

    /// Whether `a` and `b` are the very same decoded node.
    pub fn same_node(a: &RemoteValue, b: &RemoteValue) -> bool {
        match (a, b) {
            (RemoteValue::Object(x), RemoteValue::Object(y)) => Rc::ptr_eq(x, y),
            (RemoteValue::Array(x), RemoteValue::Array(y)) => Rc::ptr_eq(x, y),
            (RemoteValue::Map(x), RemoteValue::Map(y)) => Rc::ptr_eq(x, y),
            (RemoteValue::Set(x), RemoteValue::Set(y)) => Rc::ptr_eq(x, y),
            (RemoteValue::Error(x), RemoteValue::Error(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Convert back into a plain wire value, if no remote function is
    /// reachable from this node. Shared structure is preserved.
    pub fn to_value(&self) -> Option<Value> {
        let mut seen = std::collections::HashMap::new();
        to_value_inner(self, &mut seen)
    }
}

fn to_value_inner(
    value: &RemoteValue,
    seen: &mut std::collections::HashMap<usize, Value>,
) -> Option<Value> {
    Some(match value {
        RemoteValue::Undefined => Value::Undefined,
        RemoteValue::Null => Value::Null,
        RemoteValue::Bool(b) => Value::Bool(*b),
        RemoteValue::Number(n) => Value::Number(*n),
        RemoteValue::BigInt(b) => Value::BigInt(b.clone()),
        RemoteValue::String(s) => Value::String(s.clone()),
        RemoteValue::Date(d) => Value::Date(*d),
        RemoteValue::RegExp(re) => Value::RegExp(re.clone()),
        RemoteValue::Bytes(b) => Value::Bytes(b.clone()),
        RemoteValue::TypedArray(ta) => Value::TypedArray(ta.clone()),
        RemoteValue::Map(m) => Value::Map(m.clone()),
        RemoteValue::Set(s) => Value::Set(s.clone()),
        RemoteValue::Error(e) => Value::Error(e.clone()),
        RemoteValue::Url(u) => Value::Url(u.clone()),
        RemoteValue::Headers(h) => Value::Headers(h.clone()),
        RemoteValue::HttpRequest(r) => Value::HttpRequest(r.clone()),
        RemoteValue::HttpResponse(r) => Value::HttpResponse(r.clone()),
        RemoteValue::Function(_) => return None,
        RemoteValue::Array(a) => {
            let key = Rc::as_ptr(a) as usize;
            if let Some(v) = seen.get(&key) {
                return Some(v.clone());
            }
            let node = Rc::new(RefCell::new(Vec::new()));
            seen.insert(key, Value::Array(node.clone()));
            for item in a.borrow().iter() {
                let converted = to_value_inner(item, seen)?;
                node.borrow_mut().push(converted);
            }
            Value::Array(node)
        }
        RemoteValue::Object(o) => {
            let key = Rc::as_ptr(o) as usize;
            if let Some(v) = seen.get(&key) {
                return Some(v.clone());
            }
            let node = Rc::new(RefCell::new(IndexMap::new()));
            seen.insert(key, Value::Object(node.clone()));
            for (k, item) in o.borrow().iter() {
                let converted = to_value_inner(item, seen)?;
                node.borrow_mut().insert(k.clone(), converted);
            }
            Value::Object(node)
        }
    })
}

impl PartialEq for RemoteValue {
    fn eq(&self, other: &Self) -> bool {
        let mut visited = HashSet::new();
        eq_inner(self, other, &mut visited)
    }
}

fn num_eq(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

fn eq_inner(a: &RemoteValue, b: &RemoteValue, visited: &mut HashSet<(usize, usize)>) -> bool {
    let pair = match (a, b) {
        (RemoteValue::Object(x), RemoteValue::Object(y)) => {
            Some((Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize))
        }
        (RemoteValue::Array(x), RemoteValue::Array(y)) => {
            Some((Rc::as_ptr(x) as usize, Rc::as_ptr(y) as usize))
        }
        _ => None,
    };
    if let Some(pair) = pair {
        if !visited.insert(pair) {
            return true;
        }
    }
    match (a, b) {
        (RemoteValue::Undefined, RemoteValue::Undefined) => true,
        (RemoteValue::Null, RemoteValue::Null) => true,
        (RemoteValue::Bool(x), RemoteValue::Bool(y)) => x == y,
        (RemoteValue::Number(x), RemoteValue::Number(y)) => num_eq(*x, *y),
        (RemoteValue::BigInt(x), RemoteValue::BigInt(y)) => x == y,
        (RemoteValue::String(x), RemoteValue::String(y)) => x == y,
        (RemoteValue::Date(x), RemoteValue::Date(y)) => num_eq(*x, *y),
        (RemoteValue::RegExp(x), RemoteValue::RegExp(y)) => x == y,
        (RemoteValue::Bytes(x), RemoteValue::Bytes(y)) => x == y,
        (RemoteValue::TypedArray(x), RemoteValue::TypedArray(y)) => x == y,
        (RemoteValue::Url(x), RemoteValue::Url(y)) => x == y,
        (RemoteValue::Headers(x), RemoteValue::Headers(y)) => x == y,
        (RemoteValue::Map(x), RemoteValue::Map(y)) => Value::Map(x.clone()) == Value::Map(y.clone()),
        (RemoteValue::Set(x), RemoteValue::Set(y)) => Value::Set(x.clone()) == Value::Set(y.clone()),
        (RemoteValue::Error(x), RemoteValue::Error(y)) => {
            Value::Error(x.clone()) == Value::Error(y.clone())
        }
        (RemoteValue::HttpRequest(x), RemoteValue::HttpRequest(y)) => {
            Value::HttpRequest(x.clone()) == Value::HttpRequest(y.clone())
        }
        (RemoteValue::HttpResponse(x), RemoteValue::HttpResponse(y)) => {
            Value::HttpResponse(x.clone()) == Value::HttpResponse(y.clone())
        }
        (RemoteValue::Function(x), RemoteValue::Function(y)) => x.name == y.name,
        (RemoteValue::Array(x), RemoteValue::Array(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| eq_inner(a, b, visited))
        }
        (RemoteValue::Object(x), RemoteValue::Object(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && eq_inner(va, vb, visited)
                })
        }
        _ => false,
    }
}
