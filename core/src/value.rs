// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The wire value grammar.
//!
//! Container nodes (`Object`, `Array`, `Map`, `Set`, `Error`) are
//! reference counted so that shared nodes and circular references can be
//! represented in memory exactly as they travel on the wire. Everything
//! here is single-threaded by design; value graphs never cross threads.

use crate::error::ErrorValue;
use crate::ops::OpChain;
use indexmap::IndexMap;
use num_bigint::BigInt;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// A reference-counted, string-keyed, insertion-ordered object node.
pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;

/// A reference-counted array node.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// A reference-counted ordered key-value container node.
pub type MapRef = Rc<RefCell<Vec<(Value, Value)>>>;

/// A reference-counted ordered unique container node.
pub type SetRef = Rc<RefCell<Vec<Value>>>;

/// A reference-counted error node.
pub type ErrorRef = Rc<RefCell<ErrorValue>>;

/// A value as it travels across the boundary.
#[derive(Debug, Clone)]
pub enum Value {
    /// The undefined value.
    Undefined,
    /// The null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A double-precision number, including ±∞ and NaN.
    Number(f64),
    /// An arbitrary-precision signed integer.
    BigInt(BigInt),
    /// A string.
    String(String),
    /// A timestamp in milliseconds since the Unix epoch.
    Date(f64),
    /// A regular expression (source and flags, uninterpreted).
    RegExp(RegExpValue),
    /// A raw byte buffer.
    Bytes(Vec<u8>),
    /// A typed numeric buffer.
    TypedArray(TypedArrayValue),
    /// An ordered sequence.
    Array(ArrayRef),
    /// A string-keyed mapping.
    Object(ObjectRef),
    /// An ordered key-value container with arbitrary keys.
    Map(MapRef),
    /// An ordered container of unique values.
    Set(SetRef),
    /// An error value.
    Error(ErrorRef),
    /// A URL.
    Url(url::Url),
    /// An ordered list of HTTP header name/value pairs.
    Headers(HeadersValue),
    /// An HTTP-request-shaped object.
    HttpRequest(Rc<HttpRequestValue>),
    /// An HTTP-response-shaped object.
    HttpResponse(Rc<HttpResponseValue>),
    /// Marker: a callable member of a marshalled result, reinvocable via
    /// the absolute chain it carries.
    RemoteFunction(RemoteFunctionMarker),
    /// Marker: a reference to the result of another chain in the same
    /// batch.
    NestedOperation(NestedOperationMarker),
}

/// A regular expression: source and flags, passed through uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExpValue {
    /// The pattern source.
    pub source: String,
    /// The flags string, eg `gi`.
    pub flags: String,
}

/// The element kind of a typed numeric buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TypedArrayKind {
    U8,
    U8Clamped,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl TypedArrayKind {
    /// The wire name of this element kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypedArrayKind::U8 => "u8",
            TypedArrayKind::U8Clamped => "u8c",
            TypedArrayKind::I8 => "i8",
            TypedArrayKind::U16 => "u16",
            TypedArrayKind::I16 => "i16",
            TypedArrayKind::U32 => "u32",
            TypedArrayKind::I32 => "i32",
            TypedArrayKind::U64 => "u64",
            TypedArrayKind::I64 => "i64",
            TypedArrayKind::F32 => "f32",
            TypedArrayKind::F64 => "f64",
        }
    }

    /// Parse a wire name back into an element kind.
    pub fn from_str(s: &str) -> Option<TypedArrayKind> {
        Some(match s {
            "u8" => TypedArrayKind::U8,
            "u8c" => TypedArrayKind::U8Clamped,
            "i8" => TypedArrayKind::I8,
            "u16" => TypedArrayKind::U16,
            "i16" => TypedArrayKind::I16,
            "u32" => TypedArrayKind::U32,
            "i32" => TypedArrayKind::I32,
            "u64" => TypedArrayKind::U64,
            "i64" => TypedArrayKind::I64,
            "f32" => TypedArrayKind::F32,
            "f64" => TypedArrayKind::F64,
            _ => return None,
        })
    }
}

/// A typed numeric buffer: element kind plus the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedArrayValue {
    /// Element kind.
    pub kind: TypedArrayKind,
    /// The underlying bytes, in element order.
    pub bytes: Vec<u8>,
}

/// An ordered list of HTTP header name/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadersValue(pub Vec<(String, String)>);

impl HeadersValue {
    /// Look up the first header with the given name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP-request-shaped object.
#[derive(Debug, Clone)]
pub struct HttpRequestValue {
    /// Request method, eg `GET`.
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HeadersValue,
    /// Optional body.
    pub body: Option<Value>,
}

/// An HTTP-response-shaped object.
#[derive(Debug, Clone)]
pub struct HttpResponseValue {
    /// Status code.
    pub status: u16,
    /// Status text, eg `OK`.
    pub status_text: String,
    /// Response headers.
    pub headers: HeadersValue,
    /// Optional body.
    pub body: Option<Value>,
}

/// Marker denoting a callable member of a marshalled result. The chain is
/// absolute from the host root; appending an apply and executing it
/// reinvokes the function.
#[derive(Debug, Clone)]
pub struct RemoteFunctionMarker {
    /// Absolute chain reaching the function on the host.
    pub operation_chain: OpChain,
    /// The member name the function was found under.
    pub function_name: String,
}

/// Marker denoting the result of another chain in the same batch, used
/// for pipelined arguments. The first occurrence of a `ref_id` carries
/// the chain; later occurrences are aliases and leave it out.
#[derive(Debug, Clone)]
pub struct NestedOperationMarker {
    /// Identifier shared by all occurrences of the same source handle
    /// within one batch.
    pub ref_id: String,
    /// The chain to execute; present only on the defining occurrence.
    pub operation_chain: Option<OpChain>,
}

impl Value {
    /// An empty object node.
    pub fn empty_object() -> Value {
        Value::Object(Rc::new(RefCell::new(IndexMap::new())))
    }

    /// An object node built from entries, preserving order.
    pub fn object(entries: impl IntoIterator<Item = (String, Value)>) -> Value {
        Value::Object(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    /// An array node built from elements.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// A map node built from pairs.
    pub fn map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
        Value::Map(Rc::new(RefCell::new(pairs.into_iter().collect())))
    }

    /// A set node built from elements.
    pub fn set(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Set(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// Wrap an [`ErrorValue`] into a value node.
    pub fn error(err: ErrorValue) -> Value {
        Value::Error(Rc::new(RefCell::new(err)))
    }

    /// The string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Member lookup on object nodes.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(o) => o.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Element lookup on array nodes.
    pub fn index(&self, i: usize) -> Option<Value> {
        match self {
            Value::Array(a) => a.borrow().get(i).cloned(),
            _ => None,
        }
    }

    /// Whether `a` and `b` are the very same container node.
    pub fn same_node(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
            (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
            (Value::Map(x), Value::Map(y)) => Rc::ptr_eq(x, y),
            (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
            (Value::Error(x), Value::Error(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Structural equality that tolerates cycles and treats NaN as equal
    /// to NaN, matching wire equivalence rather than IEEE semantics.
    pub fn structural_eq(&self, other: &Value) -> bool {
        let mut visited = HashSet::new();
        eq_inner(self, other, &mut visited)
    }
}

fn num_eq(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

fn node_pair(a: &Value, b: &Value) -> Option<(usize, usize)> {
    let addr = |v: &Value| -> Option<usize> {
        Some(match v {
            Value::Object(o) => Rc::as_ptr(o) as usize,
            Value::Array(a) => Rc::as_ptr(a) as usize,
            Value::Map(m) => Rc::as_ptr(m) as usize,
            Value::Set(s) => Rc::as_ptr(s) as usize,
            Value::Error(e) => Rc::as_ptr(e) as usize,
            _ => return None,
        })
    };
    Some((addr(a)?, addr(b)?))
}

fn eq_inner(a: &Value, b: &Value, visited: &mut HashSet<(usize, usize)>) -> bool {
    if let Some(pair) = node_pair(a, b) {
        // Already comparing this pair further up the stack; assume equal
        // to terminate on cycles.
        if !visited.insert(pair) {
            return true;
        }
    }
    match (a, b) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => num_eq(*x, *y),
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => num_eq(*x, *y),
        (Value::RegExp(x), Value::RegExp(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::TypedArray(x), Value::TypedArray(y)) => x == y,
        (Value::Url(x), Value::Url(y)) => x == y,
        (Value::Headers(x), Value::Headers(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| eq_inner(a, b, visited))
        }
        (Value::Object(x), Value::Object(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && eq_inner(va, vb, visited)
                })
        }
        (Value::Map(x), Value::Map(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((ka, va), (kb, vb))| {
                    eq_inner(ka, kb, visited) && eq_inner(va, vb, visited)
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| eq_inner(a, b, visited))
        }
        (Value::Error(x), Value::Error(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.name == y.name
                && x.message == y.message
                && x.stack == y.stack
                && x.properties.len() == y.properties.len()
                && x.properties.iter().zip(y.properties.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && eq_inner(va, vb, visited)
                })
        }
        (Value::HttpRequest(x), Value::HttpRequest(y)) => {
            x.method == y.method
                && x.url == y.url
                && x.headers == y.headers
                && opt_eq(&x.body, &y.body, visited)
        }
        (Value::HttpResponse(x), Value::HttpResponse(y)) => {
            x.status == y.status
                && x.status_text == y.status_text
                && x.headers == y.headers
                && opt_eq(&x.body, &y.body, visited)
        }
        (Value::RemoteFunction(x), Value::RemoteFunction(y)) => {
            x.function_name == y.function_name
                && x.operation_chain.ops.len() == y.operation_chain.ops.len()
        }
        (Value::NestedOperation(x), Value::NestedOperation(y)) => x.ref_id == y.ref_id,
        _ => false,
    }
}

fn opt_eq(a: &Option<Value>, b: &Option<Value>, visited: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => eq_inner(a, b, visited),
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<BigInt> for Value {
    fn from(b: BigInt) -> Self {
        Value::BigInt(b)
    }
}

impl From<ErrorValue> for Value {
    fn from(e: ErrorValue) -> Self {
        Value::error(e)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}
