// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The host object model: the live server-side values that chains are
//! walked against.
//!
//! A host value is either plain data (a wire [`Value`]), a composite
//! node holding further host values, a callable method, or a computed
//! member. Methods are async closures receiving the receiver object and
//! the resolved arguments; the table built with [`HostObject`] is the
//! object's entire dispatch set — there is no hidden inheritance.

use farcall_core::{ErrorValue, Value};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

/// The future returned from a host method.
pub type MethodFuture = LocalBoxFuture<'static, Result<HostValue, ErrorValue>>;

/// A host method: receiver plus resolved arguments, asynchronous result.
pub type MethodFn = Rc<dyn Fn(HostValue, Vec<HostValue>) -> MethodFuture>;

/// A computed member, evaluated against its holder on access.
pub type GetterFn = Rc<dyn Fn(&HostValue) -> Result<HostValue, ErrorValue>>;

/// A reference-counted composite host node.
pub type HostObjectRef = Rc<RefCell<IndexMap<String, HostValue>>>;

/// A reference-counted host array node.
pub type HostArrayRef = Rc<RefCell<Vec<HostValue>>>;

/// A live server-side value.
#[derive(Clone)]
pub enum HostValue {
    /// Plain data; travels to the wire unchanged.
    Data(Value),
    /// A composite object whose members may include methods.
    Object(HostObjectRef),
    /// An ordered sequence of host values.
    Array(HostArrayRef),
    /// A callable.
    Function(HostFunction),
    /// A computed member. Evaluated on traversal; skipped silently by
    /// the marshaller when evaluation fails.
    Getter(HostGetter),
}

impl std::fmt::Debug for HostValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostValue::Data(v) => f.debug_tuple("Data").field(v).finish(),
            HostValue::Object(o) => f
                .debug_struct("Object")
                .field("members", &o.borrow().len())
                .finish(),
            HostValue::Array(a) => f
                .debug_struct("Array")
                .field("len", &a.borrow().len())
                .finish(),
            HostValue::Function(func) => f
                .debug_struct("Function")
                .field("name", &func.name)
                .finish(),
            HostValue::Getter(_) => f.debug_tuple("Getter").finish(),
        }
    }
}

/// A named callable member of a host object.
#[derive(Clone)]
pub struct HostFunction {
    /// The name the function was registered under.
    pub name: String,
    /// The implementation.
    pub f: MethodFn,
}

/// A computed member of a host object.
#[derive(Clone)]
pub struct HostGetter {
    /// The implementation, evaluated against the holding object.
    pub f: GetterFn,
}

impl HostValue {
    /// Plain data from anything that converts into a wire value.
    pub fn data(value: impl Into<Value>) -> HostValue {
        HostValue::Data(value.into())
    }

    /// The undefined value.
    pub fn undefined() -> HostValue {
        HostValue::Data(Value::Undefined)
    }

    /// A host array from elements.
    pub fn array(items: impl IntoIterator<Item = HostValue>) -> HostValue {
        HostValue::Array(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    /// A free-standing named function, eg to return from a method.
    pub fn function<F, Fut>(name: impl Into<String>, f: F) -> HostValue
    where
        F: Fn(HostValue, Vec<HostValue>) -> Fut + 'static,
        Fut: Future<Output = Result<HostValue, ErrorValue>> + 'static,
    {
        HostValue::Function(HostFunction {
            name: name.into(),
            f: Rc::new(move |recv, args| f(recv, args).boxed_local()),
        })
    }

    /// The wire value, if this node is plain data.
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            HostValue::Data(v) => Some(v),
            _ => None,
        }
    }

    /// Member lookup on host objects (not on plain data).
    pub fn member(&self, key: &str) -> Option<HostValue> {
        match self {
            HostValue::Object(o) => o.borrow().get(key).cloned(),
            _ => None,
        }
    }
}

impl From<Value> for HostValue {
    fn from(v: Value) -> Self {
        HostValue::Data(v)
    }
}

/// Builds a composite host object: values, nested objects, methods and
/// computed members, in insertion order.
///
/// ```rust
/// use farcall_server::{HostObject, HostValue};
///
/// let host = HostObject::new()
///     .value("version", 3)
///     .method("echo", |_recv, args| async move {
///         Ok(args.into_iter().next().unwrap_or(HostValue::undefined()))
///     })
///     .build();
/// assert!(host.member("echo").is_some());
/// ```
#[derive(Default)]
pub struct HostObject {
    entries: IndexMap<String, HostValue>,
}

impl HostObject {
    /// An empty object.
    pub fn new() -> HostObject {
        HostObject::default()
    }

    /// Insert a plain data member.
    pub fn value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .insert(key.into(), HostValue::Data(value.into()));
        self
    }

    /// Insert an arbitrary host value member.
    pub fn entry(mut self, key: impl Into<String>, value: HostValue) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Insert a nested object member.
    pub fn child(self, key: impl Into<String>, child: HostObject) -> Self {
        self.entry(key, child.build())
    }

    /// Insert an async method. The closure receives the receiver (the
    /// object holding the method at traversal time) and the resolved
    /// arguments.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HostValue, Vec<HostValue>) -> Fut + 'static,
        Fut: Future<Output = Result<HostValue, ErrorValue>> + 'static,
    {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            HostValue::Function(HostFunction {
                name,
                f: Rc::new(move |recv, args| f(recv, args).boxed_local()),
            }),
        );
        self
    }

    /// Insert a computed member, evaluated against the holding object on
    /// each access.
    pub fn getter<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HostValue) -> Result<HostValue, ErrorValue> + 'static,
    {
        self.entries
            .insert(name.into(), HostValue::Getter(HostGetter { f: Rc::new(f) }));
        self
    }

    /// Finish building.
    pub fn build(self) -> HostValue {
        HostValue::Object(Rc::new(RefCell::new(self.entries)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_insertion_order() {
        let host = HostObject::new()
            .value("b", 1)
            .value("a", 2)
            .method("m", |_, _| async { Ok(HostValue::undefined()) })
            .build();
        let HostValue::Object(o) = &host else {
            panic!("expected object")
        };
        let keys: Vec<String> = o.borrow().keys().cloned().collect();
        assert_eq!(keys, ["b", "a", "m"]);
    }
}
