// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Handles: the client-side stand-ins for remote values.
//!
//! A [`Handle`] records member accesses and invocations without touching
//! the network. `get` extends the recorded chain; `call` extends it with
//! an invocation and eagerly queues the new chain for execution. Handles
//! are awaitable (via `IntoFuture`) and remain chainable after a call, so
//! `client.get("counter").call_method("increment", call_args![])` reads
//! like the local expression it stands for.
//!
//! Awaiting consumes the eagerly queued execution if one is pending;
//! awaiting again (via a clone) queues a fresh execution, so two awaits
//! mean two invocations on the host.

use crate::chain::{ClientChain, ClientOp, capture_args};
use crate::client::Client;
use crate::error::Error;
use crate::remote_value::RemoteValue;
use farcall_core::{Key, Value};
use std::cell::{Cell, OnceCell};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;

/// The future returned from awaiting a [`Handle`].
pub type ResultFuture = Pin<Box<dyn Future<Output = Result<RemoteValue, Error>>>>;

/// Shared bookkeeping for one recorded chain. Dropping every handle that
/// points at it reclaims the chain, its lineage link and its ids.
pub(crate) struct HandleInner {
    /// The recorded chain. Immutable once built; shared by reference
    /// with the batcher.
    pub(crate) chain: Rc<ClientChain>,
    /// The handle this one was derived from, for prefix detection.
    pub(crate) parent: Option<Rc<HandleInner>>,
    /// Stable id, assigned lazily on first use as a pipelined argument.
    pub(crate) ref_id: OnceCell<String>,
    /// The queued execution created by `call`, consumed by the first
    /// await.
    pub(crate) pending: Cell<Option<String>>,
}

/// A remote value stand-in that records operations as it is used.
#[derive(Clone)]
pub struct Handle {
    pub(crate) client: Client,
    pub(crate) inner: Rc<HandleInner>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("ops", &self.inner.chain.ops.len())
            .finish()
    }
}

impl Handle {
    pub(crate) fn root(client: Client) -> Handle {
        Handle {
            client,
            inner: Rc::new(HandleInner {
                chain: Rc::new(ClientChain::root()),
                parent: None,
                ref_id: OnceCell::new(),
                pending: Cell::new(None),
            }),
        }
    }

    pub(crate) fn from_chain(client: Client, chain: ClientChain) -> Handle {
        Handle {
            client,
            inner: Rc::new(HandleInner {
                chain: Rc::new(chain),
                parent: None,
                ref_id: OnceCell::new(),
                pending: Cell::new(None),
            }),
        }
    }

    fn derive(&self, op: ClientOp) -> Handle {
        Handle {
            client: self.client.clone(),
            inner: Rc::new(HandleInner {
                chain: Rc::new(self.inner.chain.extended(op)),
                parent: Some(self.inner.clone()),
                ref_id: OnceCell::new(),
                pending: Cell::new(None),
            }),
        }
    }

    /// Select a member, yielding a new handle with the extended chain.
    pub fn get(&self, key: impl Into<Key>) -> Handle {
        self.derive(ClientOp::Get(key.into()))
    }

    /// Invoke the value this handle stands for. The argument list is
    /// captured now; mutating a passed value afterwards does not change
    /// what is sent. The invocation is queued immediately and the
    /// returned handle is both awaitable and further chainable.
    pub fn call(&self, args: Vec<CallArg>) -> Handle {
        let handle = self.derive(ClientOp::Apply(capture_args(args)));
        let id = handle.client.enqueue(handle.inner.clone());
        handle.inner.pending.set(Some(id));
        handle
    }

    /// `get(name)` followed by `call(args)`.
    pub fn call_method(&self, name: impl Into<Key>, args: Vec<CallArg>) -> Handle {
        self.get(name).call(args)
    }

    /// Fetch the value this chain reaches, skipping the conversion of
    /// callable members into handles: every function in the result is
    /// rendered as the literal string `"<name> [Function]"`. One
    /// round-trip; useful for inspecting a host object's shape.
    pub async fn as_object(&self) -> Result<Value, Error> {
        let id = match self.inner.pending.take() {
            Some(id) => id,
            None => self.client.enqueue(self.inner.clone()),
        };
        let value = self.client.await_item(id).await?;
        Ok(crate::unmarshal::render_object(&value))
    }
}

impl IntoFuture for Handle {
    type Output = Result<RemoteValue, Error>;
    type IntoFuture = ResultFuture;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let id = match self.inner.pending.take() {
                Some(id) => id,
                None => self.client.enqueue(self.inner.clone()),
            };
            let value = self.client.await_item(id).await?;
            Ok(crate::unmarshal::postprocess(&self.client, &value))
        })
    }
}

/// One argument of a recorded invocation: either a plain value or a
/// handle whose result the server should substitute in place.
#[derive(Clone)]
pub enum CallArg {
    /// A plain value, captured at call time.
    Value(Value),
    /// An unresolved chain; the batcher turns this into a
    /// nested-operation marker and the server pipelines the result.
    Handle(Handle),
}

impl From<Value> for CallArg {
    fn from(v: Value) -> Self {
        CallArg::Value(v)
    }
}

impl From<Handle> for CallArg {
    fn from(h: Handle) -> Self {
        CallArg::Handle(h)
    }
}

impl From<&Handle> for CallArg {
    fn from(h: &Handle) -> Self {
        CallArg::Handle(h.clone())
    }
}

macro_rules! arg_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CallArg {
                fn from(v: $ty) -> Self {
                    CallArg::Value(Value::from(v))
                }
            }
        )*
    }
}

arg_from_value!(bool, i32, i64, u32, u64, usize, f64, &str, String);

/// Build an argument list for [`Handle::call`].
///
/// Accepts anything that converts into a [`CallArg`]: plain values,
/// primitives, and handles (which become pipelined arguments).
///
/// ```rust,ignore
/// let sum = client.call("add", call_args![
///     client.call("increment", call_args![]),
///     client.call("increment", call_args![]),
/// ]);
/// ```
#[macro_export]
macro_rules! call_args {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::CallArg::from($arg)),*]
    }
}
