// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The client facade and the batcher behind it.
//!
//! Every recorded invocation is queued synchronously; the queue drains
//! when the first result future is polled. In an async context that poll
//! happens after the current stretch of straight-line code has finished
//! building its expressions, so everything queued together travels in
//! one batch — one transport round-trip for `join!`-style fan-out.
//!
//! The drain applies three passes before emitting:
//! 1. handles used as arguments become nested-operation markers, with
//!    one defining occurrence per ref id and aliases after it;
//! 2. chains consumed that way are dropped from the batch (their result
//!    is substituted server-side), leaving their futures pending;
//! 3. chains that are strict lineage ancestors of another queued chain
//!    are dropped the same way, since the longer chain subsumes them.

use crate::chain::{ClientChain, ClientOp, is_strict_ancestor};
use crate::diagnostics;
use crate::error::{Error, error_value_of};
use crate::handle::{CallArg, Handle, HandleInner};
use crate::transport::Transport;
use farcall_core::{
    BatchItem, BatchReply, BatchRequest, ErrorValue, NestedOperationMarker, Op, OpChain, Value,
    codec,
};
use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared};
use futures::stream::Stream;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::rc::Rc;
use std::task::Poll;
use tracing::{debug, trace};

type ItemResult = Result<Value, ErrorValue>;
type BatchOutcome = Rc<Result<HashMap<String, ItemResult>, Error>>;
type SharedBatch = Shared<LocalBoxFuture<'static, BatchOutcome>>;

#[derive(Clone)]
enum Slot {
    /// The item went out; the shared future resolves with the whole
    /// batch's outcome.
    Waiting(SharedBatch),
    /// The item was filtered out as a pipelined or prefixed chain. Its
    /// future never resolves, but it still drives the batch that
    /// consumed it, so the round-trip happens even if only the absorbed
    /// handle is awaited.
    Absorbed(Option<SharedBatch>),
}

struct QueuedItem {
    id: String,
    inner: Rc<HandleInner>,
}

struct ClientInner {
    transport: Rc<dyn Transport>,
    client_id: Option<String>,
    queue: RefCell<Vec<QueuedItem>>,
    slots: RefCell<HashMap<String, Slot>>,
    next_item: Cell<u64>,
    next_ref: Cell<u64>,
    closed: Cell<bool>,
}

/// A client for a remote host object. Cheaply cloneable; all clones
/// share one operation queue and one transport.
#[derive(Clone)]
pub struct Client {
    inner: Rc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Client").finish()
    }
}

impl Client {
    /// Create a client over the given transport with default settings.
    pub fn new<T: Transport>(transport: T) -> Client {
        Client::builder().build(transport)
    }

    /// Configure and build a [`Client`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The handle standing for the host root itself.
    pub fn root(&self) -> Handle {
        Handle::root(self.clone())
    }

    /// Select a member of the host root.
    pub fn get(&self, key: impl Into<farcall_core::Key>) -> Handle {
        self.root().get(key)
    }

    /// Invoke a method of the host root. Shorthand for
    /// `root().call_method(name, args)`.
    pub fn call(&self, name: impl Into<farcall_core::Key>, args: Vec<CallArg>) -> Handle {
        self.root().call_method(name, args)
    }

    /// The client id advertised to stateful transports, if any.
    pub fn client_id(&self) -> Option<&str> {
        self.inner.client_id.as_deref()
    }

    /// Establish the transport connection eagerly. Stateless transports
    /// treat this as a no-op; otherwise the first batch connects lazily.
    pub async fn connect(&self) -> Result<(), Error> {
        self.inner.transport.connect().await
    }

    /// Whether the underlying transport considers itself connected.
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Ask a stateful transport to hold batches across reconnects
    /// instead of failing fast. No-op on HTTP.
    pub fn set_keep_alive(&self, enabled: bool) {
        self.inner.transport.set_keep_alive(enabled);
    }

    /// Fire-and-forget messages published by the server for this
    /// client's id, as a stream of decoded payloads. Registering a new
    /// stream replaces the previous downstream consumer.
    pub fn downstream(&self) -> DownstreamMessages {
        let (tx, rx) = futures::channel::mpsc::unbounded::<String>();
        self.inner
            .transport
            .set_downstream_handler(Box::new(move |payload| {
                let _ = tx.unbounded_send(payload);
            }));
        DownstreamMessages { rx }
    }

    /// Dispose of the client: close the transport and reject whatever is
    /// still outstanding with a disconnect error. Further operations
    /// fail with [`Error::Closed`].
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.closed.set(true);
        self.inner.transport.disconnect().await
    }

    // -----------------------------------------------------------------
    // Batcher
    // -----------------------------------------------------------------

    pub(crate) fn enqueue(&self, inner: Rc<HandleInner>) -> String {
        let id = self.inner.next_item.get();
        self.inner.next_item.set(id + 1);
        let id = id.to_string();
        trace!(item = %id, "queueing operation chain");
        self.inner.queue.borrow_mut().push(QueuedItem {
            id: id.clone(),
            inner,
        });
        id
    }

    fn next_ref_id(&self) -> String {
        let n = self.inner.next_ref.get();
        self.inner.next_ref.set(n + 1);
        format!("r{n}")
    }

    /// Wait for the outcome of a queued item, draining the queue first
    /// if it has not gone out yet.
    pub(crate) async fn await_item(&self, id: String) -> Result<Value, Error> {
        loop {
            let slot = self.inner.slots.borrow().get(&id).cloned();
            match slot {
                None => {
                    self.drain();
                    // A second miss means the id was never queued here.
                    if !self.inner.slots.borrow().contains_key(&id) {
                        return Err(Error::MissingReply(id));
                    }
                }
                Some(Slot::Absorbed(batch)) => {
                    // The chain's result was consumed server-side as an
                    // argument (or subsumed by a longer chain); there is
                    // nothing to resolve with, but the consuming batch
                    // still wants driving.
                    if let Some(batch) = batch {
                        let _ = batch.await;
                    }
                    return futures::future::pending().await;
                }
                Some(Slot::Waiting(shared)) => {
                    let outcome = shared.await;
                    self.inner.slots.borrow_mut().remove(&id);
                    return match &*outcome {
                        Err(e) => Err(e.clone()),
                        Ok(map) => match map.get(&id) {
                            Some(Ok(v)) => Ok(v.clone()),
                            Some(Err(ev)) => Err(Error::Remote(ev.clone())),
                            None => Err(Error::MissingReply(id)),
                        },
                    };
                }
            }
        }
    }

    /// Drain the queue into a single batch request.
    fn drain(&self) {
        let items: Vec<QueuedItem> = self.inner.queue.borrow_mut().drain(..).collect();
        if items.is_empty() {
            return;
        }
        debug!(queued = items.len(), "draining operation queue");

        // Pass 1: materialise argument handles into nested-operation
        // markers, noting which queued chains got consumed that way.
        let mut ctx = MaterialiseCtx {
            pipelined: HashSet::new(),
            defined: HashSet::new(),
        };
        let wire: Vec<OpChain> = items
            .iter()
            .map(|item| self.materialise(&item.inner.chain, &mut ctx))
            .collect();

        // Pass 2: pipelined chains do not travel as top-level items.
        let mut absorbed_ids: Vec<String> = Vec::new();
        let mut kept: Vec<(QueuedItem, OpChain)> = Vec::with_capacity(items.len());
        for (item, chain) in items.into_iter().zip(wire) {
            if ctx.pipelined.contains(&(Rc::as_ptr(&item.inner) as usize)) {
                debug!(item = %item.id, "absorbed as pipelined argument");
                absorbed_ids.push(item.id);
            } else {
                kept.push((item, chain));
            }
        }

        // Pass 3: a chain that is a strict lineage ancestor of another
        // queued chain is subsumed by it.
        let mut absorbed = vec![false; kept.len()];
        for i in 0..kept.len() {
            for j in 0..kept.len() {
                if i != j
                    && !absorbed[j]
                    && is_strict_ancestor(&kept[i].0.inner, &kept[j].0.inner)
                {
                    debug!(item = %kept[i].0.id, subsumed_by = %kept[j].0.id, "absorbed as prefix");
                    absorbed[i] = true;
                    break;
                }
            }
        }
        let mut emitted: Vec<(QueuedItem, OpChain)> = Vec::with_capacity(kept.len());
        for (keep, flag) in kept.into_iter().zip(absorbed) {
            if flag {
                absorbed_ids.push(keep.0.id);
            } else {
                emitted.push(keep);
            }
        }
        if emitted.is_empty() {
            let mut slots = self.inner.slots.borrow_mut();
            for id in absorbed_ids {
                slots.insert(id, Slot::Absorbed(None));
            }
            return;
        }

        // Pass 4: emit one envelope and share its outcome with every
        // awaiting item.
        let request = BatchRequest {
            batch: emitted
                .iter()
                .map(|(item, chain)| BatchItem {
                    id: item.id.clone(),
                    operations: chain.clone(),
                })
                .collect(),
        };
        let shared = match codec::encode_request(&request) {
            Ok(encoded) => {
                diagnostics::record_batch(&encoded);
                self.send_batch(encoded)
            }
            Err(e) => {
                let outcome: BatchOutcome = Rc::new(Err(Error::codec(e)));
                futures::future::ready(outcome).boxed_local().shared()
            }
        };
        let mut slots = self.inner.slots.borrow_mut();
        for id in absorbed_ids {
            slots.insert(id, Slot::Absorbed(Some(shared.clone())));
        }
        for (item, _) in emitted {
            slots.insert(item.id, Slot::Waiting(shared.clone()));
        }
    }

    fn send_batch(&self, encoded: String) -> SharedBatch {
        let transport = self.inner.transport.clone();
        let closed = self.inner.closed.get();
        let fut = async move {
            if closed {
                return Rc::new(Err(Error::Closed));
            }
            let res: Result<HashMap<String, ItemResult>, Error> = async {
                let body = transport.execute(&encoded).await?;
                let response = codec::decode_response(&body).map_err(Error::codec)?;
                let mut map = HashMap::with_capacity(response.batch.len());
                for reply in response.batch {
                    match reply {
                        BatchReply::Success { id, result } => {
                            map.insert(id, Ok(result));
                        }
                        BatchReply::Failure { id, error } => {
                            map.insert(id, Err(error_value_of(error)));
                        }
                    }
                }
                Ok(map)
            }
            .await;
            match &res {
                Ok(map) => trace!(replies = map.len(), "batch response correlated"),
                Err(e) => debug!(error = %e, "batch round-trip failed"),
            }
            Rc::new(res)
        };
        fut.boxed_local().shared()
    }

    /// Turn one recorded chain into its wire form, substituting handles
    /// in argument position. The first occurrence of each handle in this
    /// drain carries its (recursively materialised) chain; later
    /// occurrences alias it by ref id alone.
    fn materialise(&self, chain: &ClientChain, ctx: &mut MaterialiseCtx) -> OpChain {
        let ops = chain
            .ops
            .iter()
            .map(|op| match op {
                ClientOp::Get(key) => Op::Get { key: key.clone() },
                ClientOp::Apply(args) => Op::Apply {
                    args: args
                        .iter()
                        .map(|arg| match arg {
                            CallArg::Value(v) => v.clone(),
                            CallArg::Handle(h) => {
                                ctx.pipelined.insert(Rc::as_ptr(&h.inner) as usize);
                                let ref_id = h
                                    .inner
                                    .ref_id
                                    .get_or_init(|| self.next_ref_id())
                                    .clone();
                                if ctx.defined.insert(ref_id.clone()) {
                                    let nested = self.materialise(&h.inner.chain, ctx);
                                    Value::NestedOperation(NestedOperationMarker {
                                        ref_id,
                                        operation_chain: Some(nested),
                                    })
                                } else {
                                    Value::NestedOperation(NestedOperationMarker {
                                        ref_id,
                                        operation_chain: None,
                                    })
                                }
                            }
                        })
                        .collect(),
                },
            })
            .collect();
        OpChain::from_ops(ops)
    }
}

struct MaterialiseCtx {
    /// Handles consumed as arguments in this drain, by pointer.
    pipelined: HashSet<usize>,
    /// Ref ids whose defining marker has been emitted in this drain.
    defined: HashSet<String>,
}

/// Builds a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    client_id: Option<String>,
    downstream: Option<crate::transport::DownstreamHandler>,
    close: Option<crate::transport::CloseHandler>,
}

impl ClientBuilder {
    /// The id under which the server can address this client on the
    /// downstream channel. Stateful transports advertise it during the
    /// handshake.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Handle downstream payloads with a callback instead of consuming
    /// the [`Client::downstream`] stream. The callback receives the raw
    /// encoded payload.
    pub fn on_downstream(mut self, handler: crate::transport::DownstreamHandler) -> Self {
        self.downstream = Some(handler);
        self
    }

    /// Called when a stateful transport observes its connection close.
    pub fn on_close(mut self, handler: crate::transport::CloseHandler) -> Self {
        self.close = Some(handler);
        self
    }

    /// Build the client over the given transport.
    pub fn build<T: Transport>(self, transport: T) -> Client {
        if let Some(handler) = self.downstream {
            transport.set_downstream_handler(handler);
        }
        if let Some(handler) = self.close {
            transport.set_close_handler(handler);
        }
        Client {
            inner: Rc::new(ClientInner {
                transport: Rc::new(transport),
                client_id: self.client_id,
                queue: RefCell::new(Vec::new()),
                slots: RefCell::new(HashMap::new()),
                next_item: Cell::new(1),
                next_ref: Cell::new(0),
                closed: Cell::new(false),
            }),
        }
    }
}

/// A stream of decoded downstream payloads. Delivery is best-effort and
/// carries no reply correlation.
pub struct DownstreamMessages {
    rx: futures::channel::mpsc::UnboundedReceiver<String>,
}

impl DownstreamMessages {
    /// The next payload, if the channel is still open.
    pub async fn next(&mut self) -> Option<Result<Value, Error>> {
        futures::StreamExt::next(self).await
    }
}

impl Stream for DownstreamMessages {
    type Item = Result<Value, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let text = futures::ready!(Pin::new(&mut self.rx).poll_next(cx));
        Poll::Ready(text.map(|t| codec::decode_value(&t).map_err(Error::codec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_args;
    use crate::transport::TransportFuture;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use std::future::IntoFuture;

    /// Answers every request item with an incrementing integer, and
    /// counts round-trips.
    struct Scripted {
        calls: Rc<Cell<usize>>,
        respond: Box<dyn Fn(&str) -> Result<String, Error>>,
    }

    impl Transport for Scripted {
        fn execute<'a>(&'a self, body: &'a str) -> TransportFuture<'a, String> {
            self.calls.set(self.calls.get() + 1);
            let res = (self.respond)(body);
            Box::pin(async move { res })
        }

        fn set_keep_alive(&self, _enabled: bool) {}
    }

    /// Reply `success` with consecutive integers, in request order.
    fn counting_responder(body: &str) -> Result<String, Error> {
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        let items: Vec<serde_json::Value> = json["batch"]
            .as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::json!({
                    "id": item["id"],
                    "success": true,
                    "result": (i + 1) as f64,
                })
            })
            .collect();
        Ok(serde_json::json!({ "batch": items }).to_string())
    }

    fn counting_client() -> (Client, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let transport = Scripted {
            calls: calls.clone(),
            respond: Box::new(counting_responder),
        };
        (Client::new(transport), calls)
    }

    #[tokio::test]
    async fn operations_queued_together_share_one_round_trip() {
        let (client, calls) = counting_client();
        let a = client.call("increment", call_args![]);
        let b = client.call("increment", call_args![]);
        let c = client.call("increment", call_args![]);
        let (a, b, c) = futures::join!(a.into_future(), b.into_future(), c.into_future());
        assert_eq!(calls.get(), 1);
        assert_eq!(a.unwrap().as_f64(), Some(1.0));
        assert_eq!(b.unwrap().as_f64(), Some(2.0));
        assert_eq!(c.unwrap().as_f64(), Some(3.0));
    }

    #[tokio::test]
    async fn sequential_awaits_mean_sequential_batches() {
        let (client, calls) = counting_client();
        client.call("increment", call_args![]).await.unwrap();
        client.call("increment", call_args![]).await.unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn handle_arguments_are_pipelined_not_sent() {
        let (client, calls) = counting_client();
        diagnostics::capture(true);
        let sum = client.call(
            "add",
            call_args![
                client.call("increment", call_args![]),
                client.call("increment", call_args![])
            ],
        );
        sum.await.unwrap();
        assert_eq!(calls.get(), 1);

        let wire: serde_json::Value =
            serde_json::from_str(&diagnostics::last_batch().unwrap()).unwrap();
        diagnostics::capture(false);
        // Only the consuming chain travels as a top-level item.
        let items = wire["batch"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        let args = items[0]["operations"][1]["args"].as_array().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0]["isNestedOperation"], true);
        assert!(args[0]["operationChain"].is_array());
        assert!(args[1]["operationChain"].is_array());
    }

    #[tokio::test]
    async fn repeated_handle_arguments_alias_one_definer() {
        let (client, _calls) = counting_client();
        diagnostics::capture(true);
        let h = client.call("getObject", call_args![]);
        client.call("echo", call_args![&h, &h]).await.unwrap();

        let wire: serde_json::Value =
            serde_json::from_str(&diagnostics::last_batch().unwrap()).unwrap();
        diagnostics::capture(false);
        let items = wire["batch"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        let args = items[0]["operations"][1]["args"].as_array().unwrap();
        // Definer carries the chain; the alias shares the ref id only.
        assert!(args[0]["operationChain"].is_array());
        assert!(args[1].get("operationChain").is_none());
        assert_eq!(args[0]["refId"], args[1]["refId"]);
    }

    #[tokio::test]
    async fn ancestors_are_subsumed_by_longer_chains() {
        let (client, calls) = counting_client();
        diagnostics::capture(true);
        let obj = client.call("getObject", call_args![]);
        let value = obj.get("nested").call_method("getValue", call_args![]);
        let out = value.await.unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(out.as_f64(), Some(1.0));

        let wire: serde_json::Value =
            serde_json::from_str(&diagnostics::last_batch().unwrap()).unwrap();
        diagnostics::capture(false);
        // The intermediate getObject item was filtered out.
        let items = wire["batch"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["operations"].as_array().unwrap().len(), 5);

        // Its own future stays pending forever.
        let mut pending = Box::pin(obj.into_future());
        assert!(pending.as_mut().now_or_never().is_none());
    }

    #[tokio::test]
    async fn pipelined_futures_stay_pending() {
        let (client, _calls) = counting_client();
        let arg = client.call("increment", call_args![]);
        client.call("add", call_args![arg.clone(), 1]).await.unwrap();
        let mut pending = Box::pin(arg.into_future());
        assert!(pending.as_mut().now_or_never().is_none());
    }

    #[tokio::test]
    async fn transport_failure_rejects_every_awaiting_item() {
        let calls = Rc::new(Cell::new(0));
        let transport = Scripted {
            calls: calls.clone(),
            respond: Box::new(|_| Err(Error::Timeout)),
        };
        let client = Client::new(transport);
        let a = client.call("increment", call_args![]);
        let b = client.call("increment", call_args![]);
        let (a, b) = futures::join!(a.into_future(), b.into_future());
        assert_eq!(calls.get(), 1);
        assert_matches!(a, Err(Error::Timeout));
        assert_matches!(b, Err(Error::Timeout));
    }

    #[tokio::test]
    async fn per_item_failures_only_reject_their_caller() {
        let calls = Rc::new(Cell::new(0));
        let transport = Scripted {
            calls: calls.clone(),
            respond: Box::new(|body| {
                let json: serde_json::Value = serde_json::from_str(body).unwrap();
                let items = json["batch"].as_array().unwrap();
                let first = &items[0]["id"];
                let second = &items[1]["id"];
                Ok(serde_json::json!({ "batch": [
                    { "id": first, "success": true, "result": 7.0 },
                    { "id": second, "success": false, "error": {
                        "$error": { "name": "ValidationError", "message": "bad",
                                     "properties": { "field": "email" } }
                    }},
                ]})
                .to_string())
            }),
        };
        let client = Client::new(transport);
        let good = client.call("works", call_args![]);
        let bad = client.call("fails", call_args![]);
        let (good, bad) = futures::join!(good.into_future(), bad.into_future());
        assert_eq!(good.unwrap().as_f64(), Some(7.0));
        let err = bad.unwrap_err();
        let remote = err.as_remote().unwrap();
        assert_eq!(remote.name, "ValidationError");
        assert_eq!(remote.message, "bad");
        assert_eq!(remote.properties.get("field").unwrap().as_str(), Some("email"));
    }

    #[tokio::test]
    async fn awaiting_a_clone_twice_invokes_twice() {
        let (client, calls) = counting_client();
        let h = client.call("increment", call_args![]);
        let first = h.clone().await.unwrap();
        let second = h.await.unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(first.as_f64(), Some(1.0));
        assert_eq!(second.as_f64(), Some(1.0));
    }

    #[tokio::test]
    async fn closed_clients_reject_new_operations() {
        let (client, _calls) = counting_client();
        client.close().await.unwrap();
        let res = client.call("increment", call_args![]).await;
        assert_matches!(res, Err(Error::Closed));
    }
}
