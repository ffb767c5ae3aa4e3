// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Test plumbing: the loopback transport and the shared test host.

use farcall::transport::{DownstreamHandler, MockTransport, Transport, TransportFuture};
use farcall::{Client, Error};
use farcall_core::{ErrorValue, Value};
use farcall_server::{HostObject, HostValue, RpcService, ServiceConfig};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A transport that feeds batches straight into an in-process
/// [`RpcService`], counting round-trips.
#[derive(Clone)]
pub struct Loopback {
    service: Rc<RpcService>,
    calls: Rc<Cell<usize>>,
    downstream: Rc<RefCell<Option<DownstreamHandler>>>,
}

impl Loopback {
    pub fn new(service: Rc<RpcService>) -> Loopback {
        Loopback {
            service,
            calls: Rc::new(Cell::new(0)),
            downstream: Rc::new(RefCell::new(None)),
        }
    }

    /// How many batches have crossed this transport.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Simulate a downstream frame arriving on the socket.
    pub fn deliver(&self, frame: &str) {
        let json: serde_json::Value = serde_json::from_str(frame).expect("frame is JSON");
        let payload = json.get("payload").cloned().unwrap_or(serde_json::Value::Null);
        if let Some(handler) = &*self.downstream.borrow() {
            handler(payload.to_string());
        }
    }
}

impl Transport for Loopback {
    fn execute<'a>(&'a self, body: &'a str) -> TransportFuture<'a, String> {
        self.calls.set(self.calls.get() + 1);
        Box::pin(async move {
            let reply = self.service.handle_call(body).await;
            // 200, 400 and 500 all carry a per-item envelope.
            Ok(reply.body)
        })
    }

    fn set_downstream_handler(&self, handler: DownstreamHandler) {
        *self.downstream.borrow_mut() = Some(handler);
    }

    fn set_keep_alive(&self, _enabled: bool) {}
}

/// A transport that always fails, for batch-level error paths.
pub fn unreachable_transport() -> MockTransport {
    MockTransport::from_handler(|_body: String| {
        Err::<String, _>(Error::Disconnected("unreachable host".into()))
    })
}

/// Log to stderr when `RUST_LOG` asks for it.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// The shared test host:
///
/// - `increment()` returns 1, 2, 3, … per host instance
/// - `add(x, y)` returns `x + y`
/// - `echo(...)` returns its arguments as an array
/// - `echoOne(x)` returns its first argument
/// - `getObject()` returns `{ value: 42, nested: { value: 42, getValue() } }`
/// - `getCycle()` returns a graph where `g.a.b` is `g` again
/// - `throwIt()` throws a `ValidationError` with a `field` property
pub fn test_host() -> HostValue {
    let count = Rc::new(Cell::new(0i64));
    HostObject::new()
        .method("increment", move |_, _| {
            let count = count.clone();
            async move {
                count.set(count.get() + 1);
                Ok(HostValue::data(count.get() as f64))
            }
        })
        .method("add", |_, args| async move {
            let mut nums = args
                .iter()
                .filter_map(|a| a.as_data().and_then(Value::as_f64));
            match (nums.next(), nums.next()) {
                (Some(x), Some(y)) => Ok(HostValue::data(x + y)),
                _ => Err(ErrorValue::type_error("add wants two numbers")),
            }
        })
        .method("echo", |_, args| async move { Ok(HostValue::array(args)) })
        .method("echoOne", |_, args| async move {
            Ok(args.into_iter().next().unwrap_or(HostValue::undefined()))
        })
        .method("getObject", |_, _| async move {
            Ok(HostObject::new()
                .value("value", 42)
                .child(
                    "nested",
                    HostObject::new()
                        .value("value", 42)
                        .method("getValue", |recv, _| async move {
                            Ok(recv
                                .member("value")
                                .unwrap_or(HostValue::undefined()))
                        }),
                )
                .build())
        })
        .method("getCycle", |_, _| async move {
            let root = Value::empty_object();
            let a = Value::empty_object();
            if let (Value::Object(r), Value::Object(ao)) = (&root, &a) {
                ao.borrow_mut().insert("b".into(), root.clone());
                r.borrow_mut().insert("a".into(), Value::Object(ao.clone()));
            }
            Ok(HostValue::Data(root))
        })
        .method("throwIt", |_, _| async move {
            Err::<HostValue, _>(
                ErrorValue::new("ValidationError", "bad").with_property("field", "email"),
            )
        })
        .build()
}

/// A fresh client over a fresh host, with the loopback handle for
/// round-trip assertions.
pub fn client_and_loopback() -> (Client, Loopback) {
    client_with_config(ServiceConfig::default())
}

pub fn client_with_config(config: ServiceConfig) -> (Client, Loopback) {
    let service = Rc::new(RpcService::with_config(test_host(), config));
    let loopback = Loopback::new(service);
    (Client::new(loopback.clone()), loopback)
}

/// A client plus its service, for downstream tests.
pub fn client_with_service() -> (Client, Loopback, Rc<RpcService>) {
    let service = Rc::new(RpcService::new(test_host()));
    let loopback = Loopback::new(service.clone());
    (Client::new(loopback.clone()), loopback, service)
}
