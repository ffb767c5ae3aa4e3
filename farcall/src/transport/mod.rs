// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The transport contract and the bundled transports.
//!
//! A [`Transport`] moves one encoded batch envelope to the server and
//! brings one encoded reply envelope back, atomically. The trait is
//! object-safe and works on already-encoded text, so implementations
//! never see value graphs — those stay on the client's thread.

use crate::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

crate::macros::cfg_http_transport! {
    mod http;
    pub use http::{HttpTransport, HttpTransportBuilder};
}

crate::macros::cfg_ws_transport! {
    mod ws;
    pub use ws::{WsTransport, WsTransportBuilder};
}

crate::macros::cfg_mock_transport! {
    mod mock;
    pub use mock::{IntoMockHandler, MockTransport};
}

/// A boxed future returned from [`Transport`] methods. Not `Send`: the
/// client core is single-threaded; transports that need background I/O
/// keep it behind channels.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + 'a>>;

/// Callback invoked with the raw encoded payload of each downstream
/// message. Called from the transport's I/O context, hence `Send`.
pub type DownstreamHandler = Box<dyn Fn(String) + Send + Sync + 'static>;

/// Why a stateful transport's connection went away.
#[derive(Debug, Clone)]
pub struct CloseInfo {
    /// The close code, when the peer sent one.
    pub code: Option<u16>,
    /// Human-readable reason, possibly empty.
    pub reason: String,
}

/// Callback invoked when a stateful transport observes a close.
pub type CloseHandler = Box<dyn Fn(CloseInfo) + Send + Sync + 'static>;

/// A low level, object-safe batch transport.
///
/// `execute` sends one encoded batch request and resolves with the
/// encoded batch response. It must be atomic: either the whole reply
/// envelope comes back parseable, or the call fails and the caller
/// rejects everything awaiting the batch. Per-item failures are carried
/// inside a successful envelope, not through `execute`'s error.
pub trait Transport: 'static {
    /// Send one encoded batch and receive the encoded reply.
    fn execute<'a>(&'a self, body: &'a str) -> TransportFuture<'a, String>;

    /// Establish the connection eagerly. Stateless transports no-op.
    fn connect<'a>(&'a self) -> TransportFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Tear the connection down. Stateless transports no-op.
    fn disconnect<'a>(&'a self) -> TransportFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Whether the transport considers itself connected.
    fn is_connected(&self) -> bool {
        true
    }

    /// Register the consumer of downstream messages. Stateless
    /// transports drop the handler.
    fn set_downstream_handler(&self, handler: DownstreamHandler) {
        let _ = handler;
    }

    /// Register the close observer. Stateless transports drop it.
    fn set_close_handler(&self, handler: CloseHandler) {
        let _ = handler;
    }

    /// Whether batches issued while disconnected should wait for a
    /// reconnect instead of failing fast. HTTP implements this as a
    /// no-op.
    fn set_keep_alive(&self, enabled: bool);
}

impl<T: Transport> Transport for Rc<T> {
    fn execute<'a>(&'a self, body: &'a str) -> TransportFuture<'a, String> {
        (**self).execute(body)
    }

    fn connect<'a>(&'a self) -> TransportFuture<'a, ()> {
        (**self).connect()
    }

    fn disconnect<'a>(&'a self) -> TransportFuture<'a, ()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn set_downstream_handler(&self, handler: DownstreamHandler) {
        (**self).set_downstream_handler(handler)
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        (**self).set_close_handler(handler)
    }

    fn set_keep_alive(&self, enabled: bool) {
        (**self).set_keep_alive(enabled)
    }
}

impl<T: Transport> Transport for Box<T> {
    fn execute<'a>(&'a self, body: &'a str) -> TransportFuture<'a, String> {
        (**self).execute(body)
    }

    fn connect<'a>(&'a self) -> TransportFuture<'a, ()> {
        (**self).connect()
    }

    fn disconnect<'a>(&'a self) -> TransportFuture<'a, ()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn set_downstream_handler(&self, handler: DownstreamHandler) {
        (**self).set_downstream_handler(handler)
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        (**self).set_close_handler(handler)
    }

    fn set_keep_alive(&self, enabled: bool) {
        (**self).set_keep_alive(enabled)
    }
}

/// A URL is considered secure if it uses a secure scheme ("https" or
/// "wss") or is referring to localhost.
///
/// Returns an error if the string could not be parsed into a URL.
pub fn url_is_secure(url: &str) -> Result<bool, Error> {
    let url = url::Url::parse(url).map_err(Error::transport)?;

    let secure_scheme = url.scheme() == "https" || url.scheme() == "wss";
    let is_localhost = url.host().is_some_and(|e| match e {
        url::Host::Domain(e) => e == "localhost",
        url::Host::Ipv4(e) => e.is_loopback(),
        url::Host::Ipv6(e) => e.is_loopback(),
    });

    Ok(secure_scheme || is_localhost)
}

/// Validates that the given URL is secure ("https" or "wss" scheme) or
/// is referring to localhost.
pub fn validate_url_is_secure(url: &str) -> Result<(), Error> {
    if !url_is_secure(url)? {
        Err(Error::InsecureUrl(url.into()))
    } else {
        Ok(())
    }
}

/// Join `{base}{prefix}/{binding}/{instance}/call` without doubled
/// slashes.
pub(crate) fn call_url(base: &str, prefix: &str, binding: &str, instance: &str) -> String {
    let base = base.trim_end_matches('/');
    let prefix = prefix.trim_matches('/');
    format!("{base}/{prefix}/{binding}/{instance}/call")
}

/// The message tag used in stateful-transport frames: the endpoint
/// prefix with its slashes removed.
pub(crate) fn message_tag(prefix: &str) -> String {
    prefix.replace('/', "")
}
