// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! This module exposes a [`MockTransport`], which is useful for testing.

use super::{Transport, TransportFuture};
use crate::error::Error;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::future::Future;

type HandlerFn = Box<dyn Fn(String) -> LocalBoxFuture<'static, Result<String, Error>> + 'static>;

/// A transport that answers batches programmatically. Useful for testing
/// the client without a server or for looping batches straight into an
/// in-process dispatcher.
pub struct MockTransport {
    handler: HandlerFn,
}

impl MockTransport {
    /// Create a [`MockTransport`] from a function taking the encoded
    /// request envelope and returning the encoded response envelope.
    /// Both plain and async functions are accepted.
    pub fn from_handler<H, A>(handler: H) -> MockTransport
    where
        H: IntoMockHandler<A>,
    {
        MockTransport {
            handler: handler.into_mock_handler(),
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MockTransport").finish()
    }
}

impl Transport for MockTransport {
    fn execute<'a>(&'a self, body: &'a str) -> TransportFuture<'a, String> {
        (self.handler)(body.to_owned())
    }

    fn set_keep_alive(&self, _enabled: bool) {}
}

/// Anything that is a valid mock handler implements this trait.
pub trait IntoMockHandler<A> {
    /// Convert self into a handler function.
    fn into_mock_handler(self) -> HandlerFn;
}

/// Marker type for sync handlers.
pub enum SyncHandler {}

impl<F> IntoMockHandler<SyncHandler> for F
where
    F: Fn(String) -> Result<String, Error> + 'static,
{
    fn into_mock_handler(self) -> HandlerFn {
        Box::new(move |body: String| {
            let res = self(body);
            async move { res }.boxed_local()
        })
    }
}

/// Marker type for async handlers.
pub enum AsyncHandler {}

impl<F, Fut> IntoMockHandler<AsyncHandler> for F
where
    F: Fn(String) -> Fut + 'static,
    Fut: Future<Output = Result<String, Error>> + 'static,
{
    fn into_mock_handler(self) -> HandlerFn {
        Box::new(move |body: String| self(body).boxed_local())
    }
}
