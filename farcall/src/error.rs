// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Types representing the errors that can be returned.

use farcall_core::{CoreError, ErrorValue, Value};
use std::sync::Arc;

/// The error returned from awaiting remote operations.
///
/// `Remote` carries a per-item failure with the thrown shape preserved
/// (name, message, own properties); everything else is a batch-level
/// fault that rejects every item awaiting the same round-trip.
// Dev note: the error is cheaply cloneable because a single transport
// failure is distributed to every caller awaiting that batch.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The remote chain failed; the original error shape is preserved.
    #[error("remote call failed: {0}")]
    Remote(ErrorValue),
    /// An error coming from the underlying transport.
    #[error("transport error: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync + 'static>),
    /// A wire envelope could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(Arc<CoreError>),
    /// The batch round-trip timed out.
    #[error("request timed out")]
    Timeout,
    /// The connection was lost before the batch completed.
    #[error("connection lost: {0}")]
    Disconnected(String),
    /// The client was closed; no further operations are accepted.
    #[error("client is closed")]
    Closed,
    /// The requested URL is insecure.
    #[error("insecure URL: {0}")]
    InsecureUrl(String),
    /// The server replied to the batch but not to this item.
    #[error("no reply for batch item {0}")]
    MissingReply(String),
}

impl Error {
    /// Wrap an arbitrary transport fault.
    pub fn transport<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
        Error::Transport(Arc::new(err))
    }

    /// Wrap a codec fault.
    pub fn codec(err: CoreError) -> Error {
        Error::Codec(Arc::new(err))
    }

    /// The remote error value, if this is a per-item failure.
    pub fn as_remote(&self) -> Option<&ErrorValue> {
        match self {
            Error::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// Convert a wire error value (whatever shape the host threw) into an
/// [`ErrorValue`]. Non-error thrown values are wrapped, keeping the
/// original under a `value` property.
pub(crate) fn error_value_of(value: Value) -> ErrorValue {
    match &value {
        Value::Error(e) => e.borrow().clone(),
        Value::String(s) => ErrorValue::error(s.clone()),
        _ => ErrorValue::error("remote operation failed").with_property("value", value),
    }
}
