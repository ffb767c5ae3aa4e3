// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Batch envelopes: the request and response shapes that travel between
//! client and server, plus the synthetic parse-error reply.

use crate::error::ErrorValue;
use crate::ops::OpChain;
use crate::value::Value;

/// The id used for the single synthetic reply to an unreadable request.
pub const PARSE_ERROR_ID: &str = "parse-error";

/// The frame tag used for fire-and-forget server-to-client messages.
pub const DOWNSTREAM_TYPE: &str = "downstream";

/// The subprotocol advertised and accepted during a WebSocket upgrade.
pub const WS_PROTOCOL: &str = "farcall";

/// The subprotocol prefix under which a client advertises its id during
/// the upgrade, eg `farcall.clientId.<id>`.
pub const WS_CLIENT_ID_PREFIX: &str = "farcall.clientId.";

/// WebSocket close code for a normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code for a failure to connect or serve.
pub const CLOSE_FAILURE: u16 = 1011;

/// One operation chain queued for execution, with its correlation id.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Correlation id, opaque and unique within the batch.
    pub id: String,
    /// The chain to execute against the host root.
    pub operations: OpChain,
}

/// A batch of chains to execute in order.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    /// The queued items, in enqueue order.
    pub batch: Vec<BatchItem>,
}

/// The outcome of one batch item. Per-item outcomes are independent; one
/// failing item never suppresses its siblings.
#[derive(Debug, Clone)]
pub enum BatchReply {
    /// The chain executed; `result` is the marshalled value.
    Success {
        /// Correlation id of the originating item.
        id: String,
        /// The marshalled result.
        result: Value,
    },
    /// The chain failed; `error` preserves the thrown shape.
    Failure {
        /// Correlation id of the originating item.
        id: String,
        /// The error value, usually [`Value::Error`].
        error: Value,
    },
}

impl BatchReply {
    /// The correlation id of this reply.
    pub fn id(&self) -> &str {
        match self {
            BatchReply::Success { id, .. } | BatchReply::Failure { id, .. } => id,
        }
    }

    /// Whether this reply is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, BatchReply::Success { .. })
    }
}

/// The reply envelope: one reply per non-filtered request item.
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    /// The replies, in server execution order.
    pub batch: Vec<BatchReply>,
}

impl BatchResponse {
    /// Whether every item in the batch succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.batch.iter().all(BatchReply::is_success)
    }

    /// The synthetic single-item response for an unreadable request.
    pub fn parse_error(error: ErrorValue) -> BatchResponse {
        BatchResponse {
            batch: vec![BatchReply::Failure {
                id: PARSE_ERROR_ID.to_owned(),
                error: Value::error(error),
            }],
        }
    }
}
