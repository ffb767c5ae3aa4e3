// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! # Farcall-core
//!
//! The wire layer shared by the farcall client and server: the operation
//! and chain types, the structured-clone value grammar, batch envelopes,
//! validation caps and the codec that moves all of it as JSON text.

pub mod batch;
pub mod codec;
mod error;
pub mod limits;
pub mod ops;
pub mod value;

pub use batch::{
    BatchItem, BatchReply, BatchRequest, BatchResponse, CLOSE_FAILURE, CLOSE_NORMAL,
    DOWNSTREAM_TYPE, PARSE_ERROR_ID, WS_CLIENT_ID_PREFIX, WS_PROTOCOL,
};
pub use error::{CoreError, ErrorValue};
pub use limits::Limits;
pub use ops::{Key, Op, OpChain};
pub use value::{
    HeadersValue, HttpRequestValue, HttpResponseValue, NestedOperationMarker, RegExpValue,
    RemoteFunctionMarker, TypedArrayKind, TypedArrayValue, Value,
};
