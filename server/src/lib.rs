// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! # Farcall-server
//!
//! The server side of the farcall RPC fabric: build a live host object,
//! hand incoming batch bodies to an [`RpcService`], and the dispatcher
//! walks each operation chain against it — validating caps, resolving
//! pipelined arguments, preserving receiver identity for method calls,
//! and marshalling results so callable members come back as reinvocable
//! handles on the client.
//!
//! Concrete byte transports are deliberately out of scope: any HTTP
//! framework or WebSocket acceptor can feed [`RpcService::handle_call`]
//! and [`RpcService::handle_message`].

pub mod dispatcher;
pub mod downstream;
pub mod host;
pub mod marshal;
pub mod service;

pub use dispatcher::Dispatcher;
pub use downstream::DownstreamRegistry;
pub use host::{HostFunction, HostGetter, HostObject, HostValue};
pub use service::{
    CLOSE_FAILURE, CLOSE_NORMAL, CallTarget, HttpReply, PROTOCOL, RpcService, ServiceConfig,
    accept_protocol, client_id_from_protocols,
};

// Re-export the wire layer: host methods receive and return these types.
pub use farcall_core as core;
pub use farcall_core::{ErrorValue, Limits, Value};
