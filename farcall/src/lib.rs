// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! # Farcall
//!
//! A transparent RPC client for stateful remote objects. Expressions
//! against a remote host are recorded as operation chains, coalesced
//! into single round-trips, and executed server-side with results coming
//! back at full fidelity — callable members included, as reinvocable
//! [`RemoteValue::Function`] handles.
//!
//! ```rust,ignore
//! let transport = HttpTransport::builder("https://example.com")
//!     .binding("counter")
//!     .instance("alpha")
//!     .build()?;
//! let client = Client::new(transport);
//!
//! // One round-trip for all three:
//! let (a, b, c) = futures::join!(
//!     client.call("increment", call_args![]),
//!     client.call("increment", call_args![]),
//!     client.call("increment", call_args![]),
//! );
//!
//! // Pipelining: increment's result is substituted server-side, in the
//! // same round-trip as the add.
//! let sum = client
//!     .call("add", call_args![client.call("increment", call_args![]), 10])
//!     .await?;
//! ```
//!
//! Operations queued together before the first await travel in one
//! batch. A handle passed as an argument never produces its own
//! round-trip: the server computes it once and substitutes the result
//! (pipelining), with repeated uses collapsing into aliases.

mod macros;

mod chain;
mod client;
mod error;
mod handle;
mod remote_value;
mod unmarshal;

pub mod diagnostics;
pub mod transport;

pub use client::{Client, ClientBuilder, DownstreamMessages};
pub use error::Error;
pub use handle::{CallArg, Handle, ResultFuture};
pub use remote_value::{RemoteFunction, RemoteValue};
pub use transport::Transport;

// Re-export the wire layer: users construct arguments and inspect
// results in terms of these types.
pub use farcall_core as core;
pub use farcall_core::{ErrorValue, Key, Value};
