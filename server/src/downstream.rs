// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The downstream registry: fire-and-forget server-to-client messages,
//! keyed by the id each client advertised at connection time.
//!
//! Delivery is best-effort. A publish to an id with no live connection
//! is dropped, not queued; there is no reply correlation.

use farcall_core::{CoreError, Value, codec};
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Routes downstream frames to connected clients.
#[derive(Default)]
pub struct DownstreamRegistry {
    sinks: RefCell<HashMap<String, UnboundedSender<String>>>,
}

impl DownstreamRegistry {
    /// An empty registry.
    pub fn new() -> DownstreamRegistry {
        DownstreamRegistry::default()
    }

    /// Register a client connection. The returned receiver yields
    /// encoded frames ready to write to the client's socket. Registering
    /// the same id again replaces the previous connection.
    pub fn register(&self, client_id: impl Into<String>) -> UnboundedReceiver<String> {
        let (tx, rx) = unbounded();
        let client_id = client_id.into();
        debug!(client = %client_id, "downstream client registered");
        self.sinks.borrow_mut().insert(client_id, tx);
        rx
    }

    /// Drop a client connection.
    pub fn unregister(&self, client_id: &str) {
        if self.sinks.borrow_mut().remove(client_id).is_some() {
            debug!(client = %client_id, "downstream client unregistered");
        }
    }

    /// Publish a payload to one client. Returns whether a live
    /// connection accepted it; `false` means it was dropped.
    pub fn publish(&self, client_id: &str, payload: &Value) -> Result<bool, CoreError> {
        let frame = codec::encode_downstream_frame(payload)?;
        let mut sinks = self.sinks.borrow_mut();
        match sinks.get(client_id) {
            Some(sink) => {
                if sink.unbounded_send(frame).is_ok() {
                    trace!(client = %client_id, "downstream payload sent");
                    Ok(true)
                } else {
                    // The connection went away; forget the sink.
                    sinks.remove(client_id);
                    debug!(client = %client_id, "downstream payload dropped: connection gone");
                    Ok(false)
                }
            }
            None => {
                debug!(client = %client_id, "downstream payload dropped: client not connected");
                Ok(false)
            }
        }
    }

    /// Number of currently registered connections.
    pub fn connected(&self) -> usize {
        self.sinks.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_to_absent_clients_is_dropped() {
        let registry = DownstreamRegistry::new();
        assert!(!registry.publish("ghost", &Value::from("hi")).unwrap());
    }

    #[test]
    fn registered_clients_receive_frames() {
        let registry = DownstreamRegistry::new();
        let mut rx = registry.register("abc");
        assert!(registry.publish("abc", &Value::from("hi")).unwrap());
        let frame = rx.try_next().unwrap().unwrap();
        assert!(frame.contains("downstream"));
        registry.unregister("abc");
        assert!(!registry.publish("abc", &Value::from("hi")).unwrap());
    }
}
