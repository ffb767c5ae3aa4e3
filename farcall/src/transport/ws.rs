// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! WebSocket transport, based on [`tokio_tungstenite`].
//!
//! Batches travel as `{type, batch}` frames; the first item id of a
//! batch is its correlation key. Downstream frames are routed to the
//! registered handler. During the upgrade the client advertises the
//! `farcall` subprotocol plus `farcall.clientId.<id>` so the server can
//! address it on the downstream channel.
//!
//! Reconnection never replays in-flight batches: a lost connection
//! rejects everything pending and the caller re-issues if desired. With
//! keep-alive enabled, *new* batches issued while disconnected wait for
//! a reconnect with exponential backoff; otherwise they fail fast.

use super::{CloseHandler, CloseInfo, DownstreamHandler, Transport, TransportFuture};
use super::{call_url, message_tag, validate_url_is_secure};
use crate::error::Error;
use farcall_core::{CoreError, DOWNSTREAM_TYPE, WS_CLIENT_ID_PREFIX, WS_PROTOCOL};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

const RECONNECT_ATTEMPTS: u32 = 8;
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(100);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(5);

/// A stateful transport over a WebSocket.
pub struct WsTransport {
    shared: Arc<Shared>,
}

struct Shared {
    endpoint: String,
    protocols: String,
    tag: String,
    timeout: Duration,
    keep_alive: AtomicBool,
    connected: AtomicBool,
    ever_connected: AtomicBool,
    closed: AtomicBool,
    state: Mutex<ConnState>,
}

#[derive(Default)]
struct ConnState {
    writer: Option<mpsc::UnboundedSender<Message>>,
    pending: HashMap<String, oneshot::Sender<Result<String, String>>>,
    downstream: Option<DownstreamHandler>,
    close: Option<CloseHandler>,
}

impl WsTransport {
    /// Start building a transport for the given base URL, eg
    /// `wss://example.com`.
    pub fn builder(base_url: impl Into<String>) -> WsTransportBuilder {
        WsTransportBuilder {
            base_url: base_url.into(),
            prefix: "/__rpc".to_owned(),
            binding: "host".to_owned(),
            instance: "default".to_owned(),
            client_id: None,
            timeout: Duration::from_secs(30),
            keep_alive: false,
            allow_insecure: false,
        }
    }

    /// The endpoint URL the socket connects to.
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("endpoint", &self.shared.endpoint)
            .field("connected", &self.shared.connected.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builds a [`WsTransport`].
pub struct WsTransportBuilder {
    base_url: String,
    prefix: String,
    binding: String,
    instance: String,
    client_id: Option<String>,
    timeout: Duration,
    keep_alive: bool,
    allow_insecure: bool,
}

impl WsTransportBuilder {
    /// The endpoint prefix (default `/__rpc`). Also determines the frame
    /// tag: the prefix with its slashes removed.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The host binding name in the URL path.
    pub fn binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = binding.into();
        self
    }

    /// The host instance name in the URL path.
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// The client id advertised in the subprotocol list. Generated when
    /// not provided, so the downstream channel is addressable.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Per-batch timeout (default 30 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start with keep-alive enabled: batches issued while disconnected
    /// wait for a reconnect instead of failing fast.
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Permit plain `ws://` endpoints beyond localhost.
    pub fn allow_insecure(mut self) -> Self {
        self.allow_insecure = true;
        self
    }

    /// Build the transport. The socket is established lazily, on
    /// [`Transport::connect`] or the first batch.
    pub fn build(self) -> Result<WsTransport, Error> {
        if !self.allow_insecure {
            validate_url_is_secure(&self.base_url)?;
        }
        let client_id = self
            .client_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let protocols = format!("{WS_PROTOCOL}, {WS_CLIENT_ID_PREFIX}{client_id}");
        Ok(WsTransport {
            shared: Arc::new(Shared {
                endpoint: call_url(&self.base_url, &self.prefix, &self.binding, &self.instance),
                protocols,
                tag: message_tag(&self.prefix),
                timeout: self.timeout,
                keep_alive: AtomicBool::new(self.keep_alive),
                connected: AtomicBool::new(false),
                ever_connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                state: Mutex::new(ConnState::default()),
            }),
        })
    }
}

async fn establish(shared: &Arc<Shared>) -> Result<(), Error> {
    if shared.connected.load(Ordering::SeqCst) {
        return Ok(());
    }
    let mut request = shared
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(Error::transport)?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_str(&shared.protocols).map_err(Error::transport)?,
    );
    debug!(endpoint = %shared.endpoint, "connecting websocket");
    let (stream, _response) = connect_async(request).await.map_err(Error::transport)?;
    let (mut write, mut read) = stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    {
        let mut state = shared.state.lock().expect("websocket state poisoned");
        state.writer = Some(tx);
    }
    shared.connected.store(true, Ordering::SeqCst);
    shared.ever_connected.store(true, Ordering::SeqCst);

    // Writer half: forward frames until the channel or socket closes.
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write.send(message).await {
                warn!(error = %e, "websocket write failed");
                break;
            }
        }
    });

    // Reader half: correlate replies, route downstream frames, observe
    // the close.
    let reader_shared = shared.clone();
    tokio::spawn(async move {
        let mut close_info = CloseInfo {
            code: None,
            reason: String::new(),
        };
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => handle_frame(&reader_shared, &text),
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        close_info.code = Some(frame.code.into());
                        close_info.reason = frame.reason.into_owned();
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    close_info.reason = e.to_string();
                    break;
                }
            }
        }
        on_disconnect(&reader_shared, close_info);
    });

    Ok(())
}

fn handle_frame(shared: &Arc<Shared>, text: &str) {
    let Ok(mut json) = serde_json::from_str::<serde_json::Value>(text) else {
        warn!("dropping unparseable websocket frame");
        return;
    };
    let Some(obj) = json.as_object_mut() else {
        warn!("dropping non-object websocket frame");
        return;
    };
    let frame_type = obj
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned();

    if frame_type == DOWNSTREAM_TYPE {
        let payload = obj.get("payload").cloned().unwrap_or(serde_json::Value::Null);
        let state = shared.state.lock().expect("websocket state poisoned");
        if let Some(handler) = &state.downstream {
            handler(payload.to_string());
        } else {
            trace!("downstream frame dropped: no handler registered");
        }
        return;
    }

    if frame_type != shared.tag {
        warn!(tag = %frame_type, "dropping frame with unknown tag");
        return;
    }

    // Correlation key: the first item id of the batch.
    let first_id = obj
        .get("batch")
        .and_then(serde_json::Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("id"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);

    obj.remove("type");
    let body = serde_json::Value::Object(obj.clone()).to_string();

    let Some(first_id) = first_id else {
        warn!("dropping batch frame without item ids");
        return;
    };
    let sender = {
        let mut state = shared.state.lock().expect("websocket state poisoned");
        state.pending.remove(&first_id)
    };
    match sender {
        Some(tx) => {
            let _ = tx.send(Ok(body));
        }
        None => warn!(batch = %first_id, "no caller waiting for batch reply"),
    }
}

fn on_disconnect(shared: &Arc<Shared>, info: CloseInfo) {
    shared.connected.store(false, Ordering::SeqCst);
    // Take what we need out of the lock before touching user callbacks.
    let (pending, close) = {
        let mut state = shared.state.lock().expect("websocket state poisoned");
        state.writer = None;
        let pending: Vec<_> = state.pending.drain().collect();
        (pending, state.close.take())
    };
    debug!(
        rejected = pending.len(),
        code = ?info.code,
        "websocket disconnected; rejecting in-flight batches"
    );
    for (_, tx) in pending {
        let _ = tx.send(Err(format!("connection lost: {}", info.reason)));
    }
    if let Some(handler) = close {
        handler(info);
        // Keep the handler registered for subsequent connections.
        let mut state = shared.state.lock().expect("websocket state poisoned");
        state.close.get_or_insert(handler);
    }
}

async fn reconnect_with_backoff(shared: &Arc<Shared>) -> Result<(), Error> {
    let mut delay = RECONNECT_BASE_DELAY;
    for attempt in 1..=RECONNECT_ATTEMPTS {
        match establish(shared).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(attempt, error = %e, "websocket reconnect failed");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RECONNECT_MAX_DELAY);
            }
        }
    }
    Err(Error::Disconnected(
        "websocket reconnect attempts exhausted".into(),
    ))
}

impl Transport for WsTransport {
    fn execute<'a>(&'a self, body: &'a str) -> TransportFuture<'a, String> {
        Box::pin(async move {
            let shared = &self.shared;
            if shared.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            if !shared.connected.load(Ordering::SeqCst) {
                if !shared.ever_connected.load(Ordering::SeqCst) {
                    establish(shared).await?;
                } else if shared.keep_alive.load(Ordering::SeqCst) {
                    reconnect_with_backoff(shared).await?;
                } else {
                    return Err(Error::Disconnected("websocket is not connected".into()));
                }
            }

            let mut json: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| Error::codec(CoreError::from(e)))?;
            let first_id = json
                .get("batch")
                .and_then(serde_json::Value::as_array)
                .and_then(|items| items.first())
                .and_then(|item| item.get("id"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
                .ok_or(Error::MissingReply("batch without items".into()))?;
            if let Some(obj) = json.as_object_mut() {
                obj.insert(
                    "type".to_owned(),
                    serde_json::Value::String(shared.tag.clone()),
                );
            }
            let frame = json.to_string();

            let (tx, rx) = oneshot::channel();
            {
                let mut state = shared.state.lock().expect("websocket state poisoned");
                let Some(writer) = state.writer.clone() else {
                    return Err(Error::Disconnected("websocket is not connected".into()));
                };
                state.pending.insert(first_id.clone(), tx);
                if writer.send(Message::Text(frame)).is_err() {
                    state.pending.remove(&first_id);
                    return Err(Error::Disconnected("websocket writer is gone".into()));
                }
            }
            trace!(batch = %first_id, "batch frame sent");

            match tokio::time::timeout(shared.timeout, rx).await {
                Err(_elapsed) => {
                    let mut state = shared.state.lock().expect("websocket state poisoned");
                    state.pending.remove(&first_id);
                    Err(Error::Timeout)
                }
                Ok(Err(_cancelled)) => {
                    Err(Error::Disconnected("connection closed".into()))
                }
                Ok(Ok(Ok(body))) => Ok(body),
                Ok(Ok(Err(reason))) => Err(Error::Disconnected(reason)),
            }
        })
    }

    fn connect<'a>(&'a self) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            establish(&self.shared).await
        })
    }

    fn disconnect<'a>(&'a self) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.shared.closed.store(true, Ordering::SeqCst);
            let writer = {
                let state = self.shared.state.lock().expect("websocket state poisoned");
                state.writer.clone()
            };
            if let Some(writer) = writer {
                let _ = writer.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client closed".into(),
                })));
            }
            on_disconnect(
                &self.shared,
                CloseInfo {
                    code: Some(farcall_core::CLOSE_NORMAL),
                    reason: "client closed".into(),
                },
            );
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn set_downstream_handler(&self, handler: DownstreamHandler) {
        let mut state = self.shared.state.lock().expect("websocket state poisoned");
        state.downstream = Some(handler);
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        let mut state = self.shared.state.lock().expect("websocket state poisoned");
        state.close = Some(handler);
    }

    fn set_keep_alive(&self, enabled: bool) {
        self.shared.keep_alive.store(enabled, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn insecure_urls_are_rejected_unless_opted_into() {
        let err = WsTransport::builder("ws://example.com").build().unwrap_err();
        assert_matches!(err, Error::InsecureUrl(_));
        assert!(WsTransport::builder("ws://127.0.0.1:8787").build().is_ok());
    }

    #[test]
    fn the_endpoint_and_protocols_follow_the_handshake_shape() {
        let transport = WsTransport::builder("wss://example.com")
            .prefix("/rpc")
            .binding("counter")
            .instance("alpha")
            .client_id("abc")
            .build()
            .unwrap();
        assert_eq!(transport.endpoint(), "wss://example.com/rpc/counter/alpha/call");
        assert_eq!(transport.shared.tag, "rpc");
        assert_eq!(transport.shared.protocols, "farcall, farcall.clientId.abc");
        assert!(!transport.is_connected());
    }
}
