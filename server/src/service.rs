// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The transport-agnostic batch service.
//!
//! Concrete byte servers (an HTTP framework, a WebSocket acceptor) stay
//! outside this crate; they hand request bodies and socket frames to the
//! service and write back whatever it returns. The service owns the
//! status-code policy: 200 when every item succeeded, 500 when the
//! envelope is well-formed but something failed, 400 with a synthesised
//! `parse-error` envelope for unreadable requests.

use crate::dispatcher::Dispatcher;
use crate::downstream::DownstreamRegistry;
use crate::host::HostValue;
use farcall_core::{BatchResponse, ErrorValue, Limits, codec};
use tracing::{debug, warn};

/// The subprotocol accepted during a WebSocket upgrade.
pub const PROTOCOL: &str = farcall_core::WS_PROTOCOL;

/// Close code for a normal shutdown.
pub const CLOSE_NORMAL: u16 = farcall_core::CLOSE_NORMAL;

/// Close code integrators should use when an upgrade cannot be served.
pub const CLOSE_FAILURE: u16 = farcall_core::CLOSE_FAILURE;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// The endpoint prefix; also determines the frame tag used on
    /// stateful transports (the prefix with slashes removed).
    pub prefix: String,
    /// Per-chain validation caps.
    pub limits: Limits,
    /// Whether batches must run one at a time.
    pub serialize_batches: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            prefix: "/__rpc".to_owned(),
            limits: Limits::default(),
            serialize_batches: false,
        }
    }
}

/// A reply ready to write back over HTTP.
#[derive(Debug, Clone)]
pub struct HttpReply {
    /// Status code: 200, 500 or 400.
    pub status: u16,
    /// The encoded response envelope.
    pub body: String,
}

/// One host instance's RPC endpoint: dispatch plus framing policy.
pub struct RpcService {
    dispatcher: Dispatcher,
    config: ServiceConfig,
    downstream: DownstreamRegistry,
}

impl RpcService {
    /// A service over the given host root with default configuration.
    pub fn new(root: HostValue) -> RpcService {
        RpcService::with_config(root, ServiceConfig::default())
    }

    /// A service with explicit configuration.
    pub fn with_config(root: HostValue, config: ServiceConfig) -> RpcService {
        let dispatcher = Dispatcher::new(root)
            .with_limits(config.limits)
            .serialize_batches(config.serialize_batches);
        RpcService {
            dispatcher,
            config,
            downstream: DownstreamRegistry::new(),
        }
    }

    /// The configured endpoint prefix.
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// The frame tag used for batch traffic on stateful transports.
    pub fn message_tag(&self) -> String {
        self.config.prefix.replace('/', "")
    }

    /// The downstream registry for this endpoint.
    pub fn downstream(&self) -> &DownstreamRegistry {
        &self.downstream
    }

    /// Handle one HTTP call body, returning the status and reply body.
    pub async fn handle_call(&self, body: &str) -> HttpReply {
        match codec::decode_request(body) {
            Ok(request) => {
                let response = self.dispatcher.dispatch(request).await;
                let status = if response.all_succeeded() { 200 } else { 500 };
                HttpReply {
                    status,
                    body: encode_or_fallback(&response),
                }
            }
            Err(e) => {
                warn!(error = %e, "rejecting unreadable batch request");
                let response = BatchResponse::parse_error(ErrorValue::error(format!(
                    "unreadable batch request: {e}"
                )));
                HttpReply {
                    status: 400,
                    body: encode_or_fallback(&response),
                }
            }
        }
    }

    /// Handle one stateful-transport text frame. Batch frames produce a
    /// reply frame; anything unreadable produces a tagged parse-error
    /// frame so the client can still correlate per item.
    pub async fn handle_message(&self, text: &str) -> Option<String> {
        let tag = self.message_tag();
        match codec::decode_frame(&tag, text) {
            Ok(codec::Frame::Request(request)) => {
                let response = self.dispatcher.dispatch(request).await;
                match codec::encode_response_frame(&tag, &response) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        warn!(error = %e, "failed to encode response frame");
                        None
                    }
                }
            }
            Ok(codec::Frame::Response(_)) | Ok(codec::Frame::Downstream(_)) => {
                debug!("ignoring non-request frame");
                None
            }
            Err(e) => {
                warn!(error = %e, "rejecting unreadable frame");
                let response = BatchResponse::parse_error(ErrorValue::error(format!(
                    "unreadable batch frame: {e}"
                )));
                codec::encode_response_frame(&tag, &response).ok()
            }
        }
    }

    /// Whether `path` addresses this endpoint, and for which binding and
    /// instance. The expected shape is
    /// `{prefix}/{binding}/{instance}/call`.
    pub fn parse_call_path<'a>(&self, path: &'a str) -> Option<CallTarget<'a>> {
        let rest = path.strip_prefix(self.config.prefix.as_str())?;
        let rest = rest.strip_prefix('/')?;
        let mut segments = rest.split('/');
        let binding = segments.next()?;
        let instance = segments.next()?;
        match (segments.next(), segments.next()) {
            (Some("call"), None) => Some(CallTarget { binding, instance }),
            _ => None,
        }
    }
}

/// The binding and instance a call path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTarget<'a> {
    /// The host binding name.
    pub binding: &'a str,
    /// The host instance name.
    pub instance: &'a str,
}

/// Pick the subprotocol to accept a WebSocket upgrade with. Returns the
/// base [`PROTOCOL`] when the client offered it, and `None` when it did
/// not — in which case the upgrade should be refused (eg with
/// [`CLOSE_FAILURE`]).
pub fn accept_protocol<I, S>(protocols: I) -> Option<&'static str>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    protocols
        .into_iter()
        .any(|p| p.as_ref().trim() == PROTOCOL)
        .then_some(PROTOCOL)
}

/// Extract the client id from the subprotocols offered during a
/// WebSocket upgrade. Pairs with [`accept_protocol`]: the id rides in a
/// `farcall.clientId.<id>` entry alongside the base protocol.
pub fn client_id_from_protocols<I, S>(protocols: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    protocols.into_iter().find_map(|p| {
        p.as_ref()
            .trim()
            .strip_prefix(farcall_core::WS_CLIENT_ID_PREFIX)
            .map(str::to_owned)
    })
}

fn encode_or_fallback(response: &BatchResponse) -> String {
    codec::encode_response(response).unwrap_or_else(|e| {
        warn!(error = %e, "failed to encode response envelope");
        // A minimal, always-valid envelope.
        concat!(
            r#"{"batch":[{"id":"parse-error","success":false,"error":"#,
            r#"{"$error":{"name":"Error","message":"response encoding failed","properties":{}}}}]}"#
        )
        .to_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostObject;
    use farcall_core::{BatchItem, BatchRequest, Op, OpChain, Value};

    fn service() -> RpcService {
        let host = HostObject::new()
            .method("ok", |_, _| async { Ok(HostValue::data(1)) })
            .method("boom", |_, _| async {
                Err::<HostValue, _>(ErrorValue::error("bad"))
            })
            .build();
        RpcService::new(host)
    }

    fn body(names: &[&str]) -> String {
        let request = BatchRequest {
            batch: names
                .iter()
                .enumerate()
                .map(|(i, name)| BatchItem {
                    id: i.to_string(),
                    operations: OpChain::from_ops(vec![Op::get(*name), Op::apply(vec![])]),
                })
                .collect(),
        };
        codec::encode_request(&request).unwrap()
    }

    #[tokio::test]
    async fn all_success_is_200() {
        let reply = service().handle_call(&body(&["ok", "ok"])).await;
        assert_eq!(reply.status, 200);
        let response = codec::decode_response(&reply.body).unwrap();
        assert!(response.all_succeeded());
    }

    #[tokio::test]
    async fn partial_failure_is_500_with_full_envelope() {
        let reply = service().handle_call(&body(&["ok", "boom"])).await;
        assert_eq!(reply.status, 500);
        let response = codec::decode_response(&reply.body).unwrap();
        assert_eq!(response.batch.len(), 2);
        assert!(response.batch[0].is_success());
        assert!(!response.batch[1].is_success());
    }

    #[tokio::test]
    async fn unreadable_requests_are_400_with_parse_error_item() {
        let reply = service().handle_call("not json at all").await;
        assert_eq!(reply.status, 400);
        let response = codec::decode_response(&reply.body).unwrap();
        assert_eq!(response.batch.len(), 1);
        assert_eq!(response.batch[0].id(), farcall_core::PARSE_ERROR_ID);
    }

    #[tokio::test]
    async fn frames_round_trip_through_handle_message() {
        let svc = service();
        let request = BatchRequest {
            batch: vec![BatchItem {
                id: "1".into(),
                operations: OpChain::from_ops(vec![Op::get("ok"), Op::apply(vec![])]),
            }],
        };
        let frame = codec::encode_request_frame(&svc.message_tag(), &request).unwrap();
        let reply = svc.handle_message(&frame).await.unwrap();
        let codec::Frame::Response(response) =
            codec::decode_frame(&svc.message_tag(), &reply).unwrap()
        else {
            panic!("expected response frame");
        };
        assert!(response.all_succeeded());
        let Value::Number(n) = (match &response.batch[0] {
            farcall_core::BatchReply::Success { result, .. } => result.clone(),
            farcall_core::BatchReply::Failure { .. } => panic!("unexpected failure"),
        }) else {
            panic!("expected number");
        };
        assert_eq!(n, 1.0);
    }

    #[test]
    fn call_paths_parse() {
        let svc = service();
        let target = svc.parse_call_path("/__rpc/counter/alpha/call").unwrap();
        assert_eq!(target.binding, "counter");
        assert_eq!(target.instance, "alpha");
        assert!(svc.parse_call_path("/other/counter/alpha/call").is_none());
        assert!(svc.parse_call_path("/__rpc/counter/alpha").is_none());
    }

    #[test]
    fn client_ids_come_from_subprotocols() {
        let id = client_id_from_protocols(["farcall", "farcall.clientId.abc-123"]);
        assert_eq!(id.as_deref(), Some("abc-123"));
        assert!(client_id_from_protocols(["farcall"]).is_none());
    }

    #[test]
    fn upgrades_are_accepted_with_the_base_protocol() {
        assert_eq!(
            accept_protocol(["farcall", "farcall.clientId.abc-123"]),
            Some(PROTOCOL)
        );
        assert_eq!(accept_protocol([" farcall "]), Some(PROTOCOL));
        // Only a client-id entry, or something else entirely: refuse.
        assert!(accept_protocol(["farcall.clientId.abc-123"]).is_none());
        assert!(accept_protocol(["graphql-ws"]).is_none());
        assert!(accept_protocol(std::iter::empty::<&str>()).is_none());
    }
}
