// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The structured-clone wire codec.
//!
//! The codec is symmetric and is invoked once per batch envelope per
//! side. JSON-native shapes travel as themselves; everything else uses a
//! single-key `$`-tagged object. Shared and circular nodes are written as
//! a `{"$shared": id, "$value": ...}` definer plus `{"$ref": id}`
//! back-references, with ids scoped to one envelope. Plain objects that
//! happen to contain a `$`-prefixed key are wrapped as `{"$object": ...}`
//! so user data can never be mistaken for a tag.
//!
//! Decoding installs container nodes before descending into their
//! children, which is what makes circular references come out with the
//! same shape they went in with.

use crate::batch::{BatchItem, BatchReply, BatchRequest, BatchResponse, DOWNSTREAM_TYPE};
use crate::error::{CoreError, ErrorValue};
use crate::ops::{Key, Op, OpChain};
use crate::value::{
    HeadersValue, HttpRequestValue, HttpResponseValue, NestedOperationMarker, RegExpValue,
    RemoteFunctionMarker, TypedArrayKind, TypedArrayValue, Value,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value as Json, json};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Encode a batch request envelope to wire text.
pub fn encode_request(req: &BatchRequest) -> Result<String, CoreError> {
    Ok(serde_json::to_string(&request_to_json(req))?)
}

/// Decode a batch request envelope from wire text.
pub fn decode_request(text: &str) -> Result<BatchRequest, CoreError> {
    let json: Json = serde_json::from_str(text)?;
    request_from_json(&json)
}

/// Encode a batch response envelope to wire text.
pub fn encode_response(resp: &BatchResponse) -> Result<String, CoreError> {
    Ok(serde_json::to_string(&response_to_json(resp))?)
}

/// Decode a batch response envelope from wire text.
pub fn decode_response(text: &str) -> Result<BatchResponse, CoreError> {
    let json: Json = serde_json::from_str(text)?;
    response_from_json(&json)
}

/// Encode a single value (used for downstream payloads and diagnostics).
pub fn encode_value(value: &Value) -> Result<String, CoreError> {
    let mut enc = Encoder::new();
    enc.scan_value(value);
    Ok(serde_json::to_string(&enc.emit_value(value))?)
}

/// Decode a single value.
pub fn decode_value(text: &str) -> Result<Value, CoreError> {
    let json: Json = serde_json::from_str(text)?;
    let mut dec = Decoder::new();
    dec.value(&json)
}

/// A decoded stateful-transport frame.
#[derive(Debug)]
pub enum Frame {
    /// A batch request, tagged with the endpoint's message tag.
    Request(BatchRequest),
    /// A batch response, tagged with the endpoint's message tag.
    Response(BatchResponse),
    /// A fire-and-forget downstream payload.
    Downstream(Value),
}

/// Encode a request as a stateful-transport frame `{type, batch}`.
pub fn encode_request_frame(tag: &str, req: &BatchRequest) -> Result<String, CoreError> {
    let mut json = request_to_json(req);
    frame_with_tag(&mut json, tag);
    Ok(serde_json::to_string(&json)?)
}

/// Encode a response as a stateful-transport frame `{type, batch}`.
pub fn encode_response_frame(tag: &str, resp: &BatchResponse) -> Result<String, CoreError> {
    let mut json = response_to_json(resp);
    frame_with_tag(&mut json, tag);
    Ok(serde_json::to_string(&json)?)
}

/// Encode a downstream frame `{type: "downstream", payload}`.
pub fn encode_downstream_frame(payload: &Value) -> Result<String, CoreError> {
    let mut enc = Encoder::new();
    enc.scan_value(payload);
    let json = json!({ "type": DOWNSTREAM_TYPE, "payload": enc.emit_value(payload) });
    Ok(serde_json::to_string(&json)?)
}

/// Decode a stateful-transport frame. `tag` is the expected message tag
/// for batch traffic; frames with any other tag are rejected.
pub fn decode_frame(tag: &str, text: &str) -> Result<Frame, CoreError> {
    let json: Json = serde_json::from_str(text)?;
    let obj = json.as_object().ok_or(CoreError::Malformed("frame"))?;
    let frame_tag = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or(CoreError::Malformed("frame"))?;
    if frame_tag == DOWNSTREAM_TYPE {
        let payload = obj.get("payload").ok_or(CoreError::Malformed("downstream"))?;
        let mut dec = Decoder::new();
        return Ok(Frame::Downstream(dec.value(payload)?));
    }
    if frame_tag != tag {
        return Err(CoreError::UnknownTag(frame_tag.to_owned()));
    }
    let batch = obj.get("batch").ok_or(CoreError::Malformed("frame"))?;
    let items = batch.as_array().ok_or(CoreError::Malformed("batch"))?;
    // Request items carry operations; response items carry a status.
    let is_response = items
        .first()
        .and_then(Json::as_object)
        .is_some_and(|o| o.contains_key("success"));
    if is_response || items.is_empty() {
        Ok(Frame::Response(response_from_json(&json)?))
    } else {
        Ok(Frame::Request(request_from_json(&json)?))
    }
}

fn frame_with_tag(json: &mut Json, tag: &str) {
    if let Json::Object(obj) = json {
        obj.insert("type".to_owned(), Json::String(tag.to_owned()));
    }
}

// ---------------------------------------------------------------------
// Envelope shapes
// ---------------------------------------------------------------------

fn request_to_json(req: &BatchRequest) -> Json {
    let mut enc = Encoder::new();
    for item in &req.batch {
        enc.scan_chain(&item.operations);
    }
    let items: Vec<Json> = req
        .batch
        .iter()
        .map(|item| {
            json!({
                "id": item.id,
                "operations": enc.emit_chain(&item.operations),
            })
        })
        .collect();
    json!({ "batch": items })
}

fn request_from_json(json: &Json) -> Result<BatchRequest, CoreError> {
    let obj = json.as_object().ok_or(CoreError::Malformed("batch request"))?;
    let batch = obj
        .get("batch")
        .and_then(Json::as_array)
        .ok_or(CoreError::Malformed("batch request"))?;
    let mut dec = Decoder::new();
    let mut items = Vec::with_capacity(batch.len());
    for entry in batch {
        let entry = entry.as_object().ok_or(CoreError::Malformed("batch item"))?;
        let id = entry
            .get("id")
            .and_then(Json::as_str)
            .ok_or(CoreError::Malformed("batch item id"))?
            .to_owned();
        let operations = entry
            .get("operations")
            .ok_or(CoreError::Malformed("batch item operations"))?;
        items.push(BatchItem {
            id,
            operations: dec.chain(operations)?,
        });
    }
    Ok(BatchRequest { batch: items })
}

fn response_to_json(resp: &BatchResponse) -> Json {
    let mut enc = Encoder::new();
    for reply in &resp.batch {
        match reply {
            BatchReply::Success { result, .. } => enc.scan_value(result),
            BatchReply::Failure { error, .. } => enc.scan_value(error),
        }
    }
    let items: Vec<Json> = resp
        .batch
        .iter()
        .map(|reply| match reply {
            BatchReply::Success { id, result } => json!({
                "id": id,
                "success": true,
                "result": enc.emit_value(result),
            }),
            BatchReply::Failure { id, error } => json!({
                "id": id,
                "success": false,
                "error": enc.emit_value(error),
            }),
        })
        .collect();
    json!({ "batch": items })
}

fn response_from_json(json: &Json) -> Result<BatchResponse, CoreError> {
    let obj = json.as_object().ok_or(CoreError::Malformed("batch response"))?;
    let batch = obj
        .get("batch")
        .and_then(Json::as_array)
        .ok_or(CoreError::Malformed("batch response"))?;
    let mut dec = Decoder::new();
    let mut replies = Vec::with_capacity(batch.len());
    for entry in batch {
        let entry = entry.as_object().ok_or(CoreError::Malformed("batch reply"))?;
        let id = entry
            .get("id")
            .and_then(Json::as_str)
            .ok_or(CoreError::Malformed("batch reply id"))?
            .to_owned();
        let success = entry
            .get("success")
            .and_then(Json::as_bool)
            .ok_or(CoreError::Malformed("batch reply status"))?;
        let reply = if success {
            let result = entry.get("result").unwrap_or(&Json::Null);
            BatchReply::Success {
                id,
                result: dec.value(result)?,
            }
        } else {
            let error = entry.get("error").unwrap_or(&Json::Null);
            BatchReply::Failure {
                id,
                error: dec.value(error)?,
            }
        };
        replies.push(reply);
    }
    Ok(BatchResponse { batch: replies })
}

// ---------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------

struct Encoder {
    /// Nodes reached more than once during the scan pass.
    shared: HashSet<usize>,
    /// Shared nodes already emitted, with their assigned ids.
    assigned: HashMap<usize, u32>,
    next_id: u32,
    /// Scan-pass visit set.
    seen: HashSet<usize>,
}

fn node_addr(value: &Value) -> Option<usize> {
    Some(match value {
        Value::Object(o) => Rc::as_ptr(o) as *const u8 as usize,
        Value::Array(a) => Rc::as_ptr(a) as *const u8 as usize,
        Value::Map(m) => Rc::as_ptr(m) as *const u8 as usize,
        Value::Set(s) => Rc::as_ptr(s) as *const u8 as usize,
        Value::Error(e) => Rc::as_ptr(e) as *const u8 as usize,
        _ => return None,
    })
}

impl Encoder {
    fn new() -> Self {
        Encoder {
            shared: HashSet::new(),
            assigned: HashMap::new(),
            next_id: 0,
            seen: HashSet::new(),
        }
    }

    /// First pass: mark every container node reached twice (shared nodes
    /// and cycle entry points alike).
    fn scan_value(&mut self, value: &Value) {
        if let Some(addr) = node_addr(value) {
            if !self.seen.insert(addr) {
                self.shared.insert(addr);
                return;
            }
        }
        match value {
            Value::Array(a) => {
                for item in a.borrow().iter() {
                    self.scan_value(item);
                }
            }
            Value::Object(o) => {
                for (_, item) in o.borrow().iter() {
                    self.scan_value(item);
                }
            }
            Value::Map(m) => {
                for (k, v) in m.borrow().iter() {
                    self.scan_value(k);
                    self.scan_value(v);
                }
            }
            Value::Set(s) => {
                for item in s.borrow().iter() {
                    self.scan_value(item);
                }
            }
            Value::Error(e) => {
                for (_, item) in e.borrow().properties.iter() {
                    self.scan_value(item);
                }
            }
            Value::HttpRequest(r) => {
                if let Some(body) = &r.body {
                    self.scan_value(body);
                }
            }
            Value::HttpResponse(r) => {
                if let Some(body) = &r.body {
                    self.scan_value(body);
                }
            }
            Value::RemoteFunction(m) => self.scan_chain(&m.operation_chain),
            Value::NestedOperation(m) => {
                if let Some(chain) = &m.operation_chain {
                    self.scan_chain(chain);
                }
            }
            _ => {}
        }
    }

    fn scan_chain(&mut self, chain: &OpChain) {
        for op in &chain.ops {
            if let Op::Apply { args } = op {
                for arg in args {
                    self.scan_value(arg);
                }
            }
        }
    }

    /// Second pass: emit JSON, wrapping shared nodes in `$shared`
    /// definers and pointing later visits at them with `$ref`.
    fn emit_value(&mut self, value: &Value) -> Json {
        if let Some(addr) = node_addr(value) {
            if self.shared.contains(&addr) {
                if let Some(id) = self.assigned.get(&addr) {
                    return json!({ "$ref": id });
                }
                let id = self.next_id;
                self.next_id += 1;
                // Assign before descending so back-edges resolve to us.
                self.assigned.insert(addr, id);
                let inner = self.emit_node(value);
                return json!({ "$shared": id, "$value": inner });
            }
        }
        self.emit_node(value)
    }

    fn emit_node(&mut self, value: &Value) -> Json {
        match value {
            Value::Undefined => json!({ "$undefined": true }),
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => match serde_json::Number::from_f64(*n) {
                Some(num) => Json::Number(num),
                None if n.is_nan() => json!({ "$number": "nan" }),
                None if *n > 0.0 => json!({ "$number": "inf" }),
                None => json!({ "$number": "-inf" }),
            },
            Value::BigInt(b) => json!({ "$bigint": b.to_string() }),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(ms) => json!({ "$date": ms }),
            Value::RegExp(re) => json!({ "$regexp": { "source": re.source, "flags": re.flags } }),
            Value::Bytes(bytes) => json!({ "$bytes": BASE64.encode(bytes) }),
            Value::TypedArray(ta) => json!({
                "$typed": { "kind": ta.kind.as_str(), "data": BASE64.encode(&ta.bytes) }
            }),
            Value::Array(a) => {
                Json::Array(a.borrow().iter().map(|item| self.emit_value(item)).collect())
            }
            Value::Object(o) => {
                let entries = o.borrow();
                let mut out = JsonMap::with_capacity(entries.len());
                let needs_escape = entries.keys().any(|k| k.starts_with('$'));
                for (k, v) in entries.iter() {
                    out.insert(k.clone(), self.emit_value(v));
                }
                if needs_escape {
                    json!({ "$object": Json::Object(out) })
                } else {
                    Json::Object(out)
                }
            }
            Value::Map(m) => {
                let pairs: Vec<Json> = m
                    .borrow()
                    .iter()
                    .map(|(k, v)| Json::Array(vec![self.emit_value(k), self.emit_value(v)]))
                    .collect();
                json!({ "$map": pairs })
            }
            Value::Set(s) => {
                let items: Vec<Json> =
                    s.borrow().iter().map(|item| self.emit_value(item)).collect();
                json!({ "$set": items })
            }
            Value::Error(e) => {
                let err = e.borrow();
                let mut body = JsonMap::new();
                body.insert("name".to_owned(), Json::String(err.name.clone()));
                body.insert("message".to_owned(), Json::String(err.message.clone()));
                if let Some(stack) = &err.stack {
                    body.insert("stack".to_owned(), Json::String(stack.clone()));
                }
                let mut props = JsonMap::new();
                for (k, v) in err.properties.iter() {
                    props.insert(k.clone(), self.emit_value(v));
                }
                body.insert("properties".to_owned(), Json::Object(props));
                json!({ "$error": Json::Object(body) })
            }
            Value::Url(u) => json!({ "$url": u.as_str() }),
            Value::Headers(h) => {
                let pairs: Vec<Json> = h
                    .0
                    .iter()
                    .map(|(n, v)| Json::Array(vec![json!(n), json!(v)]))
                    .collect();
                json!({ "$headers": pairs })
            }
            Value::HttpRequest(r) => {
                let body = match &r.body {
                    Some(b) => self.emit_value(b),
                    None => Json::Null,
                };
                json!({ "$request": {
                    "method": r.method,
                    "url": r.url,
                    "headers": self.emit_headers(&r.headers),
                    "body": body,
                }})
            }
            Value::HttpResponse(r) => {
                let body = match &r.body {
                    Some(b) => self.emit_value(b),
                    None => Json::Null,
                };
                json!({ "$response": {
                    "status": r.status,
                    "statusText": r.status_text,
                    "headers": self.emit_headers(&r.headers),
                    "body": body,
                }})
            }
            Value::RemoteFunction(m) => json!({
                "isRemoteFunction": true,
                "operationChain": self.emit_chain(&m.operation_chain),
                "functionName": m.function_name,
            }),
            Value::NestedOperation(m) => {
                let mut out = JsonMap::new();
                out.insert("isNestedOperation".to_owned(), Json::Bool(true));
                out.insert("refId".to_owned(), Json::String(m.ref_id.clone()));
                if let Some(chain) = &m.operation_chain {
                    out.insert("operationChain".to_owned(), self.emit_chain(chain));
                }
                Json::Object(out)
            }
        }
    }

    fn emit_headers(&self, headers: &HeadersValue) -> Json {
        Json::Array(
            headers
                .0
                .iter()
                .map(|(n, v)| Json::Array(vec![json!(n), json!(v)]))
                .collect(),
        )
    }

    fn emit_chain(&mut self, chain: &OpChain) -> Json {
        Json::Array(
            chain
                .ops
                .iter()
                .map(|op| match op {
                    Op::Get { key } => json!({ "type": "get", "key": key }),
                    Op::Apply { args } => json!({
                        "type": "apply",
                        "args": args.iter().map(|a| self.emit_value(a)).collect::<Vec<_>>(),
                    }),
                })
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------

struct Decoder {
    shared: HashMap<u32, Value>,
}

impl Decoder {
    fn new() -> Self {
        Decoder {
            shared: HashMap::new(),
        }
    }

    fn value(&mut self, json: &Json) -> Result<Value, CoreError> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or(CoreError::Malformed("number")),
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => {
                let node = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                for item in items {
                    let decoded = self.value(item)?;
                    node.borrow_mut().push(decoded);
                }
                Ok(Value::Array(node))
            }
            Json::Object(obj) => self.object(obj),
        }
    }

    fn object(&mut self, obj: &JsonMap<String, Json>) -> Result<Value, CoreError> {
        // Reserved marker shapes first: they are plain multi-key objects.
        if obj.get("isRemoteFunction").and_then(Json::as_bool) == Some(true) {
            let chain = obj
                .get("operationChain")
                .ok_or(CoreError::Malformed("remote function marker"))?;
            let name = obj
                .get("functionName")
                .and_then(Json::as_str)
                .unwrap_or_default();
            return Ok(Value::RemoteFunction(RemoteFunctionMarker {
                operation_chain: self.chain(chain)?,
                function_name: name.to_owned(),
            }));
        }
        if obj.get("isNestedOperation").and_then(Json::as_bool) == Some(true) {
            let ref_id = obj
                .get("refId")
                .and_then(Json::as_str)
                .ok_or(CoreError::Malformed("nested operation marker"))?
                .to_owned();
            let operation_chain = match obj.get("operationChain") {
                Some(chain) => Some(self.chain(chain)?),
                None => None,
            };
            return Ok(Value::NestedOperation(NestedOperationMarker {
                ref_id,
                operation_chain,
            }));
        }

        // `$shared`/`$ref` pairs next, then single-key tags.
        if let Some(id) = obj.get("$ref").and_then(Json::as_u64) {
            let id = id as u32;
            return self
                .shared
                .get(&id)
                .cloned()
                .ok_or(CoreError::UnresolvedRef(id));
        }
        if let Some(id) = obj.get("$shared").and_then(Json::as_u64) {
            let inner = obj.get("$value").ok_or(CoreError::Malformed("$shared"))?;
            return self.shared_node(id as u32, inner);
        }

        if obj.len() == 1 {
            let (tag, payload) = obj.iter().next().expect("len checked above");
            if tag.starts_with('$') {
                return self.tagged(tag, payload);
            }
        } else if obj.keys().any(|k| k.starts_with('$')) {
            // Multi-key objects containing `$` keys are never produced by
            // the encoder without the `$object` wrapper.
            return Err(CoreError::Malformed("object"));
        }

        self.plain_object(obj)
    }

    fn plain_object(&mut self, obj: &JsonMap<String, Json>) -> Result<Value, CoreError> {
        let node: Rc<RefCell<IndexMap<String, Value>>> =
            Rc::new(RefCell::new(IndexMap::with_capacity(obj.len())));
        for (k, v) in obj {
            let decoded = self.value(v)?;
            node.borrow_mut().insert(k.clone(), decoded);
        }
        Ok(Value::Object(node))
    }

    /// Decode a `$shared` definer: the output node is registered under
    /// its id before children are decoded so that `$ref` back-edges
    /// inside the subtree resolve to the node under construction.
    fn shared_node(&mut self, id: u32, inner: &Json) -> Result<Value, CoreError> {
        match inner {
            Json::Array(items) => {
                let node = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                self.shared.insert(id, Value::Array(node.clone()));
                for item in items {
                    let decoded = self.value(item)?;
                    node.borrow_mut().push(decoded);
                }
                Ok(Value::Array(node))
            }
            Json::Object(obj) => {
                if let Some(payload) = obj.get("$object").filter(|_| obj.len() == 1) {
                    let payload =
                        payload.as_object().ok_or(CoreError::Malformed("$object"))?;
                    return self.shared_plain_object(id, payload);
                }
                if let Some(payload) = obj.get("$map").filter(|_| obj.len() == 1) {
                    let pairs = payload.as_array().ok_or(CoreError::Malformed("$map"))?;
                    let node = Rc::new(RefCell::new(Vec::with_capacity(pairs.len())));
                    self.shared.insert(id, Value::Map(node.clone()));
                    for pair in pairs {
                        let pair = pair.as_array().ok_or(CoreError::Malformed("$map"))?;
                        if pair.len() != 2 {
                            return Err(CoreError::Malformed("$map"));
                        }
                        let k = self.value(&pair[0])?;
                        let v = self.value(&pair[1])?;
                        node.borrow_mut().push((k, v));
                    }
                    return Ok(Value::Map(node));
                }
                if let Some(payload) = obj.get("$set").filter(|_| obj.len() == 1) {
                    let items = payload.as_array().ok_or(CoreError::Malformed("$set"))?;
                    let node = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                    self.shared.insert(id, Value::Set(node.clone()));
                    for item in items {
                        let decoded = self.value(item)?;
                        node.borrow_mut().push(decoded);
                    }
                    return Ok(Value::Set(node));
                }
                if let Some(payload) = obj.get("$error").filter(|_| obj.len() == 1) {
                    return self.shared_error(id, payload);
                }
                if obj.keys().any(|k| k.starts_with('$')) {
                    // Other tags cannot participate in cycles; decode then
                    // register.
                    let decoded = self.object(obj)?;
                    self.shared.insert(id, decoded.clone());
                    return Ok(decoded);
                }
                self.shared_plain_object(id, obj)
            }
            other => {
                let decoded = self.value(other)?;
                self.shared.insert(id, decoded.clone());
                Ok(decoded)
            }
        }
    }

    fn shared_plain_object(
        &mut self,
        id: u32,
        obj: &JsonMap<String, Json>,
    ) -> Result<Value, CoreError> {
        let node: Rc<RefCell<IndexMap<String, Value>>> =
            Rc::new(RefCell::new(IndexMap::with_capacity(obj.len())));
        self.shared.insert(id, Value::Object(node.clone()));
        for (k, v) in obj {
            let decoded = self.value(v)?;
            node.borrow_mut().insert(k.clone(), decoded);
        }
        Ok(Value::Object(node))
    }

    fn shared_error(&mut self, id: u32, payload: &Json) -> Result<Value, CoreError> {
        let obj = payload.as_object().ok_or(CoreError::Malformed("$error"))?;
        let node = Rc::new(RefCell::new(ErrorValue::default()));
        self.shared.insert(id, Value::Error(node.clone()));
        let err = self.error_body(obj)?;
        *node.borrow_mut() = err;
        Ok(Value::Error(node))
    }

    fn tagged(&mut self, tag: &str, payload: &Json) -> Result<Value, CoreError> {
        match tag {
            "$undefined" => Ok(Value::Undefined),
            "$number" => match payload.as_str() {
                Some("nan") => Ok(Value::Number(f64::NAN)),
                Some("inf") => Ok(Value::Number(f64::INFINITY)),
                Some("-inf") => Ok(Value::Number(f64::NEG_INFINITY)),
                _ => Err(CoreError::Malformed("$number")),
            },
            "$bigint" => {
                let text = payload.as_str().ok_or(CoreError::Malformed("$bigint"))?;
                text.parse::<num_bigint::BigInt>()
                    .map(Value::BigInt)
                    .map_err(|_| CoreError::Malformed("$bigint"))
            }
            "$date" => payload
                .as_f64()
                .map(Value::Date)
                .ok_or(CoreError::Malformed("$date")),
            "$regexp" => {
                let obj = payload.as_object().ok_or(CoreError::Malformed("$regexp"))?;
                let source = obj
                    .get("source")
                    .and_then(Json::as_str)
                    .ok_or(CoreError::Malformed("$regexp"))?;
                let flags = obj.get("flags").and_then(Json::as_str).unwrap_or_default();
                Ok(Value::RegExp(RegExpValue {
                    source: source.to_owned(),
                    flags: flags.to_owned(),
                }))
            }
            "$bytes" => {
                let text = payload.as_str().ok_or(CoreError::Malformed("$bytes"))?;
                Ok(Value::Bytes(BASE64.decode(text)?))
            }
            "$typed" => {
                let obj = payload.as_object().ok_or(CoreError::Malformed("$typed"))?;
                let kind = obj
                    .get("kind")
                    .and_then(Json::as_str)
                    .and_then(TypedArrayKind::from_str)
                    .ok_or(CoreError::Malformed("$typed"))?;
                let data = obj
                    .get("data")
                    .and_then(Json::as_str)
                    .ok_or(CoreError::Malformed("$typed"))?;
                Ok(Value::TypedArray(TypedArrayValue {
                    kind,
                    bytes: BASE64.decode(data)?,
                }))
            }
            "$object" => {
                let obj = payload.as_object().ok_or(CoreError::Malformed("$object"))?;
                self.plain_object(obj)
            }
            "$map" => {
                let pairs = payload.as_array().ok_or(CoreError::Malformed("$map"))?;
                let node = Rc::new(RefCell::new(Vec::with_capacity(pairs.len())));
                for pair in pairs {
                    let pair = pair.as_array().ok_or(CoreError::Malformed("$map"))?;
                    if pair.len() != 2 {
                        return Err(CoreError::Malformed("$map"));
                    }
                    let k = self.value(&pair[0])?;
                    let v = self.value(&pair[1])?;
                    node.borrow_mut().push((k, v));
                }
                Ok(Value::Map(node))
            }
            "$set" => {
                let items = payload.as_array().ok_or(CoreError::Malformed("$set"))?;
                let node = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                for item in items {
                    let decoded = self.value(item)?;
                    node.borrow_mut().push(decoded);
                }
                Ok(Value::Set(node))
            }
            "$error" => {
                let obj = payload.as_object().ok_or(CoreError::Malformed("$error"))?;
                let err = self.error_body(obj)?;
                Ok(Value::error(err))
            }
            "$url" => {
                let text = payload.as_str().ok_or(CoreError::Malformed("$url"))?;
                Ok(Value::Url(url::Url::parse(text)?))
            }
            "$headers" => Ok(Value::Headers(self.headers(payload)?)),
            "$request" => {
                let obj = payload.as_object().ok_or(CoreError::Malformed("$request"))?;
                let method = obj
                    .get("method")
                    .and_then(Json::as_str)
                    .ok_or(CoreError::Malformed("$request"))?;
                let url = obj
                    .get("url")
                    .and_then(Json::as_str)
                    .ok_or(CoreError::Malformed("$request"))?;
                let headers = self.headers(obj.get("headers").unwrap_or(&Json::Null))?;
                let body = self.optional_body(obj.get("body"))?;
                Ok(Value::HttpRequest(Rc::new(HttpRequestValue {
                    method: method.to_owned(),
                    url: url.to_owned(),
                    headers,
                    body,
                })))
            }
            "$response" => {
                let obj = payload.as_object().ok_or(CoreError::Malformed("$response"))?;
                let status = obj
                    .get("status")
                    .and_then(Json::as_u64)
                    .ok_or(CoreError::Malformed("$response"))? as u16;
                let status_text = obj
                    .get("statusText")
                    .and_then(Json::as_str)
                    .unwrap_or_default();
                let headers = self.headers(obj.get("headers").unwrap_or(&Json::Null))?;
                let body = self.optional_body(obj.get("body"))?;
                Ok(Value::HttpResponse(Rc::new(HttpResponseValue {
                    status,
                    status_text: status_text.to_owned(),
                    headers,
                    body,
                })))
            }
            other => Err(CoreError::UnknownTag(other.to_owned())),
        }
    }

    fn optional_body(&mut self, body: Option<&Json>) -> Result<Option<Value>, CoreError> {
        match body {
            None | Some(Json::Null) => Ok(None),
            Some(other) => Ok(Some(self.value(other)?)),
        }
    }

    fn headers(&self, json: &Json) -> Result<HeadersValue, CoreError> {
        let mut out = Vec::new();
        if let Json::Array(pairs) = json {
            for pair in pairs {
                let pair = pair.as_array().ok_or(CoreError::Malformed("$headers"))?;
                let (Some(n), Some(v)) = (
                    pair.first().and_then(Json::as_str),
                    pair.get(1).and_then(Json::as_str),
                ) else {
                    return Err(CoreError::Malformed("$headers"));
                };
                out.push((n.to_owned(), v.to_owned()));
            }
        }
        Ok(HeadersValue(out))
    }

    fn error_body(&mut self, obj: &JsonMap<String, Json>) -> Result<ErrorValue, CoreError> {
        let name = obj.get("name").and_then(Json::as_str).unwrap_or("Error");
        let message = obj.get("message").and_then(Json::as_str).unwrap_or_default();
        let stack = obj.get("stack").and_then(Json::as_str).map(str::to_owned);
        let mut properties = IndexMap::new();
        if let Some(Json::Object(props)) = obj.get("properties") {
            for (k, v) in props {
                properties.insert(k.clone(), self.value(v)?);
            }
        }
        Ok(ErrorValue {
            name: name.to_owned(),
            message: message.to_owned(),
            stack,
            properties,
        })
    }

    fn chain(&mut self, json: &Json) -> Result<OpChain, CoreError> {
        let ops = json.as_array().ok_or(CoreError::Malformed("operations"))?;
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            let obj = op.as_object().ok_or(CoreError::Malformed("operation"))?;
            match obj.get("type").and_then(Json::as_str) {
                Some("get") => {
                    let key = obj.get("key").ok_or(CoreError::Malformed("get key"))?;
                    let key: Key = serde_json::from_value(key.clone())?;
                    out.push(Op::Get { key });
                }
                Some("apply") => {
                    let args = obj
                        .get("args")
                        .and_then(Json::as_array)
                        .ok_or(CoreError::Malformed("apply args"))?;
                    let mut decoded = Vec::with_capacity(args.len());
                    for arg in args {
                        decoded.push(self.value(arg)?);
                    }
                    out.push(Op::Apply { args: decoded });
                }
                _ => return Err(CoreError::Malformed("operation type")),
            }
        }
        Ok(OpChain::from_ops(out))
    }
}
