// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! HTTP transport: one batch per `POST {base}{prefix}/{binding}/{instance}/call`.
//!
//! The server answers 200 when every item succeeded, 500 when the
//! envelope is well-formed but some item failed, and 400 with a
//! synthesised parse-error envelope for unreadable requests. All three
//! bodies are handed back for per-item correlation; any other status is
//! a batch-level failure.

use super::{Transport, TransportFuture, call_url, validate_url_is_secure};
use crate::error::Error;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, trace};

/// A stateless transport over HTTP, based on [`reqwest`].
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Start building a transport for the given base URL, eg
    /// `https://example.com`. Errors if the URL is insecure; use
    /// [`HttpTransportBuilder::allow_insecure`] to opt out.
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder {
            base_url: base_url.into(),
            prefix: "/__rpc".to_owned(),
            binding: "host".to_owned(),
            instance: "default".to_owned(),
            timeout: Duration::from_secs(30),
            headers: Vec::new(),
            allow_insecure: false,
        }
    }

    /// The full endpoint URL batches are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Builds an [`HttpTransport`].
pub struct HttpTransportBuilder {
    base_url: String,
    prefix: String,
    binding: String,
    instance: String,
    timeout: Duration,
    headers: Vec<(String, String)>,
    allow_insecure: bool,
}

impl HttpTransportBuilder {
    /// The endpoint prefix (default `/__rpc`).
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

    /// Per-batch timeout (default 30 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach an arbitrary header to every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Permit plain `http://` endpoints beyond localhost.
    pub fn allow_insecure(mut self) -> Self {
        self.allow_insecure = true;
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<HttpTransport, Error> {
        if !self.allow_insecure {
            validate_url_is_secure(&self.base_url)?;
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(Error::transport)?;
            let value = HeaderValue::from_str(value).map_err(Error::transport)?;
            headers.insert(name, value);
        }
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .map_err(Error::transport)?;
        Ok(HttpTransport {
            http,
            endpoint: call_url(&self.base_url, &self.prefix, &self.binding, &self.instance),
        })
    }
}

/// A non-batch HTTP status from the server.
#[derive(Debug)]
struct UnexpectedStatus(u16);

impl std::fmt::Display for UnexpectedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unexpected HTTP status {}", self.0)
    }
}

impl std::error::Error for UnexpectedStatus {}

fn map_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::transport(e)
    }
}

impl Transport for HttpTransport {
    fn execute<'a>(&'a self, body: &'a str) -> TransportFuture<'a, String> {
        Box::pin(async move {
            debug!(endpoint = %self.endpoint, bytes = body.len(), "posting batch");
            let response = self
                .http
                .post(&self.endpoint)
                .body(body.to_owned())
                .send()
                .await
                .map_err(map_reqwest)?;
            let status = response.status().as_u16();
            let text = response.text().await.map_err(map_reqwest)?;
            trace!(status, bytes = text.len(), "batch reply");
            match status {
                // Per-item status lives in the envelope for all three.
                200 | 400 | 500 => Ok(text),
                other => Err(Error::transport(UnexpectedStatus(other))),
            }
        })
    }

    fn set_keep_alive(&self, _enabled: bool) {
        // Stateless; nothing to keep alive.
    }
}
