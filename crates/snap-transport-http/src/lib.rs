// SPDX-License-Identifier: MIT OR Apache-2.0
//! The HTTP transport: a plain POST/JSON request-response channel with an
//! SSE fallback for streaming methods, plus the `/.well-known/snap-agent.json`
//! discovery document, per `spec.md` §4.9.
//!
//! An [`HttpTransport`] can be server-only (it was constructed without a
//! [`HttpServerConfig`]), client-only, or both; `Agent::add_transport` only
//! needs one instance either way.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod server;

pub use client::HttpClientConfig;
pub use server::HttpServerConfig;

use async_trait::async_trait;
use snap_core::Envelope;
use snap_error::SnapError;
use snap_runtime::{EnvelopeStream, InboundHooks, Transport};
use server::HttpServerTransport;
use std::sync::Arc;

/// Fetch and verify the agent card served at `base_url`.
///
/// Thin wrapper over [`client::discover`] using a throwaway client built
/// from the default [`HttpClientConfig`]; callers that already hold an
/// [`HttpTransport`] should prefer calling through it instead.
pub async fn discover_via_http(base_url: &str) -> Result<snap_core::SignedCard, SnapError> {
    let client = client::build_client()?;
    client::discover(&client, base_url).await
}

/// The HTTP transport plugin: an optional inbound server half and an
/// outbound `reqwest` client half.
pub struct HttpTransport {
    server: Option<HttpServerTransport>,
    client: reqwest::Client,
    client_config: HttpClientConfig,
}

impl HttpTransport {
    /// A client-only transport: no inbound server is bound, so `start` is a
    /// no-op and only `send`/`send_stream` do anything.
    pub fn client_only(config: HttpClientConfig) -> Result<Self, SnapError> {
        let client = client::build_client()?;
        Ok(Self { server: None, client, client_config: config })
    }

    /// A transport that both serves `server_config` and can place outbound
    /// calls via `client_config`.
    pub fn with_server(server_config: HttpServerConfig, client_config: HttpClientConfig) -> Result<Self, SnapError> {
        let client = client::build_client()?;
        Ok(Self {
            server: Some(HttpServerTransport::new(server_config)),
            client,
            client_config,
        })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::client_only(HttpClientConfig::default()).expect("default reqwest client builds")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> &str {
        "http"
    }

    async fn start(&self, hooks: Arc<dyn InboundHooks>) -> Result<(), SnapError> {
        match &self.server {
            Some(server) => server.bind(hooks).await,
            None => Ok(()),
        }
    }

    async fn stop(&self) -> Result<(), SnapError> {
        match &self.server {
            Some(server) => server.unbind().await,
            None => Ok(()),
        }
    }

    async fn send(&self, envelope: Envelope, endpoint: &str) -> Result<Envelope, SnapError> {
        client::send(&self.client, &envelope, endpoint, &self.client_config).await
    }

    async fn send_stream(&self, envelope: Envelope, endpoint: &str) -> Result<EnvelopeStream, SnapError> {
        client::send_stream(&self.client, &envelope, endpoint, &self.client_config).await
    }
}
