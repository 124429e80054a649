// SPDX-License-Identifier: MIT OR Apache-2.0
//! The socket transport: a full-duplex framed WebSocket channel with
//! ping/pong liveness, per `spec.md` §4.10.
//!
//! Unlike the HTTP transport there is no `Accept`-header signal to route by;
//! the server decides unary-vs-stream per connection from the inbound
//! envelope's method family via [`snap_runtime::is_stream_method`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod server;

pub use server::SocketServerConfig;
use server::SocketServerTransport;

use async_trait::async_trait;
use snap_core::Envelope;
use snap_error::SnapError;
use snap_runtime::{EnvelopeStream, InboundHooks, Transport};
use std::sync::Arc;

/// The socket transport plugin: an optional inbound server half and an
/// outbound `tokio-tungstenite` client half.
pub struct SocketTransport {
    server: Option<SocketServerTransport>,
}

impl SocketTransport {
    /// A client-only transport: no inbound server is bound, so `start` is a
    /// no-op and only `send`/`send_stream` do anything.
    #[must_use]
    pub fn client_only() -> Self {
        Self { server: None }
    }

    /// A transport that both serves `config` and can place outbound calls.
    #[must_use]
    pub fn with_server(config: SocketServerConfig) -> Self {
        Self {
            server: Some(SocketServerTransport::new(config)),
        }
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::client_only()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> &str {
        "socket"
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
        client::send(&envelope, endpoint).await
    }

    async fn send_stream(&self, envelope: Envelope, endpoint: &str) -> Result<EnvelopeStream, SnapError> {
        client::send_stream(&envelope, endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;
    use snap_core::{AgentCard, Skill};
    use snap_crypto::{derive_keypair, Network};
    use snap_runtime::Agent;
    use std::net::SocketAddr;
    use std::sync::Arc as StdArc;
    use std::time::Duration;
    use tokio::time::sleep;

    fn keypair(n: u8) -> snap_crypto::Keypair32 {
        let bytes = [n; 32];
        derive_keypair(SecretKey::from_slice(&bytes).unwrap(), Network::Bitcoin).unwrap()
    }

    fn test_card(identity: &str) -> AgentCard {
        AgentCard {
            name: "test-agent".to_string(),
            description: "an agent used only in tests".to_string(),
            version: "0.1".to_string(),
            identity: identity.to_string(),
            skills: vec![Skill {
                id: "ping".to_string(),
                name: "Ping".to_string(),
                description: "Replies to a liveness check".to_string(),
                tags: vec![],
                examples: vec![],
                input_modes: vec!["application/json".to_string()],
                output_modes: vec!["application/json".to_string()],
            }],
            default_input_modes: vec!["application/json".to_string()],
            default_output_modes: vec!["application/json".to_string()],
            transports: vec![],
            relays: vec![],
            capabilities: None,
            rate_limit: None,
            domain_anchor: None,
        }
    }

    async fn spawn_agent(addr: SocketAddr, seed: u8) -> (StdArc<Agent>, String) {
        let keypair = keypair(seed);
        let card = test_card(&keypair.address);
        let agent = StdArc::new(Agent::new(keypair, card));
        agent
            .handle(
                "ping/check",
                StdArc::new(|_env: Envelope| Box::pin(async move { Ok(serde_json::json!({ "pong": true })) })),
            )
            .await;
        let transport = SocketTransport::with_server(
            SocketServerConfig::new(addr).with_ping_interval(Duration::from_millis(200)),
        );
        agent.add_transport(StdArc::new(transport)).await;
        agent.start().await.expect("start agent");
        sleep(Duration::from_millis(50)).await;
        let endpoint = format!("ws://{addr}/");
        (agent, endpoint)
    }

    #[tokio::test]
    async fn unary_round_trip_over_real_tcp() {
        let addr: SocketAddr = "127.0.0.1:18090".parse().unwrap();
        let (server_agent, endpoint) = spawn_agent(addr, 11).await;

        let caller_keypair = keypair(12);
        let caller_card = test_card(&caller_keypair.address);
        let caller = Agent::new(caller_keypair, caller_card);
        caller.add_transport(StdArc::new(SocketTransport::client_only())).await;

        let response = caller
            .send(
                Some(server_agent.address().to_string()),
                "socket",
                &endpoint,
                "ping/check",
                serde_json::json!({}),
            )
            .await
            .expect("send succeeds");

        assert_eq!(response.method, "ping/check");
        assert_eq!(response.from, server_agent.address());

        server_agent.stop().await.expect("stop agent");
    }

    #[tokio::test]
    async fn raw_connection_survives_a_ping_round_trip() {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let addr: SocketAddr = "127.0.0.1:18091".parse().unwrap();
        let (server_agent, endpoint) = spawn_agent(addr, 13).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(&endpoint).await.expect("connect");
        // Hold the connection open (without sending a request) across a
        // couple of ping intervals and confirm the server keeps pinging
        // rather than dropping a peer that answers.
        for _ in 0..3 {
            match socket.next().await {
                Some(Ok(Message::Ping(payload))) => {
                    socket.send(Message::Pong(payload)).await.expect("pong");
                }
                other => panic!("expected a ping frame, got {other:?}"),
            }
        }
        let _ = socket.close(None).await;

        server_agent.stop().await.expect("stop agent");
    }
}
