// SPDX-License-Identifier: MIT OR Apache-2.0
//! The relay transport: an encrypted pub/sub channel over one or more nostr
//! relays, per `spec.md` §4.11. Dual-kind routing (ephemeral/storable),
//! `#e`-tag correlation, addressable agent-card publication, and offline
//! retrieval all live here; the HTTP and socket transports never need any
//! of this because their connections carry the response back directly.
//!
//! Unlike the other transports, a [`RelayTransport`] needs its own copy of
//! the agent's [`Keypair32`]: `Agent` never exposes its keypair to the
//! transports it drives (they only ever see a signed, already-complete
//! [`Envelope`]), but the relay layer has to sign and encrypt nostr events
//! on its own, out of band from envelope signing. Construct it with the
//! same keypair the owning `Agent` uses.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod crypto;
mod discovery;
mod kinds;
mod listen;
mod outbound;

pub use crypto::PeerKeyCache;
pub use discovery::DiscoveryQuery;
pub use kinds::RelayKinds;

use async_trait::async_trait;
use nostr_sdk::Client;
use snap_core::{AgentCard, Envelope};
use snap_crypto::Keypair32;
use snap_error::{ErrorCode, SnapError};
use snap_runtime::{EnvelopeStream, InboundHooks, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Configuration for a [`RelayTransport`]: which relays to use, which kind
/// numbers to speak, and the default persistence/timeout policy.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay URLs to connect to (e.g. `wss://relay.example.com`).
    pub relays: Vec<String>,
    /// The three kind numbers this transport speaks.
    pub kinds: RelayKinds,
    /// Whether `send`/`send_stream` publish as the storable kind by
    /// default. `spec.md` ties this to whether the sender knows the
    /// recipient is offline; since [`Transport::send`] carries no such
    /// side channel, this flag is the caller's declared default instead.
    pub persist_by_default: bool,
    /// How long a unary `send`/`send_stream` call waits for a correlated
    /// reply before failing with [`ErrorCode::TransportTimeout`].
    pub call_timeout: Duration,
    /// How long `discover_agents`/`fetch_offline_messages` wait for relays
    /// to answer a query before failing with [`ErrorCode::DiscoveryTimeout`].
    pub query_timeout: Duration,
}

impl RelayConfig {
    /// A config pointed at `relays` with every other field defaulted.
    #[must_use]
    pub fn new(relays: Vec<String>) -> Self {
        Self {
            relays,
            kinds: RelayKinds::default(),
            persist_by_default: false,
            call_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(10),
        }
    }

    /// Override the persistence default.
    #[must_use]
    pub fn with_persist_by_default(mut self, persist: bool) -> Self {
        self.persist_by_default = persist;
        self
    }

    /// Override the three kind numbers.
    #[must_use]
    pub fn with_kinds(mut self, kinds: RelayKinds) -> Self {
        self.kinds = kinds;
        self
    }
}

/// The relay transport plugin: an encrypted pub/sub channel shared by the
/// agent's inbound listener and its outbound calls.
pub struct RelayTransport {
    client: Client,
    keypair: Keypair32,
    config: RelayConfig,
    cache: Arc<PeerKeyCache>,
    listener: Mutex<Option<JoinHandle<()>>>,
    connected: RwLock<bool>,
}

impl RelayTransport {
    /// Build a transport for `keypair` (must be the same keypair the owning
    /// `Agent` was constructed with) talking to `config.relays`. Does not
    /// connect; call [`Transport::start`] (for inbound listening) or any
    /// outbound/discovery method to trigger a connection.
    #[must_use]
    pub fn new(keypair: Keypair32, config: RelayConfig) -> Self {
        Self {
            client: Client::default(),
            keypair,
            config,
            cache: Arc::new(PeerKeyCache::new()),
            listener: Mutex::new(None),
            connected: RwLock::new(false),
        }
    }

    /// The peer-identity cache `discover_agents` populates and `send`/
    /// `send_stream` consult to resolve a P2TR address to its internal key.
    #[must_use]
    pub fn peer_cache(&self) -> Arc<PeerKeyCache> {
        Arc::clone(&self.cache)
    }

    async fn ensure_connected(&self) -> Result<(), SnapError> {
        if *self.connected.read().await {
            return Ok(());
        }
        let mut connected = self.connected.write().await;
        if *connected {
            return Ok(());
        }
        if self.config.relays.is_empty() {
            return Err(SnapError::new(ErrorCode::TransportUnavailable, "no relays configured"));
        }
        for relay in &self.config.relays {
            self.client
                .add_relay(relay.as_str())
                .await
                .map_err(|e| SnapError::new(ErrorCode::TransportUnavailable, format!("failed to add relay {relay}: {e}")))?;
        }
        self.client.connect().await;
        *connected = true;
        Ok(())
    }

    /// Publish this agent's card as a replaceable relay event, per
    /// `spec.md` §4.11 "Discovery".
    pub async fn publish_agent_card(&self, card: &AgentCard) -> Result<(), SnapError> {
        self.ensure_connected().await?;
        discovery::publish_agent_card(&self.client, &self.keypair, &self.config.kinds, card).await
    }

    /// Query connected relays for agent cards matching `query`, verifying
    /// each and populating the peer-identity cache as a side effect.
    pub async fn discover_agents(&self, query: &DiscoveryQuery) -> Result<Vec<AgentCard>, SnapError> {
        self.ensure_connected().await?;
        discovery::discover_agents(&self.client, &self.cache, &self.config.kinds, query, self.config.query_timeout).await
    }

    /// Fetch and decrypt every storable message addressed to this agent
    /// published since `since` (seconds since the epoch).
    pub async fn fetch_offline_messages(&self, since: u64) -> Result<Vec<Envelope>, SnapError> {
        self.ensure_connected().await?;
        discovery::fetch_offline_messages(&self.client, &self.keypair, &self.config.kinds, since, self.config.query_timeout).await
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn kind(&self) -> &str {
        "relay"
    }

    async fn start(&self, hooks: Arc<dyn InboundHooks>) -> Result<(), SnapError> {
        self.ensure_connected().await?;
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let client = self.client.clone();
        let keypair = self.keypair.clone();
        let kinds = self.config.kinds;
        let handle = tokio::spawn(listen::run(client, keypair, kinds, hooks));
        *slot = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SnapError> {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        // Dropping notification receivers on abort leaves the relay pool
        // connected; disconnect it explicitly so a restart reconnects clean.
        self.client.disconnect().await;
        *self.connected.write().await = false;
        Ok(())
    }

    async fn send(&self, envelope: Envelope, _endpoint: &str) -> Result<Envelope, SnapError> {
        self.ensure_connected().await?;
        outbound::send(
            &self.client,
            &self.keypair,
            &self.cache,
            &self.config.kinds,
            envelope,
            self.config.persist_by_default,
            self.config.call_timeout,
        )
        .await
    }

    async fn send_stream(&self, envelope: Envelope, _endpoint: &str) -> Result<EnvelopeStream, SnapError> {
        self.ensure_connected().await?;
        outbound::send_stream(
            self.client.clone(),
            self.keypair.clone(),
            &self.cache,
            &self.config.kinds,
            envelope,
            self.config.persist_by_default,
            self.config.call_timeout,
        )
        .await
    }
}
