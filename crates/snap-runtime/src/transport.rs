//! The transport plugin contract the agent runtime drives.

use async_trait::async_trait;
use snap_core::Envelope;
use snap_error::SnapError;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

/// A lazy, finite sequence of envelopes — what a streaming call yields, or
/// what a stream handler produces. All but the last item are `type=event`;
/// the last is `type=response`.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Envelope> + Send>>;

/// What a transport calls back into on an inbound connection/event.
///
/// `Agent` (in `agent.rs`) implements this; transports only see the trait
/// object, so they cannot reach into runtime internals they have no
/// business touching.
#[async_trait]
pub trait InboundHooks: Send + Sync {
    /// Run the full inbound pipeline for a single request/response/event
    /// envelope, returning the signed response envelope to send back (or an
    /// error for the transport to map to its native failure channel).
    async fn process_message(&self, inbound: Envelope) -> Result<Envelope, SnapError>;

    /// Run the full inbound pipeline for an envelope whose method routes to
    /// a stream handler, returning the lazy sequence of envelopes to relay.
    async fn process_stream(&self, inbound: Envelope) -> Result<EnvelopeStream, SnapError>;

    /// The agent's current signed card, for transports that serve a
    /// well-known discovery document.
    async fn signed_card(&self) -> snap_core::SignedCard;
}

/// A pluggable transport: connection-oriented HTTP, full-duplex socket, or
/// an encrypted pub/sub relay.
///
/// `start`/`stop` bind/unbind the transport's inbound hook to `hooks`;
/// `send`/`send_stream` carry this agent's outbound calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// A short, stable name identifying this transport kind (e.g. `"http"`).
    fn kind(&self) -> &str;

    /// Begin listening/subscribing, routing inbound traffic to `hooks`.
    /// Must be idempotent.
    async fn start(&self, hooks: Arc<dyn InboundHooks>) -> Result<(), SnapError>;

    /// Stop listening/subscribing. Reverse of `start`.
    async fn stop(&self) -> Result<(), SnapError>;

    /// Send `envelope` to `endpoint` and wait for the single response
    /// envelope.
    async fn send(&self, envelope: Envelope, endpoint: &str) -> Result<Envelope, SnapError>;

    /// Send `envelope` to `endpoint` and return the lazy sequence of
    /// envelopes the peer emits, terminated by a `type=response` envelope.
    async fn send_stream(&self, envelope: Envelope, endpoint: &str) -> Result<EnvelopeStream, SnapError>;
}
