//! Handler function types registered with an [`crate::Agent`].

use crate::transport::EnvelopeStream;
use futures::future::BoxFuture;
use serde_json::Value;
use snap_core::Envelope;
use snap_error::SnapError;
use std::sync::Arc;

/// A unary method handler: given the inbound (validated) envelope, produce
/// the response payload.
pub type UnaryHandler =
    Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<Value, SnapError>> + Send + Sync>;

/// A streaming method handler: given the inbound (validated) envelope,
/// produce the lazy sequence of envelopes to emit. The handler is
/// responsible for signing its own items (it is given the envelope it's
/// responding to, not a signer — callers close over their own keypair).
pub type StreamHandler =
    Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<EnvelopeStream, SnapError>> + Send + Sync>;
