//! Unary send and streaming send over the relay, per `spec.md` §4.11
//! "Unary send with correlation".

use crate::codec;
use crate::crypto::PeerKeyCache;
use crate::kinds::{p_tag, RelayKinds};
use nostr::{EventBuilder, Filter};
use nostr_sdk::{Client, RelayPoolNotification};
use snap_core::{Envelope, EnvelopeType};
use snap_crypto::Keypair32;
use snap_error::{ErrorCode, SnapError};
use snap_runtime::EnvelopeStream;
use std::time::Duration;
use tracing::warn;

fn references_request(event: &nostr::Event, request_event_id: &nostr::EventId) -> bool {
    let wanted = request_event_id.to_hex();
    event
        .tags
        .iter()
        .any(|t| t.as_slice().len() >= 2 && t.as_slice()[0] == "e" && t.as_slice()[1] == wanted)
}

async fn peer_internal_key(
    cache: &PeerKeyCache,
    peer_address: &str,
) -> Result<nostr::PublicKey, SnapError> {
    cache.get(peer_address).await.ok_or_else(|| {
        SnapError::new(
            ErrorCode::AgentNotFound,
            format!("no known relay identity for {peer_address}; call discoverAgents first"),
        )
    })
}

/// Subscribe for correlated replies, publish the request, and return the
/// subscription id plus the request's own event id (the `#e` correlation
/// anchor) for the caller to filter on.
async fn publish_request(
    client: &Client,
    keypair: &Keypair32,
    kinds: &RelayKinds,
    peer_public: nostr::PublicKey,
    envelope: &Envelope,
    persist: bool,
) -> Result<(nostr::SubscriptionId, nostr::EventId), SnapError> {
    let own_secret = crate::crypto::internal_nostr_secret(keypair)?;
    let own_public = crate::crypto::internal_nostr_public(keypair)?;

    let ciphertext = codec::encrypt(&own_secret, &peer_public, envelope)?;
    let kind = kinds.message_kind(if persist {
        crate::kinds::MessageKind::Storable
    } else {
        crate::kinds::MessageKind::Ephemeral
    });

    let event = EventBuilder::new(kind, ciphertext)
        .tags(vec![p_tag(&peer_public)])
        .sign_with_keys(&nostr::Keys::new(own_secret))
        .map_err(|e| SnapError::new(ErrorCode::Internal, format!("failed to sign relay event: {e}")))?;

    // Subscribe before publish: the subscription must be live before the
    // request goes out, or a fast responder's reply could arrive and be
    // missed entirely.
    let filter = Filter::new()
        .kinds(kinds.message_kinds())
        .pubkey(own_public)
        .event(event.id);
    let subscription = client
        .subscribe(vec![filter], None)
        .await
        .map_err(|e| SnapError::new(ErrorCode::TransportUnavailable, format!("relay subscribe failed: {e}")))?;

    let output = client
        .send_event(event.clone())
        .await
        .map_err(|e| SnapError::new(ErrorCode::AllRelaysFailed, format!("relay publish failed: {e}")))?;
    if output.success.is_empty() {
        return Err(SnapError::new(ErrorCode::AllRelaysFailed, "every configured relay rejected the publish"));
    }

    Ok((subscription.val, event.id))
}

/// Send `envelope` and wait for the single correlated response.
pub(crate) async fn send(
    client: &Client,
    keypair: &Keypair32,
    cache: &PeerKeyCache,
    kinds: &RelayKinds,
    envelope: Envelope,
    persist: bool,
    call_timeout: Duration,
) -> Result<Envelope, SnapError> {
    let peer_address = envelope
        .to
        .clone()
        .ok_or_else(|| SnapError::new(ErrorCode::InvalidMessage, "relay send requires envelope.to"))?;
    let peer_public = peer_internal_key(cache, &peer_address).await?;

    let (subscription_id, request_event_id) =
        publish_request(client, keypair, kinds, peer_public, &envelope, persist).await?;

    let own_secret = crate::crypto::internal_nostr_secret(keypair)?;
    let mut notifications = client.notifications();
    let result = tokio::time::timeout(call_timeout, async {
        loop {
            let notification = notifications
                .recv()
                .await
                .map_err(|e| SnapError::new(ErrorCode::ConnectionClosed, e.to_string()))?;
            let RelayPoolNotification::Event { subscription_id: sid, event, .. } = notification else {
                continue;
            };
            if sid != subscription_id || !references_request(&event, &request_event_id) {
                continue;
            }
            match codec::decrypt_verified(&own_secret, &event) {
                Ok(Some(decrypted)) if decrypted.kind == EnvelopeType::Response => return Ok(decrypted),
                Ok(Some(_)) => continue,
                Ok(None) => {
                    warn!(target: "snap_transport_relay", event_id = %event.id, "dropping relay event with mismatched identity");
                    continue;
                }
                Err(e) => {
                    warn!(target: "snap_transport_relay", error = %e, "dropping undecryptable relay event");
                    continue;
                }
            }
        }
    })
    .await;

    client.unsubscribe(subscription_id).await;

    result.map_err(|_| SnapError::new(ErrorCode::TransportTimeout, "relay call timed out waiting for a response"))?
}

/// Send `envelope` and return the lazy sequence of correlated events,
/// ending at (and including) the first `type=response`.
pub(crate) async fn send_stream(
    client: Client,
    keypair: Keypair32,
    cache: &PeerKeyCache,
    kinds: &RelayKinds,
    envelope: Envelope,
    persist: bool,
    call_timeout: Duration,
) -> Result<EnvelopeStream, SnapError> {
    let peer_address = envelope
        .to
        .clone()
        .ok_or_else(|| SnapError::new(ErrorCode::InvalidMessage, "relay send_stream requires envelope.to"))?;
    let peer_public = peer_internal_key(cache, &peer_address).await?;

    let (subscription_id, request_event_id) =
        publish_request(&client, &keypair, kinds, peer_public, &envelope, persist).await?;
    let own_secret = crate::crypto::internal_nostr_secret(&keypair)?;

    let stream = async_stream_like(client, subscription_id, request_event_id, own_secret, call_timeout);
    Ok(Box::pin(stream))
}

/// Build the lazy sequence by hand (no `async-stream` dependency): each
/// poll waits on the next matching notification, bounded by `call_timeout`,
/// and signals end-of-stream once a `type=response` event arrives or the
/// deadline passes.
fn async_stream_like(
    client: Client,
    subscription_id: nostr::SubscriptionId,
    request_event_id: nostr::EventId,
    own_secret: nostr::SecretKey,
    call_timeout: Duration,
) -> impl tokio_stream::Stream<Item = Envelope> {
    struct State {
        client: Client,
        subscription_id: nostr::SubscriptionId,
        request_event_id: nostr::EventId,
        own_secret: nostr::SecretKey,
        deadline: tokio::time::Instant,
        done: bool,
    }

    let state = State {
        client,
        subscription_id,
        request_event_id,
        own_secret,
        deadline: tokio::time::Instant::now() + call_timeout,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        let mut notifications = state.client.notifications();
        loop {
            let remaining = state.deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                state.client.unsubscribe(state.subscription_id.clone()).await;
                return None;
            }
            let notification = match tokio::time::timeout(remaining, notifications.recv()).await {
                Ok(Ok(notification)) => notification,
                _ => {
                    state.client.unsubscribe(state.subscription_id.clone()).await;
                    return None;
                }
            };
            let RelayPoolNotification::Event { subscription_id: sid, event, .. } = notification else {
                continue;
            };
            if sid != state.subscription_id || !references_request(&event, &state.request_event_id) {
                continue;
            }
            match codec::decrypt_verified(&state.own_secret, &event) {
                Ok(Some(decrypted)) => {
                    if decrypted.kind == EnvelopeType::Response {
                        state.client.unsubscribe(state.subscription_id.clone()).await;
                        state.done = true;
                    }
                    return Some((decrypted, state));
                }
                Ok(None) => {
                    warn!(target: "snap_transport_relay", event_id = %event.id, "dropping relay event with mismatched identity");
                    continue;
                }
                Err(e) => {
                    warn!(target: "snap_transport_relay", error = %e, "dropping undecryptable relay event");
                    continue;
                }
            }
        }
    })
}
