//! Relay-based discovery and offline retrieval, per `spec.md` §4.11
//! "Discovery" and "Offline retrieval".

use crate::crypto::PeerKeyCache;
use crate::kinds::{custom_tag, RelayKinds};
use nostr::{EventBuilder, Filter, Tag, Timestamp};
use nostr_sdk::Client;
use snap_core::{AgentCard, Envelope, SignedCard};
use snap_crypto::Keypair32;
use snap_error::{ErrorCode, SnapError};
use std::time::Duration;
use tracing::warn;

/// An optional narrowing for [`discover_agents`]. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryQuery {
    /// Match only this exact P2TR address.
    pub identity: Option<String>,
    /// Match cards advertising at least one of these skill ids.
    pub skills: Vec<String>,
    /// Match cards whose `name` contains this substring (case-insensitive).
    pub name: Option<String>,
}

/// Publish `card` (signed with `keypair`) as a replaceable relay event.
///
/// `spec.md` §4.11: identifier tag = `card.identity`, plus `name`,
/// `version`, one `skill` tag per skill, one `endpoint` tag per transport,
/// and one `relay` tag per relay. The content is the full signed card JSON
/// rather than the bare [`AgentCard`], so a discoverer can verify
/// authenticity independent of trusting the relay's own event signature.
pub(crate) async fn publish_agent_card(
    client: &Client,
    keypair: &Keypair32,
    kinds: &RelayKinds,
    card: &AgentCard,
) -> Result<(), SnapError> {
    let now = chrono_now_secs();
    let signed = snap_sig::sign_card(card.clone(), keypair, now)
        .map_err(|e| SnapError::new(ErrorCode::Internal, format!("failed to sign card: {e}")))?;
    let content = serde_json::to_string(&signed)
        .map_err(|e| SnapError::new(ErrorCode::Internal, e.to_string()))?;

    let mut tags = vec![
        Tag::identifier(card.identity.clone()),
        custom_tag("name", card.name.clone()),
        custom_tag("version", card.version.clone()),
    ];
    for skill in &card.skills {
        tags.push(Tag::custom(
            nostr::TagKind::custom("skill"),
            vec![skill.id.clone(), skill.name.clone()],
        ));
    }
    for endpoint in &card.transports {
        tags.push(Tag::custom(
            nostr::TagKind::custom("endpoint"),
            vec![endpoint.kind.clone(), endpoint.url.clone()],
        ));
    }
    for relay in &card.relays {
        tags.push(custom_tag("relay", relay.clone()));
    }

    let own_secret = crate::crypto::internal_nostr_secret(keypair)?;
    let event = EventBuilder::new(kinds.card_kind(), content)
        .tags(tags)
        .sign_with_keys(&nostr::Keys::new(own_secret))
        .map_err(|e| SnapError::new(ErrorCode::Internal, format!("failed to sign card event: {e}")))?;

    let output = client
        .send_event(event)
        .await
        .map_err(|e| SnapError::new(ErrorCode::AllRelaysFailed, format!("card publish failed: {e}")))?;
    if output.success.is_empty() {
        return Err(SnapError::new(ErrorCode::AllRelaysFailed, "every configured relay rejected the card publish"));
    }
    Ok(())
}

/// Query connected relays for agent cards matching `query`, verifying each
/// and populating `cache` from `(card.identity, event.pubkey)`.
///
/// NIP-01 relays only index single-letter tag filters (`#d`, `#p`, `#e`,
/// ...); `skill`/`name` are multi-character tags with no such relay-side
/// index, so those two constraints are applied client-side against the
/// cards a broader `#d`/kind query returns.
pub(crate) async fn discover_agents(
    client: &Client,
    cache: &PeerKeyCache,
    kinds: &RelayKinds,
    query: &DiscoveryQuery,
    timeout: Duration,
) -> Result<Vec<AgentCard>, SnapError> {
    let mut filter = Filter::new().kind(kinds.card_kind());
    if let Some(identity) = &query.identity {
        filter = filter.identifier(identity.clone());
    }

    let events = client
        .fetch_events(vec![filter], timeout)
        .await
        .map_err(|e| SnapError::new(ErrorCode::DiscoveryTimeout, format!("card discovery failed: {e}")))?;

    let mut cards = Vec::new();
    for event in events.iter() {
        let signed: SignedCard = match serde_json::from_str(&event.content) {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "snap_transport_relay", %e, "skipping malformed card event");
                continue;
            }
        };
        match snap_sig::verify_card(&signed) {
            Ok(true) => {}
            Ok(false) => {
                warn!(target: "snap_transport_relay", identity = %signed.card.identity, "skipping card with invalid signature");
                continue;
            }
            Err(e) => {
                warn!(target: "snap_transport_relay", %e, "skipping card that failed to verify");
                continue;
            }
        }

        if !query.skills.is_empty() && !signed.card.skills.iter().any(|s| query.skills.contains(&s.id)) {
            continue;
        }
        if let Some(name) = &query.name {
            if !signed.card.name.to_lowercase().contains(&name.to_lowercase()) {
                continue;
            }
        }

        cache.insert(&signed.card.identity, event.pubkey).await;
        cards.push(signed.card);
    }
    Ok(cards)
}

/// Fetch and decrypt every storable message addressed to this agent since
/// `since` (seconds since the epoch), dropping identity mismatches.
pub(crate) async fn fetch_offline_messages(
    client: &Client,
    keypair: &Keypair32,
    kinds: &RelayKinds,
    since: u64,
    timeout: Duration,
) -> Result<Vec<Envelope>, SnapError> {
    let own_secret = crate::crypto::internal_nostr_secret(keypair)?;
    let own_public = crate::crypto::internal_nostr_public(keypair)?;

    let filter = Filter::new()
        .kind(kinds.message_kind(crate::kinds::MessageKind::Storable))
        .pubkey(own_public)
        .since(Timestamp::from(since));

    let events = client
        .fetch_events(vec![filter], timeout)
        .await
        .map_err(|e| SnapError::new(ErrorCode::DiscoveryTimeout, format!("offline fetch failed: {e}")))?;

    let mut messages = Vec::new();
    for event in events.iter() {
        match crate::codec::decrypt_verified(&own_secret, event) {
            Ok(Some(envelope)) => messages.push(envelope),
            Ok(None) => {
                warn!(target: "snap_transport_relay", event_id = %event.id, "dropping offline message with mismatched identity");
            }
            Err(e) => {
                warn!(target: "snap_transport_relay", %e, "dropping undecryptable offline message");
            }
        }
    }
    Ok(messages)
}

fn chrono_now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
