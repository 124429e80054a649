//! The inbound half: one background task per [`RelayTransport`] subscribing
//! to `#p = [own P]` and dispatching each decrypted, identity-verified
//! request to the bound [`InboundHooks`], per `spec.md` §4.11 "Listen".

use crate::codec;
use crate::kinds::{e_tag, p_tag, RelayKinds};
use nostr::{EventBuilder, Timestamp};
use nostr_sdk::{Client, RelayPoolNotification};
use snap_core::EnvelopeType;
use snap_crypto::Keypair32;
use snap_runtime::InboundHooks;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

/// Run until `client`'s notification channel closes (on disconnect/shutdown).
pub(crate) async fn run(client: Client, keypair: Keypair32, kinds: RelayKinds, hooks: Arc<dyn InboundHooks>) {
    let own_secret = match crate::crypto::internal_nostr_secret(&keypair) {
        Ok(s) => s,
        Err(e) => {
            warn!(target: "snap_transport_relay", error = %e, "cannot derive relay secret, listener not starting");
            return;
        }
    };
    let own_public = match crate::crypto::internal_nostr_public(&keypair) {
        Ok(p) => p,
        Err(e) => {
            warn!(target: "snap_transport_relay", error = %e, "cannot derive relay pubkey, listener not starting");
            return;
        }
    };

    let filter = nostr::Filter::new()
        .kinds(kinds.message_kinds())
        .pubkey(own_public)
        .since(Timestamp::now());
    if let Err(e) = client.subscribe(vec![filter], None).await {
        warn!(target: "snap_transport_relay", error = %e, "relay listen subscription failed");
        return;
    }
    info!(target: "snap_transport_relay", "relay listener subscribed");

    let mut notifications = client.notifications();
    loop {
        let notification = match notifications.recv().await {
            Ok(n) => n,
            Err(_) => break,
        };
        let RelayPoolNotification::Event { event, .. } = notification else {
            continue;
        };

        let envelope = match codec::decrypt_verified(&own_secret, &event) {
            Ok(Some(env)) => env,
            Ok(None) => {
                warn!(target: "snap_transport_relay", event_id = %event.id, "dropping inbound relay event with mismatched identity");
                continue;
            }
            Err(e) => {
                warn!(target: "snap_transport_relay", error = %e, "dropping undecryptable inbound relay event");
                continue;
            }
        };

        if envelope.kind != EnvelopeType::Request {
            // Responses to our own outstanding calls are handled by the
            // send/send_stream correlation loop's own subscription, not here.
            continue;
        }

        let sender = event.pubkey;
        let reply_kind = kinds.classify(event.kind);
        let client = client.clone();
        let hooks = Arc::clone(&hooks);
        let own_secret = own_secret.clone();
        let request_event_id = event.id;

        tokio::spawn(async move {
            if snap_runtime::is_stream_method(&envelope.method) {
                match hooks.process_stream(envelope).await {
                    Ok(mut events) => {
                        while let Some(item) = events.next().await {
                            publish_reply(&client, &own_secret, &sender, &kinds, reply_kind, request_event_id, &item).await;
                        }
                    }
                    Err(e) => warn!(target: "snap_transport_relay", %e, "stream handler failed, no reply published"),
                }
            } else {
                match hooks.process_message(envelope).await {
                    Ok(response) => {
                        publish_reply(&client, &own_secret, &sender, &kinds, reply_kind, request_event_id, &response).await;
                    }
                    Err(e) => warn!(target: "snap_transport_relay", %e, "handler failed, no reply published"),
                }
            }
        });
    }
    info!(target: "snap_transport_relay", "relay listener stopped");
}

async fn publish_reply(
    client: &Client,
    own_secret: &nostr::SecretKey,
    sender: &nostr::PublicKey,
    kinds: &RelayKinds,
    reply_kind: crate::kinds::MessageKind,
    inbound_event_id: nostr::EventId,
    envelope: &snap_core::Envelope,
) {
    let ciphertext = match codec::encrypt(own_secret, sender, envelope) {
        Ok(c) => c,
        Err(e) => {
            warn!(target: "snap_transport_relay", %e, "failed to encrypt reply, swallowing");
            return;
        }
    };
    let event = match EventBuilder::new(kinds.message_kind(reply_kind), ciphertext)
        .tags(vec![p_tag(sender), e_tag(&inbound_event_id)])
        .sign_with_keys(&nostr::Keys::new(own_secret.clone()))
    {
        Ok(event) => event,
        Err(e) => {
            warn!(target: "snap_transport_relay", %e, "failed to sign reply event, swallowing");
            return;
        }
    };
    if let Err(e) = client.send_event(event).await {
        warn!(target: "snap_transport_relay", %e, "failed to publish reply, swallowing (spec.md: publish errors on the listen path are swallowed with a warning)");
    }
}
