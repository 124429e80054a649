//! Relay-layer encryption: NIP-44 versioned authenticated encryption keyed
//! off the *internal* key `P`/`s` (never the tweaked `Q`/`s'` SNAP envelopes
//! sign with), plus the `P2TR -> P` cache `discoverAgents` populates.
//!
//! `spec.md` §4.11: "Because P2TR addresses do not reveal P, a recipient's
//! internal pubkey must be learned out-of-band or via discovery."

use nostr::nips::nip44;
use snap_crypto::Keypair32;
use snap_error::{ErrorCode, SnapError};
use std::collections::HashMap;
use tokio::sync::RwLock;

fn encrypt_error(e: impl std::fmt::Display) -> SnapError {
    SnapError::new(ErrorCode::Internal, format!("nip44 encrypt failed: {e}"))
}

fn decrypt_error(e: impl std::fmt::Display) -> SnapError {
    SnapError::new(ErrorCode::InvalidMessage, format!("nip44 decrypt failed: {e}"))
}

/// Convert this agent's internal (untweaked) secret into a `nostr` secret
/// key, for relay-layer encryption and event signing.
pub(crate) fn internal_nostr_secret(keypair: &Keypair32) -> Result<nostr::SecretKey, SnapError> {
    nostr::SecretKey::from_slice(&keypair.secret.secret_bytes())
        .map_err(|e| SnapError::new(ErrorCode::Internal, format!("invalid internal secret: {e}")))
}

/// Convert this agent's internal x-only public key `P` into a `nostr`
/// public key.
pub(crate) fn internal_nostr_public(keypair: &Keypair32) -> Result<nostr::PublicKey, SnapError> {
    xonly_to_nostr(&keypair.internal_key)
}

/// Convert a bitcoin x-only public key into a `nostr` public key. Both are
/// 32-byte BIP-340 x-only points, so this is a bare reinterpretation.
pub(crate) fn xonly_to_nostr(
    xonly: &bitcoin::secp256k1::XOnlyPublicKey,
) -> Result<nostr::PublicKey, SnapError> {
    nostr::PublicKey::from_slice(&xonly.serialize())
        .map_err(|e| SnapError::new(ErrorCode::IdentityInvalid, format!("invalid relay pubkey: {e}")))
}

/// Encrypt `plaintext` to `peer` using this agent's internal secret.
pub(crate) fn encrypt_to(
    own_secret: &nostr::SecretKey,
    peer: &nostr::PublicKey,
    plaintext: &str,
) -> Result<String, SnapError> {
    nip44::encrypt(own_secret, peer, plaintext, nip44::Version::V2).map_err(encrypt_error)
}

/// Decrypt `ciphertext` sent by `peer` (their relay-layer pubkey, i.e. the
/// event's own `pubkey` field) using this agent's internal secret.
pub(crate) fn decrypt_from(
    own_secret: &nostr::SecretKey,
    peer: &nostr::PublicKey,
    ciphertext: &str,
) -> Result<String, SnapError> {
    nip44::decrypt(own_secret, peer, ciphertext).map_err(decrypt_error)
}

/// Whether `event_pubkey`'s taproot-tweaked P2TR address equals `claimed_from`.
///
/// The relay transport's core defense: a relay event's `pubkey` is the
/// sender's *internal* key `P`, which an attacker cannot forge to match an
/// arbitrary envelope `from` without knowing that identity's private key.
pub(crate) fn identity_matches(event_pubkey: &nostr::PublicKey, claimed_from: &str) -> bool {
    let Ok(xonly) = bitcoin::secp256k1::XOnlyPublicKey::from_slice(&event_pubkey.to_bytes()) else {
        return false;
    };
    let Ok((claimed_q, _network)) = snap_crypto::decode_p2tr(claimed_from) else {
        return false;
    };
    snap_crypto::taproot_tweak(&xonly) == claimed_q
}

/// Maps a P2TR address to the peer's internal key `P`, populated by
/// `discoverAgents` (and opportunistically by any identity-verified inbound
/// event, since the sender's `P` is free information once verified).
#[derive(Default)]
pub struct PeerKeyCache {
    inner: RwLock<HashMap<String, nostr::PublicKey>>,
}

impl PeerKeyCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `p2tr`'s internal key.
    pub(crate) async fn insert(&self, p2tr: &str, internal_key: nostr::PublicKey) {
        self.inner.write().await.insert(p2tr.to_string(), internal_key);
    }

    /// Look up `p2tr`'s internal key, if known.
    pub async fn get(&self, p2tr: &str) -> Option<nostr::PublicKey> {
        self.inner.read().await.get(p2tr).copied()
    }

    /// The number of distinct peers currently cached. Exposed for tests.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;
    use snap_crypto::{derive_keypair, Network};

    fn keypair(n: u8) -> Keypair32 {
        derive_keypair(SecretKey::from_slice(&[n; 32]).unwrap(), Network::Bitcoin).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let alice = keypair(1);
        let bob = keypair(2);
        let alice_secret = internal_nostr_secret(&alice).unwrap();
        let bob_secret = internal_nostr_secret(&bob).unwrap();
        let bob_public = internal_nostr_public(&bob).unwrap();
        let alice_public = internal_nostr_public(&alice).unwrap();

        let ciphertext = encrypt_to(&alice_secret, &bob_public, "hello bob").unwrap();
        let plaintext = decrypt_from(&bob_secret, &alice_public, &ciphertext).unwrap();
        assert_eq!(plaintext, "hello bob");
    }

    #[test]
    fn identity_matches_own_address() {
        let kp = keypair(3);
        let internal_public = internal_nostr_public(&kp).unwrap();
        assert!(identity_matches(&internal_public, &kp.address));
    }

    #[test]
    fn identity_does_not_match_someone_elses_address() {
        let kp_a = keypair(4);
        let kp_b = keypair(5);
        let internal_public_a = internal_nostr_public(&kp_a).unwrap();
        assert!(!identity_matches(&internal_public_a, &kp_b.address));
    }

    #[tokio::test]
    async fn cache_round_trips() {
        let cache = PeerKeyCache::new();
        let kp = keypair(6);
        let key = internal_nostr_public(&kp).unwrap();
        assert!(cache.get(&kp.address).await.is_none());
        cache.insert(&kp.address, key).await;
        assert_eq!(cache.get(&kp.address).await, Some(key));
        assert_eq!(cache.len().await, 1);
    }
}
