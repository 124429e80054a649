//! Encrypting an [`Envelope`] into a relay event's `content`, and the
//! reverse: decrypt, parse, and enforce identity verification in one step.

use crate::crypto;
use snap_core::Envelope;
use snap_error::{ErrorCode, SnapError};

/// Encrypt `envelope` to `peer` using `own_secret`.
pub(crate) fn encrypt(
    own_secret: &nostr::SecretKey,
    peer: &nostr::PublicKey,
    envelope: &Envelope,
) -> Result<String, SnapError> {
    let json = serde_json::to_string(envelope)
        .map_err(|e| SnapError::new(ErrorCode::InvalidMessage, e.to_string()))?;
    crypto::encrypt_to(own_secret, peer, &json)
}

/// Decrypt `event.content` (sent by `event.pubkey`) with `own_secret`, parse
/// it as an [`Envelope`], and enforce `spec.md` §4.11's identity-mismatch
/// defense: the envelope's `from` must equal the tweaked encoding of
/// `event.pubkey`. Returns `Ok(None)` (not an error) for an identity
/// mismatch, since the correct response to a forged `from` is to silently
/// drop the event, not to fail the caller's whole operation.
pub(crate) fn decrypt_verified(
    own_secret: &nostr::SecretKey,
    event: &nostr::Event,
) -> Result<Option<Envelope>, SnapError> {
    let plaintext = crypto::decrypt_from(own_secret, &event.pubkey, &event.content)?;
    let envelope: Envelope = serde_json::from_str(&plaintext)
        .map_err(|e| SnapError::new(ErrorCode::InvalidMessage, format!("malformed encrypted envelope: {e}")))?;
    if !crypto::identity_matches(&event.pubkey, &envelope.from) {
        return Ok(None);
    }
    Ok(Some(envelope))
}
