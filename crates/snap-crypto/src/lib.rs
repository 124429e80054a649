// SPDX-License-Identifier: MIT OR Apache-2.0
//! BIP-340/341 key derivation and P2TR address codec for SNAP identities.
//!
//! A SNAP identity starts from a 32-byte secret and deterministically yields:
//!
//! - the internal x-only public key `P` (BIP-340 even-y normalized),
//! - the BIP-341 tweaked output key `Q = P + H_TapTweak(P)·G`,
//! - the tweaked private scalar `s'` used to sign (`s'·G == Q`), and
//! - the bech32m P2TR address encoding `Q` (witness version 1).
//!
//! The elliptic-curve arithmetic (secret/public key handling, the taproot
//! tweak, and bech32m address encoding) is delegated to the `bitcoin` crate
//! — the same crate the wider Bitcoin Rust ecosystem uses for this exact
//! purpose (see e.g. the taproot-address helpers in zVault/FROST-DAO-style
//! custody code) — rather than re-implemented by hand.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use bitcoin::address::{AddressData, NetworkUnchecked};
use bitcoin::key::{Keypair, TapTweak, TweakedPublicKey};
use bitcoin::secp256k1::{self, schnorr, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use bitcoin::{Address, WitnessVersion};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while deriving keys or encoding/decoding P2TR addresses.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The 32-byte secret is zero or not less than the curve order.
    #[error("invalid secret key")]
    InvalidSecretKey,
    /// The address string could not be parsed as bech32/bech32m at all.
    #[error("malformed P2TR address: {0}")]
    Malformed(String),
    /// The address does not use the human-readable part `bc` or `tb`.
    #[error("unrecognized address prefix")]
    InvalidHrp,
    /// The address's length is not the 62 characters a P2TR address requires.
    #[error("P2TR address must be exactly 62 characters, got {0}")]
    InvalidLength(usize),
    /// The address decoded, but does not belong to the requested network.
    #[error("address does not belong to the expected network")]
    NetworkMismatch,
    /// The address is a valid segwit address, but not witness version 1.
    #[error("expected witness version 1 (taproot), got {0}")]
    WrongWitnessVersion(u8),
    /// The witness program is not the 32 bytes a taproot output key requires.
    #[error("expected a 32-byte witness program, got {0}")]
    InvalidProgramLength(usize),
    /// The address is valid bech32m but not a segwit (witness program) address.
    #[error("not a segwit address")]
    NotSegwit,
    /// Signature bytes did not round-trip through the BIP-340 decoder.
    #[error("invalid BIP-340 signature encoding")]
    InvalidSignature,
}

/// The two networks SNAP identities may belong to.
///
/// SNAP only ever distinguishes mainnet from "everything else" — testnet,
/// signet, and regtest all encode with the `tb` human-readable part and are
/// treated as [`Network::Testnet`] for address purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Mainnet, `bc` human-readable part.
    Bitcoin,
    /// Any test network, `tb` human-readable part.
    Testnet,
}

impl Network {
    /// The bech32 human-readable part for this network.
    #[must_use]
    pub fn hrp(self) -> &'static str {
        match self {
            Self::Bitcoin => "bc",
            Self::Testnet => "tb",
        }
    }

    fn to_bitcoin_network(self) -> bitcoin::Network {
        match self {
            Self::Bitcoin => bitcoin::Network::Bitcoin,
            Self::Testnet => bitcoin::Network::Testnet,
        }
    }
}

/// A fully derived SNAP identity: the internal key, the tweaked output key,
/// the tweaked signing scalar, and the P2TR address encoding the output key.
#[derive(Clone)]
pub struct Keypair32 {
    /// The original 32-byte secret.
    pub secret: SecretKey,
    /// Internal x-only public key `P`.
    pub internal_key: XOnlyPublicKey,
    /// BIP-341 tweaked output key `Q`.
    pub output_key: XOnlyPublicKey,
    /// Tweaked private scalar `s'` such that `s'·G == Q`.
    pub tweaked_secret: SecretKey,
    /// Bech32m P2TR address encoding `Q`.
    pub address: String,
    /// Network the address was encoded for.
    pub network: Network,
}

/// Return the secp256k1 context shared by all operations in this crate.
fn secp() -> Secp256k1<secp256k1::All> {
    Secp256k1::new()
}

/// Derive the internal x-only public key `P` for secret `s`.
pub fn public_key(secret: &SecretKey) -> XOnlyPublicKey {
    let secp = secp();
    let keypair = Keypair::from_secret_key(&secp, secret);
    let (xonly, _parity) = keypair.x_only_public_key();
    xonly
}

/// Compute the BIP-341 tweaked output key `Q = P + H_TapTweak(P)·G`.
///
/// Deterministic: depends only on `internal_key`. There is no script-path
/// merkle root in SNAP's key-path-only identity scheme, so the tweak is
/// always computed with `merkle_root = None`.
pub fn taproot_tweak(internal_key: &XOnlyPublicKey) -> XOnlyPublicKey {
    let secp = secp();
    let (tweaked, _parity) = internal_key.tap_tweak(&secp, None);
    tweaked.to_inner()
}

/// Adjust secret `s` into the tweaked scalar `s'` such that `s'·G` has the
/// same x-coordinate as `Q = taproot_tweak(public_key(s))`.
///
/// This matches BIP-341 key-path spending semantics, which SNAP reuses for
/// BIP-340 message signing rather than spending.
pub fn tweak_private_key(secret: &SecretKey) -> Result<SecretKey, CryptoError> {
    let secp = secp();
    let keypair = Keypair::from_secret_key(&secp, secret);
    let tweaked = keypair
        .tap_tweak(&secp, None)
        .to_inner();
    Ok(tweaked.secret_key())
}

/// Encode an already-tweaked output key `Q` as a bech32m P2TR address.
pub fn encode_p2tr(output_key: &XOnlyPublicKey, network: Network) -> String {
    let tweaked = TweakedPublicKey::dangerous_assume_tweaked(*output_key);
    Address::p2tr_tweaked(tweaked, network.to_bitcoin_network()).to_string()
}

/// Decode a P2TR address into its tweaked output key `Q` and network.
///
/// Validates: human-readable part is `bc` or `tb`, the address is exactly
/// 62 characters, it decodes as a valid (checksummed) segwit address, its
/// witness version is 1, and its witness program is 32 bytes.
pub fn decode_p2tr(address: &str) -> Result<(XOnlyPublicKey, Network), CryptoError> {
    if address.len() != 62 {
        return Err(CryptoError::InvalidLength(address.len()));
    }
    let sep = address.rfind('1').ok_or_else(|| CryptoError::Malformed(address.to_string()))?;
    let network = match &address[..sep] {
        "bc" => Network::Bitcoin,
        "tb" => Network::Testnet,
        _ => return Err(CryptoError::InvalidHrp),
    };

    let unchecked: Address<NetworkUnchecked> =
        Address::from_str(address).map_err(|e| CryptoError::Malformed(e.to_string()))?;
    let checked = unchecked
        .require_network(network.to_bitcoin_network())
        .map_err(|_| CryptoError::NetworkMismatch)?;

    match checked.to_address_data() {
        AddressData::Segwit { witness_program } => {
            if witness_program.version() != WitnessVersion::V1 {
                return Err(CryptoError::WrongWitnessVersion(
                    witness_program.version().to_num(),
                ));
            }
            let program = witness_program.program().as_bytes();
            if program.len() != 32 {
                return Err(CryptoError::InvalidProgramLength(program.len()));
            }
            let xonly = XOnlyPublicKey::from_slice(program)
                .map_err(|_| CryptoError::InvalidProgramLength(program.len()))?;
            Ok((xonly, network))
        }
        _ => Err(CryptoError::NotSegwit),
    }
}

/// Derive the full [`Keypair32`] identity for secret `s` on `network`.
pub fn derive_keypair(secret: SecretKey, network: Network) -> Result<Keypair32, CryptoError> {
    let internal_key = public_key(&secret);
    let output_key = taproot_tweak(&internal_key);
    let tweaked_secret = tweak_private_key(&secret)?;
    let address = encode_p2tr(&output_key, network);
    Ok(Keypair32 {
        secret,
        internal_key,
        output_key,
        tweaked_secret,
        address,
        network,
    })
}

/// Sign a 32-byte hash with the tweaked scalar `s'`, producing a BIP-340
/// Schnorr signature.
pub fn sign_hash(tweaked_secret: &SecretKey, hash: &[u8; 32]) -> schnorr::Signature {
    let secp = secp();
    let keypair = Keypair::from_secret_key(&secp, tweaked_secret);
    let message = Message::from_digest(*hash);
    secp.sign_schnorr(&message, &keypair)
}

/// Verify a BIP-340 Schnorr signature against the tweaked output key `Q`.
pub fn verify_hash(output_key: &XOnlyPublicKey, hash: &[u8; 32], sig: &schnorr::Signature) -> bool {
    let secp = secp();
    let message = Message::from_digest(*hash);
    secp.verify_schnorr(sig, &message, output_key).is_ok()
}

/// Parse a 128-character lowercase hex signature into a Schnorr signature.
pub fn parse_signature_hex(hex_sig: &str) -> Result<schnorr::Signature, CryptoError> {
    let bytes = hex::decode(hex_sig).map_err(|_| CryptoError::InvalidSignature)?;
    schnorr::Signature::from_slice(&bytes).map_err(|_| CryptoError::InvalidSignature)
}

/// Parse 64 raw bytes of secret key material.
pub fn secret_key_from_bytes(bytes: &[u8; 32]) -> Result<SecretKey, CryptoError> {
    SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_from_u64(n: u64) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        SecretKey::from_slice(&bytes).unwrap()
    }

    #[test]
    fn derive_keypair_is_deterministic() {
        let s = secret_from_u64(1);
        let a = derive_keypair(s, Network::Bitcoin).unwrap();
        let b = derive_keypair(s, Network::Bitcoin).unwrap();
        assert_eq!(a.address, b.address);
        assert_eq!(a.output_key, b.output_key);
    }

    #[test]
    fn different_secrets_yield_different_identities() {
        let a = derive_keypair(secret_from_u64(1), Network::Bitcoin).unwrap();
        let b = derive_keypair(secret_from_u64(2), Network::Bitcoin).unwrap();
        assert_ne!(a.address, b.address);
        assert_ne!(a.output_key, b.output_key);
    }

    #[test]
    fn address_starts_with_expected_hrp() {
        let mainnet = derive_keypair(secret_from_u64(1), Network::Bitcoin).unwrap();
        assert!(mainnet.address.starts_with("bc1p"));
        let testnet = derive_keypair(secret_from_u64(1), Network::Testnet).unwrap();
        assert!(testnet.address.starts_with("tb1p"));
    }

    #[test]
    fn address_round_trips_through_decode() {
        let kp = derive_keypair(secret_from_u64(42), Network::Bitcoin).unwrap();
        let (decoded_q, network) = decode_p2tr(&kp.address).unwrap();
        assert_eq!(decoded_q, kp.output_key);
        assert_eq!(network, Network::Bitcoin);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_p2tr("bc1pshort").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidLength(_)));
    }

    #[test]
    fn decode_rejects_unknown_hrp() {
        // 62 chars total, but wrong prefix -- still exercises the length
        // gate's sibling check (hrp) once length happens to line up.
        let fake = format!("xx1{}", "q".repeat(59));
        let err = decode_p2tr(&fake).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidHrp | CryptoError::Malformed(_)
        ));
    }

    #[test]
    fn tweak_is_not_an_involution() {
        // Re-tweaking and re-encoding Q (treating it as if it were P) must
        // yield a distinct address from the original.
        let kp = derive_keypair(secret_from_u64(7), Network::Bitcoin).unwrap();
        let (q, _network) = decode_p2tr(&kp.address).unwrap();
        let re_tweaked = taproot_tweak(&q);
        let re_encoded = encode_p2tr(&re_tweaked, Network::Bitcoin);
        assert_ne!(re_encoded, kp.address);
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = derive_keypair(secret_from_u64(99), Network::Bitcoin).unwrap();
        let hash = [7u8; 32];
        let sig = sign_hash(&kp.tweaked_secret, &hash);
        assert!(verify_hash(&kp.output_key, &hash, &sig));
    }

    #[test]
    fn verify_fails_on_mutated_hash() {
        let kp = derive_keypair(secret_from_u64(99), Network::Bitcoin).unwrap();
        let hash = [7u8; 32];
        let sig = sign_hash(&kp.tweaked_secret, &hash);
        let mut mutated = hash;
        mutated[0] ^= 0x01;
        assert!(!verify_hash(&kp.output_key, &mutated, &sig));
    }

    #[test]
    fn verify_fails_against_wrong_key() {
        let kp_a = derive_keypair(secret_from_u64(1), Network::Bitcoin).unwrap();
        let kp_b = derive_keypair(secret_from_u64(2), Network::Bitcoin).unwrap();
        let hash = [3u8; 32];
        let sig = sign_hash(&kp_a.tweaked_secret, &hash);
        assert!(!verify_hash(&kp_b.output_key, &hash, &sig));
    }

    #[test]
    fn signature_hex_round_trip() {
        let kp = derive_keypair(secret_from_u64(5), Network::Bitcoin).unwrap();
        let hash = [1u8; 32];
        let sig = sign_hash(&kp.tweaked_secret, &hash);
        let hex_sig = hex::encode(sig.as_ref());
        assert_eq!(hex_sig.len(), 128);
        let parsed = parse_signature_hex(&hex_sig).unwrap();
        assert_eq!(parsed, sig);
    }
}
