//! The [`Envelope`]: SNAP's self-contained, signed wire message.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Maximum serialized size of a whole envelope, per `spec.md` §3.
pub const MAX_ENVELOPE_BYTES: usize = 10 * 1024 * 1024;
/// Maximum serialized size of an envelope's `payload` field.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
/// Maximum JSON nesting depth permitted within `payload`.
pub const MAX_PAYLOAD_DEPTH: u32 = 10;

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid regex"))
}

fn version_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+$").expect("valid regex"))
}

fn method_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]+/[a-z_]+$").expect("valid regex"))
}

fn sig_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{128}$").expect("valid regex"))
}

/// The role an envelope plays in a request/response/event exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// A request awaiting a response; requires `sig`.
    Request,
    /// A reply correlated to a prior request.
    Response,
    /// A fire-and-forget notification, or one item of a stream.
    Event,
}

/// The signed outer JSON carrying one SNAP message.
///
/// Field shapes mirror `spec.md` §3 exactly. Structural constraints (regex,
/// size, nesting) are checked by [`Envelope::check_shape`]; this crate does
/// not check signatures, freshness, or replay — that is `snap-validate`'s
/// job, composed on top of this type.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    /// Unique within `from` for at least 120 seconds. `[A-Za-z0-9_-]{1,128}`.
    pub id: String,
    /// Protocol version, `\d+\.\d+` (currently `"0.1"`).
    pub version: String,
    /// Sender's P2TR address.
    pub from: String,
    /// Recipient's P2TR address. Absent for agent-to-service calls.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<String>,
    /// The envelope's role.
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    /// Operation name, `[a-z]+/[a-z_]+`, at most 64 characters.
    pub method: String,
    /// Method-specific JSON object payload.
    pub payload: Value,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// 128 lowercase hex characters (64-byte BIP-340 Schnorr signature).
    /// Required for `type = request`; optional (but must verify if present)
    /// for `response`/`event`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sig: Option<String>,
}

/// A single structural-shape defect found by [`Envelope::check_shape`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// `id` does not match `[A-Za-z0-9_-]{1,128}`.
    #[error("id must match [A-Za-z0-9_-]{{1,128}}")]
    InvalidId,
    /// `version` does not match `\d+\.\d+`.
    #[error("version must match \\d+\\.\\d+")]
    InvalidVersion,
    /// `method` does not match `[a-z]+/[a-z_]+` or exceeds 64 characters.
    #[error("method must match [a-z]+/[a-z_]+ and be at most 64 characters")]
    InvalidMethod,
    /// `sig` is present but is not 128 lowercase hex characters.
    #[error("sig must be 128 lowercase hex characters")]
    InvalidSigFormat,
    /// `type = request` but `sig` is absent.
    #[error("sig is required when type = request")]
    MissingSig,
    /// `payload` is not a JSON object.
    #[error("payload must be a JSON object")]
    PayloadNotObject,
    /// Serialized `payload` exceeds [`MAX_PAYLOAD_BYTES`].
    #[error("payload exceeds {MAX_PAYLOAD_BYTES} bytes")]
    PayloadTooLarge,
    /// `payload` JSON nesting exceeds [`MAX_PAYLOAD_DEPTH`].
    #[error("payload nesting exceeds {MAX_PAYLOAD_DEPTH}")]
    PayloadTooDeep,
    /// Serialized whole envelope exceeds [`MAX_ENVELOPE_BYTES`].
    #[error("envelope exceeds {MAX_ENVELOPE_BYTES} bytes")]
    EnvelopeTooLarge,
}

impl Envelope {
    /// Check every structural constraint `spec.md` §3/§4.4 places on an
    /// envelope, independent of signature/timestamp/replay checks.
    ///
    /// Returns every violation found rather than stopping at the first, so
    /// callers that want fail-fast behavior (like `snap-validate`) can take
    /// `.first()`.
    pub fn check_shape(&self) -> Vec<ShapeError> {
        let mut errors = Vec::new();

        if !id_pattern().is_match(&self.id) {
            errors.push(ShapeError::InvalidId);
        }
        if !version_pattern().is_match(&self.version) {
            errors.push(ShapeError::InvalidVersion);
        }
        if self.method.len() > 64 || !method_pattern().is_match(&self.method) {
            errors.push(ShapeError::InvalidMethod);
        }

        match (&self.kind, &self.sig) {
            (EnvelopeType::Request, None) => errors.push(ShapeError::MissingSig),
            (_, Some(sig)) if !sig_pattern().is_match(sig) => {
                errors.push(ShapeError::InvalidSigFormat)
            }
            _ => {}
        }

        if !self.payload.is_object() {
            errors.push(ShapeError::PayloadNotObject);
        }
        if let Ok(payload_bytes) = serde_json::to_vec(&self.payload) {
            if payload_bytes.len() > MAX_PAYLOAD_BYTES {
                errors.push(ShapeError::PayloadTooLarge);
            }
        }
        if json_depth(&self.payload) > MAX_PAYLOAD_DEPTH {
            errors.push(ShapeError::PayloadTooDeep);
        }
        if let Ok(whole_bytes) = serde_json::to_vec(self) {
            if whole_bytes.len() > MAX_ENVELOPE_BYTES {
                errors.push(ShapeError::EnvelopeTooLarge);
            }
        }

        errors
    }

    /// Whether `from` and `to` (when both present) share the same network
    /// human-readable prefix (`bc`/`bc` or `tb`/`tb`).
    ///
    /// This only inspects the address strings' bech32 prefixes; it does not
    /// validate that either is a well-formed P2TR address (`snap-crypto`
    /// does that).
    #[must_use]
    pub fn networks_consistent(&self) -> bool {
        let Some(to) = &self.to else {
            return true;
        };
        hrp_of(&self.from) == hrp_of(to)
    }
}

fn hrp_of(address: &str) -> Option<&str> {
    address.split('1').next()
}

/// Recursively compute the nesting depth of a JSON value. A scalar has
/// depth 0; an object/array containing only scalars has depth 1.
fn json_depth(value: &Value) -> u32 {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}
