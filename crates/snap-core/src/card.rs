//! Agent card discovery documents.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum serialized size of an [`AgentCard`], per `spec.md` §3.
pub const MAX_CARD_BYTES: usize = 64 * 1024;

/// A single advertised capability an agent exposes.
///
/// `id` matches `[a-z0-9-]{1,64}`; a card carries 1-100 skills.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Skill {
    /// Stable identifier, `[a-z0-9-]{1,64}`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Free-form discovery tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional example invocations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Accepted input MIME types.
    pub input_modes: Vec<String>,
    /// Produced output MIME types.
    pub output_modes: Vec<String>,
}

/// A transport endpoint an agent can be reached on.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransportEndpoint {
    /// Transport kind, e.g. `"http"`, `"socket"`, `"relay"`.
    pub kind: String,
    /// The endpoint URL.
    pub url: String,
}

/// Optional protocol capability flags a card may advertise.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityFlags {
    /// Whether the agent supports `message/stream`/`tasks/resubscribe`.
    #[serde(default)]
    pub streaming: bool,
    /// Whether the agent supports push notifications for task updates.
    #[serde(default)]
    pub push_notifications: bool,
}

/// A declared outbound rate limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct RateLimit {
    /// Requests this agent accepts per minute.
    pub requests_per_minute: u32,
}

/// Self-description an agent publishes for discovery.
///
/// Serialized form must fit within [`MAX_CARD_BYTES`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentCard {
    /// Human-readable agent name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Agent (not protocol) version string.
    pub version: String,
    /// The agent's P2TR address.
    pub identity: String,
    /// Advertised skills, 1-100 entries.
    pub skills: Vec<Skill>,
    /// Default input MIME types when a skill does not override them.
    pub default_input_modes: Vec<String>,
    /// Default output MIME types when a skill does not override them.
    pub default_output_modes: Vec<String>,
    /// Reachable transport endpoints, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<TransportEndpoint>,
    /// Pub/sub relay URLs this agent listens on, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relays: Vec<String>,
    /// Optional declared protocol capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilityFlags>,
    /// Optional declared rate limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    /// Optional domain this card claims ownership of (for
    /// `discoverViaHttp`'s well-known document flow).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_anchor: Option<String>,
}

/// Structural defects in an [`AgentCard`], checked by [`AgentCard::check_shape`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CardShapeError {
    /// Card has no skills, or more than 100.
    #[error("card must declare between 1 and 100 skills")]
    SkillCount,
    /// A skill's `id` does not match `[a-z0-9-]{1,64}`.
    #[error("skill id {0:?} must match [a-z0-9-]{{1,64}}")]
    InvalidSkillId(String),
    /// Serialized card exceeds [`MAX_CARD_BYTES`].
    #[error("card exceeds {MAX_CARD_BYTES} bytes")]
    TooLarge,
}

fn valid_skill_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl AgentCard {
    /// Check the structural constraints `spec.md` §3 places on agent cards.
    pub fn check_shape(&self) -> Vec<CardShapeError> {
        let mut errors = Vec::new();
        if self.skills.is_empty() || self.skills.len() > 100 {
            errors.push(CardShapeError::SkillCount);
        }
        for skill in &self.skills {
            if !valid_skill_id(&skill.id) {
                errors.push(CardShapeError::InvalidSkillId(skill.id.clone()));
            }
        }
        if let Ok(bytes) = serde_json::to_vec(self) {
            if bytes.len() > MAX_CARD_BYTES {
                errors.push(CardShapeError::TooLarge);
            }
        }
        errors
    }
}

/// An [`AgentCard`] wrapped with a signature proving its `identity` owns it.
///
/// `sig` is computed over `SHA-256(JCS(card) || "|" || timestamp)`; see
/// `snap-sig::sign_card`/`verify_card`. `public_key` is the 32-byte x-only
/// tweaked output key `Q` decoded from `card.identity`, hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SignedCard {
    /// The wrapped card.
    pub card: AgentCard,
    /// 128 lowercase hex characters (64-byte BIP-340 Schnorr signature).
    pub sig: String,
    /// Hex-encoded x-only tweaked output key `Q`, decoded from `card.identity`.
    pub public_key: String,
    /// Seconds since the Unix epoch at which the card was signed.
    pub timestamp: u64,
}
