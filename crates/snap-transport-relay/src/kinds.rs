//! Relay event kinds and the tag discipline `spec.md` §9's "Relay surface"
//! note spells out. Kind numbers are configurable per [`RelayConfig`](crate::RelayConfig).

use nostr::{Kind, PublicKey, Tag, TagKind};

/// The default agent-card kind: an addressable (parameterized-replaceable)
/// event, so republishing with the same `d` tag replaces the prior card.
pub const DEFAULT_CARD_KIND: u16 = 31337;
/// The default ephemeral message kind: relays forward but never store it.
pub const DEFAULT_EPHEMERAL_KIND: u16 = 21339;
/// The default storable message kind: relays persist it for offline retrieval.
pub const DEFAULT_STORABLE_KIND: u16 = 4339;

/// Which message kind mirrors the routing an outbound envelope needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Forwarded live, never persisted.
    Ephemeral,
    /// Persisted by relays for later retrieval.
    Storable,
}

/// Resolved numeric kinds for one [`RelayTransport`](crate::RelayTransport).
#[derive(Debug, Clone, Copy)]
pub struct RelayKinds {
    /// The agent-card kind.
    pub card: u16,
    /// The ephemeral message kind.
    pub ephemeral: u16,
    /// The storable message kind.
    pub storable: u16,
}

impl Default for RelayKinds {
    fn default() -> Self {
        Self {
            card: DEFAULT_CARD_KIND,
            ephemeral: DEFAULT_EPHEMERAL_KIND,
            storable: DEFAULT_STORABLE_KIND,
        }
    }
}

impl RelayKinds {
    /// The numeric kind for `message_kind`.
    #[must_use]
    pub fn message_kind(&self, message_kind: MessageKind) -> Kind {
        match message_kind {
            MessageKind::Ephemeral => Kind::Custom(self.ephemeral),
            MessageKind::Storable => Kind::Custom(self.storable),
        }
    }

    /// Both message kinds, for inbound subscriptions that must match either.
    #[must_use]
    pub fn message_kinds(&self) -> Vec<Kind> {
        vec![Kind::Custom(self.ephemeral), Kind::Custom(self.storable)]
    }

    /// The card kind.
    #[must_use]
    pub fn card_kind(&self) -> Kind {
        Kind::Custom(self.card)
    }

    /// Classify an inbound event's numeric kind, so a response can mirror
    /// the request's ephemeral-vs-storable routing. Defaults to ephemeral
    /// for an unrecognized kind (never silently persists something the
    /// sender did not ask to persist).
    #[must_use]
    pub fn classify(&self, kind: Kind) -> MessageKind {
        if kind.as_u16() == self.storable {
            MessageKind::Storable
        } else {
            MessageKind::Ephemeral
        }
    }
}

/// A `#p`-tagged recipient-routing tag.
pub(crate) fn p_tag(recipient: &PublicKey) -> Tag {
    Tag::public_key(*recipient)
}

/// An `#e`-tagged correlation tag referencing the event being replied to.
pub(crate) fn e_tag(event_id: &nostr::EventId) -> Tag {
    Tag::event(*event_id)
}

/// A searchable single-value custom tag, e.g. `name`/`version`.
pub(crate) fn custom_tag(name: &'static str, value: impl Into<String>) -> Tag {
    Tag::custom(TagKind::custom(name), vec![value.into()])
}
