// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable numeric error codes for SNAP.
//!
//! Every `SnapError` carries an [`ErrorCode`] (a machine-readable, stable
//! numeric code in the ranges defined by the SNAP wire protocol), a
//! human-readable message, an optional cause chain, and arbitrary key-value
//! context. Use the builder returned by [`SnapError::new`] to construct
//! errors fluently.
//!
//! Code ranges (see the protocol's error taxonomy):
//! `1xxx` task/message, `2xxx` authentication, `3xxx` discovery,
//! `4xxx` transport, `5xxx` system.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to, derived from its numeric
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// `1xxx` — task/message structure errors.
    Message,
    /// `2xxx` — authentication errors (signature, identity, freshness, replay).
    Authentication,
    /// `3xxx` — discovery errors (agent cards, relay lookups).
    Discovery,
    /// `4xxx` — transport-level errors.
    Transport,
    /// `5xxx` — system errors.
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Message => "message",
            Self::Authentication => "authentication",
            Self::Discovery => "discovery",
            Self::Transport => "transport",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable numeric error code.
///
/// Codes are grouped by range as described in the module docs. New variants
/// must keep their assigned numeric value stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // -- 1xxx: task/message --
    /// No task exists for the given identifier.
    TaskNotFound,
    /// The requested task state transition is not permitted.
    InvalidTaskState,
    /// Envelope failed to parse or is missing/malformed required fields.
    InvalidMessage,
    /// Payload failed method-specific or structural validation.
    InvalidPayload,
    /// Serialized payload or envelope exceeded the configured size limit.
    PayloadTooLarge,
    /// Payload JSON nesting exceeded the configured depth limit.
    NestingTooDeep,
    /// No handler is registered for the requested method.
    MethodNotFound,
    /// The envelope's `version` is not supported by this agent.
    UnsupportedVersion,

    // -- 2xxx: authentication --
    /// Signature verification failed.
    SignatureInvalid,
    /// A signature was required but absent.
    SignatureMissing,
    /// Decrypted/authenticated sender does not match the claimed `from`.
    IdentityMismatch,
    /// `|now - timestamp|` exceeded the configured clock drift.
    TimestampExpired,
    /// An address failed to decode as a valid P2TR identity.
    IdentityInvalid,
    /// `(from, id)` has already been seen within the replay window.
    DuplicateMessage,
    /// `from` and `to` belong to different networks (mainnet/testnet).
    NetworkMismatch,

    // -- 3xxx: discovery --
    /// No agent could be found matching the discovery query.
    AgentNotFound,
    /// An agent card failed structural validation.
    CardInvalid,
    /// An agent card's signature failed verification.
    CardSignatureInvalid,
    /// A discovery query did not complete before its deadline.
    DiscoveryTimeout,

    // -- 4xxx: transport --
    /// No transport is configured/available for this operation.
    TransportUnavailable,
    /// An outbound call exceeded its timeout.
    TransportTimeout,
    /// The underlying connection closed unexpectedly.
    ConnectionClosed,
    /// Every configured relay rejected a publish attempt.
    AllRelaysFailed,

    // -- 5xxx: system --
    /// Unexpected internal error.
    Internal,
    /// The caller has been rate limited.
    RateLimited,
    /// The service is temporarily unavailable.
    Unavailable,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TaskNotFound
            | Self::InvalidTaskState
            | Self::InvalidMessage
            | Self::InvalidPayload
            | Self::PayloadTooLarge
            | Self::NestingTooDeep
            | Self::MethodNotFound
            | Self::UnsupportedVersion => ErrorCategory::Message,

            Self::SignatureInvalid
            | Self::SignatureMissing
            | Self::IdentityMismatch
            | Self::TimestampExpired
            | Self::IdentityInvalid
            | Self::DuplicateMessage
            | Self::NetworkMismatch => ErrorCategory::Authentication,

            Self::AgentNotFound
            | Self::CardInvalid
            | Self::CardSignatureInvalid
            | Self::DiscoveryTimeout => ErrorCategory::Discovery,

            Self::TransportUnavailable
            | Self::TransportTimeout
            | Self::ConnectionClosed
            | Self::AllRelaysFailed => ErrorCategory::Transport,

            Self::Internal | Self::RateLimited | Self::Unavailable => ErrorCategory::System,
        }
    }

    /// The stable numeric code (e.g. `2001` for [`Self::SignatureInvalid`]).
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::TaskNotFound => 1001,
            Self::InvalidTaskState => 1002,
            Self::InvalidMessage => 1003,
            Self::InvalidPayload => 1004,
            Self::PayloadTooLarge => 1005,
            Self::NestingTooDeep => 1006,
            Self::MethodNotFound => 1007,
            Self::UnsupportedVersion => 1008,

            Self::SignatureInvalid => 2001,
            Self::SignatureMissing => 2002,
            Self::IdentityMismatch => 2003,
            Self::TimestampExpired => 2004,
            Self::IdentityInvalid => 2005,
            Self::DuplicateMessage => 2006,
            Self::NetworkMismatch => 2007,

            Self::AgentNotFound => 3001,
            Self::CardInvalid => 3002,
            Self::CardSignatureInvalid => 3003,
            Self::DiscoveryTimeout => 3004,

            Self::TransportUnavailable => 4001,
            Self::TransportTimeout => 4002,
            Self::ConnectionClosed => 4003,
            Self::AllRelaysFailed => 4004,

            Self::Internal => 5001,
            Self::RateLimited => 5002,
            Self::Unavailable => 5003,
        }
    }

    /// Whether the caller may retry this class of error (with backoff).
    ///
    /// `1xxx`/`2xxx` are non-retriable client errors; `4xxx` and `5001`/`5003`
    /// are retriable; `5002` is retriable but should honor
    /// [`SnapError::retry_after`] if present.
    #[must_use]
    pub fn retriable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport
        ) || matches!(self, Self::Internal | Self::Unavailable | Self::RateLimited)
    }

    /// Native HTTP status code this error maps to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::RateLimited => 429,
            _ => match self.category() {
                ErrorCategory::Message => 400,
                ErrorCategory::Authentication => 401,
                ErrorCategory::Discovery => 404,
                ErrorCategory::Transport => 502,
                ErrorCategory::System => 500,
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// SnapError
// ---------------------------------------------------------------------------

/// Unified SNAP error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, arbitrary structured context, and an
/// optional retry-after hint (used by [`ErrorCode::RateLimited`]).
///
/// # Builder usage
///
/// ```
/// use snap_error::{SnapError, ErrorCode};
///
/// let err = SnapError::new(ErrorCode::TransportTimeout, "no response within 30s")
///     .with_context("method", "message/send")
///     .with_context("timeout_ms", 30_000);
/// assert_eq!(err.code.code(), 4002);
/// ```
pub struct SnapError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
    /// Suggested delay, in seconds, before retrying (set for rate limiting).
    pub retry_after: Option<u64>,
}

impl SnapError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
            retry_after: None,
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a retry-after hint, in seconds.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.retriable()`.
    #[must_use]
    pub fn retriable(&self) -> bool {
        self.code.retriable()
    }

    /// Shorthand for `self.code.http_status()`.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Render this error as the `{error: {code, message, data?}}` payload
    /// shape a response envelope carries per the wire protocol.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.code.code(),
            "message": self.message,
        });
        if !self.context.is_empty() {
            error["data"] = serde_json::to_value(&self.context).unwrap_or_default();
        }
        serde_json::json!({ "error": error })
    }
}

impl fmt::Debug for SnapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("SnapError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        if let Some(ra) = self.retry_after {
            d.field("retry_after", &ra);
        }
        d.finish()
    }
}

impl fmt::Display for SnapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for SnapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::TaskNotFound,
        ErrorCode::InvalidTaskState,
        ErrorCode::InvalidMessage,
        ErrorCode::InvalidPayload,
        ErrorCode::PayloadTooLarge,
        ErrorCode::NestingTooDeep,
        ErrorCode::MethodNotFound,
        ErrorCode::UnsupportedVersion,
        ErrorCode::SignatureInvalid,
        ErrorCode::SignatureMissing,
        ErrorCode::IdentityMismatch,
        ErrorCode::TimestampExpired,
        ErrorCode::IdentityInvalid,
        ErrorCode::DuplicateMessage,
        ErrorCode::NetworkMismatch,
        ErrorCode::AgentNotFound,
        ErrorCode::CardInvalid,
        ErrorCode::CardSignatureInvalid,
        ErrorCode::DiscoveryTimeout,
        ErrorCode::TransportUnavailable,
        ErrorCode::TransportTimeout,
        ErrorCode::ConnectionClosed,
        ErrorCode::AllRelaysFailed,
        ErrorCode::Internal,
        ErrorCode::RateLimited,
        ErrorCode::Unavailable,
    ];

    #[test]
    fn basic_construction() {
        let err = SnapError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
        assert!(err.retry_after.is_none());
    }

    #[test]
    fn display_without_context() {
        let err = SnapError::new(ErrorCode::MethodNotFound, "no such method");
        assert_eq!(err.to_string(), "[1007] no such method");
    }

    #[test]
    fn display_with_context() {
        let err = SnapError::new(ErrorCode::TransportTimeout, "timed out")
            .with_context("timeout_ms", 5000);
        let s = err.to_string();
        assert!(s.starts_with("[4002] timed out"));
        assert!(s.contains("timeout_ms"));
    }

    #[test]
    fn codes_match_spec_numbers() {
        assert_eq!(ErrorCode::InvalidMessage.code(), 1003);
        assert_eq!(ErrorCode::InvalidPayload.code(), 1004);
        assert_eq!(ErrorCode::MethodNotFound.code(), 1007);
        assert_eq!(ErrorCode::SignatureInvalid.code(), 2001);
        assert_eq!(ErrorCode::SignatureMissing.code(), 2002);
        assert_eq!(ErrorCode::IdentityMismatch.code(), 2003);
        assert_eq!(ErrorCode::TimestampExpired.code(), 2004);
        assert_eq!(ErrorCode::IdentityInvalid.code(), 2005);
        assert_eq!(ErrorCode::DuplicateMessage.code(), 2006);
    }

    #[test]
    fn category_ranges() {
        assert_eq!(ErrorCode::InvalidMessage.category(), ErrorCategory::Message);
        assert_eq!(
            ErrorCode::SignatureInvalid.category(),
            ErrorCategory::Authentication
        );
        assert_eq!(ErrorCode::AgentNotFound.category(), ErrorCategory::Discovery);
        assert_eq!(
            ErrorCode::TransportTimeout.category(),
            ErrorCategory::Transport
        );
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::System);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ErrorCode::InvalidMessage.http_status(), 400);
        assert_eq!(ErrorCode::SignatureInvalid.http_status(), 401);
        assert_eq!(ErrorCode::AgentNotFound.http_status(), 404);
        assert_eq!(ErrorCode::TransportTimeout.http_status(), 502);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
    }

    #[test]
    fn retriable_classes() {
        assert!(!ErrorCode::InvalidMessage.retriable());
        assert!(!ErrorCode::SignatureInvalid.retriable());
        assert!(ErrorCode::TransportTimeout.retriable());
        assert!(ErrorCode::Internal.retriable());
        assert!(ErrorCode::Unavailable.retriable());
        assert!(ErrorCode::RateLimited.retriable());
    }

    #[test]
    fn builder_chaining_all() {
        let src = io::Error::other("underlying");
        let err = SnapError::new(ErrorCode::RateLimited, "slow down")
            .with_context("limit", 10)
            .with_source(src)
            .with_retry_after(5);
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert_eq!(err.context["limit"], serde_json::json!(10));
        assert!(err.source.is_some());
        assert_eq!(err.retry_after, Some(5));
    }

    #[test]
    fn to_payload_shape() {
        let err = SnapError::new(ErrorCode::MethodNotFound, "unknown method foo/bar");
        let payload = err.to_payload();
        assert_eq!(payload["error"]["code"], serde_json::json!(1007));
        assert_eq!(
            payload["error"]["message"],
            serde_json::json!("unknown method foo/bar")
        );
        assert!(payload["error"].get("data").is_none());
    }

    #[test]
    fn to_payload_includes_context_as_data() {
        let err = SnapError::new(ErrorCode::InvalidPayload, "bad payload")
            .with_context("field", "timestamp");
        let payload = err.to_payload();
        assert_eq!(payload["error"]["data"]["field"], serde_json::json!("timestamp"));
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = SnapError::new(ErrorCode::Internal, "wrapped").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }

    #[test]
    fn all_codes_unique_numbers() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.code()), "duplicate code: {}", code.code());
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn error_code_serde_roundtrip() {
        let code = ErrorCode::SignatureInvalid;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""SIGNATURE_INVALID""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn error_category_display() {
        assert_eq!(ErrorCategory::Message.to_string(), "message");
        assert_eq!(ErrorCategory::Authentication.to_string(), "authentication");
        assert_eq!(ErrorCategory::System.to_string(), "system");
    }
}
