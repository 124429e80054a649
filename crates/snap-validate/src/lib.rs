// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered envelope validation: structure, size, network consistency,
//! freshness, replay, and signature — per `spec.md` §4.4.
//!
//! Checks run in the exact order the spec lists them and fail fast: the
//! first violation short-circuits the rest, so the caller always sees the
//! most "upstream" problem (a malformed `method` is reported before a stale
//! timestamp is even inspected).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snap_core::envelope::ShapeError;
use snap_core::{Envelope, EnvelopeType};
use snap_error::{ErrorCode, SnapError};
use snap_replay::ReplayStore;
use std::time::Duration;
use tracing::{debug, warn};

/// Default permitted clock drift between a message's `timestamp` and the
/// validator's notion of "now", per `spec.md` §4.4.
pub const DEFAULT_MAX_CLOCK_DRIFT: Duration = Duration::from_secs(60);

/// The configuration surface `spec.md` §4.4 grants validators: the
/// freshness and replay checks are each independently skippable (e.g. for
/// transports that have their own freshness guarantees, or test harnesses),
/// and the clock drift tolerance is adjustable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Skip the timestamp freshness check entirely.
    pub skip_timestamp_check: bool,
    /// Maximum permitted `|now - timestamp|`, in seconds.
    pub max_clock_drift_secs: u64,
    /// Skip the replay check entirely (also skips marking the envelope seen).
    pub skip_replay_check: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            skip_timestamp_check: false,
            max_clock_drift_secs: DEFAULT_MAX_CLOCK_DRIFT.as_secs(),
            skip_replay_check: false,
        }
    }
}

fn map_shape_error(err: ShapeError) -> ErrorCode {
    match err {
        ShapeError::InvalidId
        | ShapeError::InvalidVersion
        | ShapeError::InvalidMethod
        | ShapeError::InvalidSigFormat
        | ShapeError::EnvelopeTooLarge => ErrorCode::InvalidMessage,
        ShapeError::MissingSig => ErrorCode::SignatureMissing,
        ShapeError::PayloadNotObject => ErrorCode::InvalidPayload,
        ShapeError::PayloadTooLarge => ErrorCode::PayloadTooLarge,
        ShapeError::PayloadTooDeep => ErrorCode::NestingTooDeep,
    }
}

/// Run every ordered check `spec.md` §4.4 requires against `envelope`.
///
/// On success, and unless `config.skip_replay_check` is set, this also
/// marks `(envelope.from, envelope.id)` seen in `replay` — callers must not
/// call `replay.mark_seen` themselves afterward, or duplicates would need
/// two validation passes to be caught.
pub async fn validate(
    envelope: &Envelope,
    config: &ValidatorConfig,
    replay: &dyn ReplayStore,
    now_secs: u64,
) -> Result<(), SnapError> {
    // 1+2+3: structure, regex/enum constraints, size.
    if let Some(shape_err) = envelope.check_shape().into_iter().next() {
        let code = map_shape_error(shape_err.clone());
        return Err(SnapError::new(code, shape_err.to_string())
            .with_context("id", envelope.id.clone()));
    }

    // 2 (continued): `from`/`to` must themselves be well-formed P2TR
    // addresses, independent of whether a signature is present to decode
    // them against later.
    if snap_crypto::decode_p2tr(&envelope.from).is_err() {
        return Err(SnapError::new(ErrorCode::IdentityInvalid, "from is not a well-formed P2TR address")
            .with_context("from", envelope.from.clone()));
    }
    if let Some(to) = &envelope.to {
        if snap_crypto::decode_p2tr(to).is_err() {
            return Err(SnapError::new(ErrorCode::IdentityInvalid, "to is not a well-formed P2TR address")
                .with_context("to", to.clone()));
        }
    }

    // 4: network consistency.
    if !envelope.networks_consistent() {
        return Err(SnapError::new(
            ErrorCode::NetworkMismatch,
            "from and to belong to different networks",
        )
        .with_context("from", envelope.from.clone())
        .with_context("to", envelope.to.clone()));
    }

    // 5: timestamp freshness.
    if !config.skip_timestamp_check {
        let drift = now_secs.abs_diff(envelope.timestamp);
        if drift > config.max_clock_drift_secs {
            return Err(SnapError::new(
                ErrorCode::TimestampExpired,
                format!(
                    "timestamp drift {drift}s exceeds max {}s",
                    config.max_clock_drift_secs
                ),
            ));
        }
    }

    // 6: replay.
    if !config.skip_replay_check && replay.has_seen(&envelope.from, &envelope.id).await {
        warn!(target: "snap_validate", from = %envelope.from, id = %envelope.id, "duplicate message rejected");
        return Err(SnapError::new(
            ErrorCode::DuplicateMessage,
            format!("(from={}, id={}) already seen", envelope.from, envelope.id),
        ));
    }

    // 7: signature. Required for requests (already enforced by check_shape's
    // MissingSig), verified when present on any type.
    if let Some(sig) = &envelope.sig {
        let verified = snap_sig::verify_envelope(envelope).map_err(|e| {
            SnapError::new(ErrorCode::IdentityInvalid, e.to_string())
                .with_context("from", envelope.from.clone())
        })?;
        if !verified {
            return Err(SnapError::new(
                ErrorCode::SignatureInvalid,
                "signature does not verify against from's identity",
            )
            .with_context("sig_prefix", sig.get(..8).unwrap_or_default().to_string()));
        }
    } else if envelope.kind == EnvelopeType::Request {
        // Unreachable in practice (check_shape already rejects this), kept
        // as an explicit defense against a future relaxation of that check.
        return Err(SnapError::new(
            ErrorCode::SignatureMissing,
            "request envelopes require a signature",
        ));
    }

    if !config.skip_replay_check {
        replay.mark_seen(&envelope.from, &envelope.id).await;
    }
    debug!(target: "snap_validate", method = %envelope.method, "envelope accepted");
    Ok(())
}
