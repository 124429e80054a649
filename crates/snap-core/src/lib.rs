// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared wire types for SNAP: the signed [`Envelope`], [`AgentCard`]/
//! [`SignedCard`] discovery documents, and the [`Task`] lifecycle record.
//!
//! This crate owns *structure*, not cryptography: field shapes, size and
//! regex constraints, and the task state machine. Signing, verification, and
//! full P2TR address decoding live in `snap-sig`/`snap-crypto` respectively,
//! which depend on this crate rather than the other way around.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The signed envelope that carries every SNAP message.
pub mod envelope;
/// Agent card discovery documents and their signed wrapper.
pub mod card;
/// Task records and their lifecycle state machine.
pub mod task;

pub use envelope::{Envelope, EnvelopeType, MAX_ENVELOPE_BYTES, MAX_PAYLOAD_BYTES, MAX_PAYLOAD_DEPTH};
pub use card::{AgentCard, CapabilityFlags, RateLimit, SignedCard, Skill, TransportEndpoint};
pub use task::{Task, TaskState, TaskStatus};

/// The current SNAP protocol version string, per `spec.md` §3.
pub const PROTOCOL_VERSION: &str = "0.1";
