// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered composable inbound/outbound middleware chain, per `spec.md` §4.7.
//!
//! Middleware is expressed as an onion: registration order `[m1, m2, m3]`
//! builds the invocation order `m1 -> m2 -> m3 -> core` for both inbound and
//! outbound traffic, where `core` is the agent runtime's own built-in step
//! (validator+dispatcher inbound, signer+transport-send outbound). The
//! chain is generic over the message type `T` so the same machinery wraps a
//! single envelope (`message/send`) or an entire lazy stream of envelopes
//! (`message/stream`) — per `spec.md` §4.7/§9, streaming middleware wraps
//! the whole request, never each individual event.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use snap_error::SnapError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which leg of a request/response exchange a [`MiddlewareContext`] belongs
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// A message arriving at this agent.
    Inbound,
    /// A message this agent is sending.
    Outbound,
}

/// The mutable state threaded through a middleware chain invocation.
///
/// `message` is generic: `Envelope` for unary send/receive, or a boxed
/// stream of envelopes for `message/stream`/`tasks/resubscribe`. `metadata`
/// is scoped to exactly one request (or one stream's lifetime) — middleware
/// that wants state shared *across* invocations must hold it itself, not in
/// this map.
pub struct MiddlewareContext<T> {
    /// Whether this is an inbound or outbound pass.
    pub direction: Direction,
    /// The message (or message stream) being processed.
    pub message: T,
    /// Free-form metadata middleware may read or mutate.
    pub metadata: BTreeMap<String, Value>,
}

impl<T> MiddlewareContext<T> {
    /// Start a new context with empty metadata.
    pub fn new(direction: Direction, message: T) -> Self {
        Self {
            direction,
            message,
            metadata: BTreeMap::new(),
        }
    }
}

/// The terminal step a middleware chain wraps: the agent runtime's built-in
/// validator+dispatcher (inbound) or signer+transport-send (outbound) logic.
pub type CoreStep<T> =
    Arc<dyn Fn(MiddlewareContext<T>) -> BoxFuture<'static, Result<MiddlewareContext<T>, SnapError>> + Send + Sync>;

/// A single named interceptor.
///
/// An implementation must call `next.run(ctx)` to continue the chain unless
/// it intentionally short-circuits (e.g. to reject a message outright
/// without reaching the core step).
#[async_trait]
pub trait Middleware<T>: Send + Sync
where
    T: Send + 'static,
{
    /// A short name used in logging/diagnostics.
    fn name(&self) -> &str;

    /// Observe and/or mutate `ctx`, then invoke `next.run(ctx)` to continue
    /// the chain (or return early to short-circuit).
    async fn handle(
        &self,
        ctx: MiddlewareContext<T>,
        next: Next<T>,
    ) -> Result<MiddlewareContext<T>, SnapError>;
}

/// The remaining continuation of a middleware chain.
pub struct Next<T> {
    middlewares: Arc<[Arc<dyn Middleware<T>>]>,
    index: usize,
    core: CoreStep<T>,
}

impl<T: Send + 'static> Next<T> {
    /// Invoke the next middleware in the chain, or the core step if none
    /// remain.
    pub fn run(self, ctx: MiddlewareContext<T>) -> BoxFuture<'static, Result<MiddlewareContext<T>, SnapError>>
    where
        T: 'static,
    {
        match self.middlewares.get(self.index) {
            Some(mw) => {
                let mw = Arc::clone(mw);
                let next = Next {
                    middlewares: self.middlewares,
                    index: self.index + 1,
                    core: self.core,
                };
                Box::pin(async move { mw.handle(ctx, next).await })
            }
            None => (self.core)(ctx),
        }
    }
}

/// An ordered, composable chain of [`Middleware`].
///
/// `run_inbound`/`run_outbound` both walk the same registered list in
/// registration order; only [`MiddlewareContext::direction`] distinguishes
/// the two passes for middleware that cares.
pub struct MiddlewareChain<T> {
    middlewares: Vec<Arc<dyn Middleware<T>>>,
}

impl<T> Default for MiddlewareChain<T> {
    fn default() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }
}

impl<T: Send + 'static> MiddlewareChain<T> {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `middleware` as the next-innermost layer.
    pub fn push(&mut self, middleware: Arc<dyn Middleware<T>>) {
        self.middlewares.push(middleware);
    }

    /// The names of registered middleware, in invocation order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Run the chain over `message` in the given `direction`, terminating in
    /// `core`.
    pub async fn run(
        &self,
        direction: Direction,
        message: T,
        core: CoreStep<T>,
    ) -> Result<MiddlewareContext<T>, SnapError> {
        let ctx = MiddlewareContext::new(direction, message);
        let middlewares: Arc<[Arc<dyn Middleware<T>>]> = Arc::from(self.middlewares.clone());
        let next = Next {
            middlewares,
            index: 0,
            core,
        };
        next.run(ctx).await
    }
}
