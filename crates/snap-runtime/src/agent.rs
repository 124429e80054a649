//! The SNAP agent runtime (C8): method dispatch, middleware, and the
//! transport-agnostic request/response and streaming lifecycle.

use crate::handlers::{StreamHandler, UnaryHandler};
use crate::transport::{EnvelopeStream, InboundHooks, Transport};
use async_trait::async_trait;
use serde_json::Value;
use snap_core::{AgentCard, Envelope, EnvelopeType, SignedCard, PROTOCOL_VERSION};
use snap_crypto::Keypair32;
use snap_error::{ErrorCode, SnapError};
use snap_middleware::{CoreStep, Direction, Middleware, MiddlewareChain};
use snap_replay::{InMemoryReplayStore, ReplayStore};
use snap_task_store::{InMemoryTaskStore, TaskStore};
use snap_validate::ValidatorConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// The two standard methods `spec.md` §4.8 routes to stream handlers.
/// Everything else routes to a unary handler.
const STREAM_METHODS: &[&str] = &["message/stream", "tasks/resubscribe"];

/// Whether `method` routes to a stream handler (`message/stream`,
/// `tasks/resubscribe`) rather than a unary one.
///
/// Transports that cannot infer this from an out-of-band signal (an `Accept`
/// header, say) — the socket and relay transports decide up front which of
/// `process_message`/`process_stream` to call — use this instead of
/// duplicating the routing rule.
#[must_use]
pub fn is_stream_method(method: &str) -> bool {
    STREAM_METHODS.contains(&method)
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// A SNAP agent: method registry, middleware, stores, and transports.
///
/// Construct with [`Agent::new`], wire collaborators with
/// [`Agent::replay_store`]/[`Agent::task_store`]/[`Agent::use_middleware`]/
/// [`Agent::add_transport`], register handlers with
/// [`Agent::handle`]/[`Agent::handle_stream`], then wrap in `Arc` and call
/// [`Agent::start`].
pub struct Agent {
    keypair: Keypair32,
    card: AgentCard,
    replay_store: RwLock<Arc<dyn ReplayStore>>,
    task_store: RwLock<Arc<dyn TaskStore>>,
    handlers: RwLock<HashMap<String, UnaryHandler>>,
    stream_handlers: RwLock<HashMap<String, StreamHandler>>,
    middleware: RwLock<MiddlewareChain<Envelope>>,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    validator_config: RwLock<ValidatorConfig>,
}

impl Agent {
    /// Create a new agent for `keypair`, advertising `card`.
    ///
    /// `card.identity` should equal `keypair.address`; callers that violate
    /// this will simply find their own signed card fails discovery-side
    /// verification, since [`Agent::signed_card`] signs whatever `card` says
    /// with `keypair`'s scalar regardless.
    #[must_use]
    pub fn new(keypair: Keypair32, card: AgentCard) -> Self {
        Self {
            keypair,
            card,
            replay_store: RwLock::new(Arc::new(InMemoryReplayStore::default())),
            task_store: RwLock::new(Arc::new(InMemoryTaskStore::new())),
            handlers: RwLock::new(HashMap::new()),
            stream_handlers: RwLock::new(HashMap::new()),
            middleware: RwLock::new(MiddlewareChain::new()),
            transports: RwLock::new(Vec::new()),
            validator_config: RwLock::new(ValidatorConfig::default()),
        }
    }

    /// This agent's P2TR address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.card.identity
    }

    /// Replace the replay store.
    pub async fn replay_store(&self, store: Arc<dyn ReplayStore>) {
        *self.replay_store.write().await = store;
    }

    /// Replace the task store.
    pub async fn task_store(&self, store: Arc<dyn TaskStore>) {
        *self.task_store.write().await = store;
    }

    /// Access the configured task store (handlers typically close over this
    /// via a cloned `Arc` captured at registration time instead).
    pub async fn task_store_handle(&self) -> Arc<dyn TaskStore> {
        self.task_store.read().await.clone()
    }

    /// Override the validator's configuration (freshness/replay skip flags,
    /// clock drift tolerance).
    pub async fn set_validator_config(&self, config: ValidatorConfig) {
        *self.validator_config.write().await = config;
    }

    /// Register a unary method handler. Last registration for a given
    /// method wins.
    pub async fn handle(&self, method: impl Into<String>, handler: UnaryHandler) {
        self.handlers.write().await.insert(method.into(), handler);
    }

    /// Register a streaming method handler. Last registration wins.
    pub async fn handle_stream(&self, method: impl Into<String>, handler: StreamHandler) {
        self.stream_handlers.write().await.insert(method.into(), handler);
    }

    /// Append `middleware` as the next-innermost layer, applied (in
    /// registration order) to both inbound and outbound passes.
    pub async fn use_middleware(&self, middleware: Arc<dyn Middleware<Envelope>>) {
        self.middleware.write().await.push(middleware);
    }

    /// Register a transport plugin.
    pub async fn add_transport(&self, transport: Arc<dyn Transport>) {
        self.transports.write().await.push(transport);
    }

    async fn find_transport(&self, kind: &str) -> Option<Arc<dyn Transport>> {
        self.transports
            .read()
            .await
            .iter()
            .find(|t| t.kind() == kind)
            .cloned()
    }

    /// Start every registered transport, binding its inbound hook to this
    /// agent. Idempotent if the underlying transports' `start` is.
    pub async fn start(self: &Arc<Self>) -> Result<(), SnapError> {
        let hooks: Arc<dyn InboundHooks> = Arc::clone(self) as Arc<dyn InboundHooks>;
        for transport in self.transports.read().await.iter() {
            info!(target: "snap_runtime", transport = transport.kind(), "starting transport");
            transport.start(Arc::clone(&hooks)).await?;
        }
        Ok(())
    }

    /// Stop every registered transport.
    pub async fn stop(&self) -> Result<(), SnapError> {
        for transport in self.transports.read().await.iter() {
            transport.stop().await?;
        }
        Ok(())
    }

    /// The agent's current signed card.
    pub async fn signed_card(&self) -> SignedCard {
        snap_sig::sign_card(self.card.clone(), &self.keypair, now_secs())
            .expect("signing this agent's own card cannot fail")
    }

    /// Run the full inbound pipeline for `inbound`: middleware, validation,
    /// recipient-match enforcement, dispatch, response construction, and
    /// signing. See `spec.md` §4.8.
    pub async fn process_message(&self, inbound: Envelope) -> Result<Envelope, SnapError> {
        let validated = self.validate_inbound(inbound).await?;
        self.enforce_recipient(&validated)?;

        let is_stream_method = STREAM_METHODS.contains(&validated.method.as_str());
        let payload = if is_stream_method {
            SnapError::new(
                ErrorCode::MethodNotFound,
                format!("{} is a streaming method; use process_stream", validated.method),
            )
            .to_payload()
        } else {
            let handler = self.handlers.read().await.get(&validated.method).cloned();
            match handler {
                Some(handler) => match handler(validated.clone()).await {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(target: "snap_runtime", method = %validated.method, %err, "handler returned an error");
                        err.to_payload()
                    }
                },
                None => SnapError::new(
                    ErrorCode::MethodNotFound,
                    format!("no handler registered for method {}", validated.method),
                )
                .to_payload(),
            }
        };

        let response = Envelope {
            id: Uuid::new_v4().to_string(),
            version: PROTOCOL_VERSION.to_string(),
            from: self.card.identity.clone(),
            to: Some(validated.from.clone()),
            kind: EnvelopeType::Response,
            method: validated.method.clone(),
            payload,
            timestamp: now_secs(),
            sig: None,
        };

        self.sign_outbound(response).await
    }

    /// Run the full inbound pipeline for `inbound`, dispatching to a
    /// registered stream handler. See `spec.md` §4.8.
    pub async fn process_stream(&self, inbound: Envelope) -> Result<EnvelopeStream, SnapError> {
        let validated = self.validate_inbound(inbound).await?;
        self.enforce_recipient(&validated)?;

        if !STREAM_METHODS.contains(&validated.method.as_str()) {
            return Err(SnapError::new(
                ErrorCode::MethodNotFound,
                format!("{} is not a streaming method", validated.method),
            ));
        }

        let handler = self
            .stream_handlers
            .read()
            .await
            .get(&validated.method)
            .cloned()
            .ok_or_else(|| {
                SnapError::new(
                    ErrorCode::MethodNotFound,
                    format!("no stream handler registered for method {}", validated.method),
                )
            })?;

        handler(validated).await
    }

    /// Build, sign, and send a request envelope over the named transport,
    /// returning the peer's response.
    pub async fn send(
        &self,
        to: Option<String>,
        transport_kind: &str,
        endpoint: &str,
        method: &str,
        payload: Value,
    ) -> Result<Envelope, SnapError> {
        let request = self.build_request(to, method, payload);
        let transport = self.find_transport(transport_kind).await.ok_or_else(|| {
            SnapError::new(
                ErrorCode::TransportUnavailable,
                format!("no transport registered for kind {transport_kind}"),
            )
        })?;
        let keypair = self.keypair.clone();
        let endpoint = endpoint.to_string();
        let core: CoreStep<Envelope> = Arc::new(move |mut ctx| {
            let keypair = keypair.clone();
            let transport = Arc::clone(&transport);
            let endpoint = endpoint.clone();
            Box::pin(async move {
                sign_into(&mut ctx.message, &keypair)?;
                let response = transport.send(ctx.message, &endpoint).await?;
                ctx.message = response;
                Ok(ctx)
            })
        });
        let middleware = self.middleware.read().await;
        let ctx = middleware.run(Direction::Outbound, request, core).await?;
        Ok(ctx.message)
    }

    /// Build, sign, and send a request envelope over the named transport,
    /// returning the peer's lazy sequence of response envelopes.
    pub async fn send_stream(
        &self,
        to: Option<String>,
        transport_kind: &str,
        endpoint: &str,
        method: &str,
        payload: Value,
    ) -> Result<EnvelopeStream, SnapError> {
        let request = self.build_request(to, method, payload);
        let signed = self.sign_outbound(request).await?;
        let transport = self.find_transport(transport_kind).await.ok_or_else(|| {
            SnapError::new(
                ErrorCode::TransportUnavailable,
                format!("no transport registered for kind {transport_kind}"),
            )
        })?;
        transport.send_stream(signed, endpoint).await
    }

    fn build_request(&self, to: Option<String>, method: &str, payload: Value) -> Envelope {
        Envelope {
            id: Uuid::new_v4().to_string(),
            version: PROTOCOL_VERSION.to_string(),
            from: self.card.identity.clone(),
            to,
            kind: EnvelopeType::Request,
            method: method.to_string(),
            payload,
            timestamp: now_secs(),
            sig: None,
        }
    }

    async fn validate_inbound(&self, inbound: Envelope) -> Result<Envelope, SnapError> {
        let replay = self.replay_store.read().await.clone();
        let config = *self.validator_config.read().await;
        let core: CoreStep<Envelope> = Arc::new(move |ctx| {
            let replay = Arc::clone(&replay);
            Box::pin(async move {
                snap_validate::validate(&ctx.message, &config, replay.as_ref(), now_secs()).await?;
                Ok(ctx)
            })
        });
        let middleware = self.middleware.read().await;
        let ctx = middleware.run(Direction::Inbound, inbound, core).await?;
        Ok(ctx.message)
    }

    async fn sign_outbound(&self, envelope: Envelope) -> Result<Envelope, SnapError> {
        let keypair = self.keypair.clone();
        let core: CoreStep<Envelope> = Arc::new(move |mut ctx| {
            let keypair = keypair.clone();
            Box::pin(async move {
                sign_into(&mut ctx.message, &keypair)?;
                Ok(ctx)
            })
        });
        let middleware = self.middleware.read().await;
        let ctx = middleware.run(Direction::Outbound, envelope, core).await?;
        Ok(ctx.message)
    }

    /// Enforce that `to` (when present) names this agent, except in
    /// agent-to-service mode (`method = service/call`, per `spec.md` §4.8).
    fn enforce_recipient(&self, envelope: &Envelope) -> Result<(), SnapError> {
        if envelope.method == "service/call" {
            return Ok(());
        }
        if let Some(to) = &envelope.to {
            if to != &self.card.identity {
                return Err(SnapError::new(
                    ErrorCode::IdentityMismatch,
                    "envelope's to does not match this agent's address",
                )
                .with_context("to", to.clone())
                .with_context("self", self.card.identity.clone()));
            }
        }
        Ok(())
    }
}

fn sign_into(envelope: &mut Envelope, keypair: &Keypair32) -> Result<(), SnapError> {
    snap_sig::sign_envelope(envelope, keypair)
        .map_err(|e| SnapError::new(ErrorCode::Internal, e.to_string()))
}

#[async_trait]
impl InboundHooks for Agent {
    async fn process_message(&self, inbound: Envelope) -> Result<Envelope, SnapError> {
        Agent::process_message(self, inbound).await
    }

    async fn process_stream(&self, inbound: Envelope) -> Result<EnvelopeStream, SnapError> {
        Agent::process_stream(self, inbound).await
    }

    async fn signed_card(&self) -> SignedCard {
        Agent::signed_card(self).await
    }
}
