// SPDX-License-Identifier: MIT OR Apache-2.0
//! The SNAP agent runtime (`spec.md` §4.8): binds the validator, signer,
//! middleware chain, replay/task stores, and method handlers into a single
//! `Agent` that transports drive on the inbound side and call into on the
//! outbound side.
//!
//! Dispatch rule: `message/stream` and `tasks/resubscribe` route to stream
//! handlers (registered with [`Agent::handle_stream`]); every other method
//! routes to a unary handler (registered with [`Agent::handle`]). An
//! envelope whose `to` names another agent is rejected with
//! `IdentityMismatch`, except under `service/call`, which is exempt (that is
//! SNAP's agent-to-service mode: the envelope carries no meaningful
//! recipient identity to check).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod handlers;
mod transport;

pub use agent::{is_stream_method, Agent};
pub use handlers::{StreamHandler, UnaryHandler};
pub use transport::{EnvelopeStream, InboundHooks, Transport};

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;
    use futures::stream;
    use serde_json::json;
    use snap_core::{AgentCard, Envelope, EnvelopeType, Skill};
    use snap_crypto::{derive_keypair, Keypair32, Network};
    use snap_error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    fn keypair(n: u64) -> Keypair32 {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        derive_keypair(SecretKey::from_slice(&bytes).unwrap(), Network::Bitcoin).unwrap()
    }

    fn card_for(kp: &Keypair32) -> AgentCard {
        AgentCard {
            name: "Test Agent".to_string(),
            description: "a test agent".to_string(),
            version: "1.0.0".to_string(),
            identity: kp.address.clone(),
            skills: vec![Skill {
                id: "echo".to_string(),
                name: "Echo".to_string(),
                description: "echoes its input".to_string(),
                tags: vec![],
                examples: vec![],
                input_modes: vec!["application/json".to_string()],
                output_modes: vec!["application/json".to_string()],
            }],
            default_input_modes: vec!["application/json".to_string()],
            default_output_modes: vec!["application/json".to_string()],
            transports: vec![],
            relays: vec![],
            capabilities: None,
            rate_limit: None,
            domain_anchor: None,
        }
    }

    fn request(from_kp: &Keypair32, to: Option<String>, method: &str, payload: serde_json::Value) -> Envelope {
        let mut env = Envelope {
            id: Uuid::new_v4().to_string(),
            version: "0.1".to_string(),
            from: from_kp.address.clone(),
            to,
            kind: EnvelopeType::Request,
            method: method.to_string(),
            payload,
            timestamp: chrono::Utc::now().timestamp() as u64,
            sig: None,
        };
        snap_sig::sign_envelope(&mut env, from_kp).unwrap();
        env
    }

    struct RecordingMiddleware {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl snap_middleware::Middleware<Envelope> for RecordingMiddleware {
        fn name(&self) -> &str {
            self.name
        }
        async fn handle(
            &self,
            ctx: snap_middleware::MiddlewareContext<Envelope>,
            next: snap_middleware::Next<Envelope>,
        ) -> Result<snap_middleware::MiddlewareContext<Envelope>, snap_error::SnapError> {
            self.log.lock().unwrap().push(format!("{}:{:?}", self.name, ctx.direction));
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn unary_handler_dispatches_and_response_is_signed() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let agent = Agent::new(server_kp.clone(), card_for(&server_kp));
        agent
            .handle(
                "message/send",
                Arc::new(|env: Envelope| {
                    Box::pin(async move { Ok(json!({"echo": env.payload})) })
                }),
            )
            .await;

        let req = request(&client_kp, Some(server_kp.address.clone()), "message/send", json!({"hello": "world"}));
        let response = agent.process_message(req).await.unwrap();
        assert_eq!(response.kind, EnvelopeType::Response);
        assert_eq!(response.from, server_kp.address);
        assert_eq!(response.to.as_deref(), Some(client_kp.address.as_str()));
        assert!(snap_sig::verify_envelope(&response).unwrap());
        assert_eq!(response.payload["echo"]["hello"], "world");
    }

    #[tokio::test]
    async fn unknown_method_yields_signed_method_not_found_response() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let agent = Agent::new(server_kp.clone(), card_for(&server_kp));

        let req = request(&client_kp, Some(server_kp.address.clone()), "tasks/get", json!({}));
        let response = agent.process_message(req).await.unwrap();
        assert_eq!(response.payload["error"]["code"], "METHOD_NOT_FOUND");
        assert!(snap_sig::verify_envelope(&response).unwrap());
    }

    #[tokio::test]
    async fn handler_error_becomes_error_response_not_a_transport_failure() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let agent = Agent::new(server_kp.clone(), card_for(&server_kp));
        agent
            .handle(
                "tasks/get",
                Arc::new(|_env: Envelope| {
                    Box::pin(async move {
                        Err(snap_error::SnapError::new(ErrorCode::TaskNotFound, "no such task"))
                    })
                }),
            )
            .await;

        let req = request(&client_kp, Some(server_kp.address.clone()), "tasks/get", json!({"taskId": "nope"}));
        let response = agent.process_message(req).await.unwrap();
        assert_eq!(response.payload["error"]["code"], "TASK_NOT_FOUND");
    }

    #[tokio::test]
    async fn recipient_mismatch_is_rejected() {
        let server_kp = keypair(1);
        let other_kp = keypair(3);
        let client_kp = keypair(2);
        let agent = Agent::new(server_kp.clone(), card_for(&server_kp));

        let req = request(&client_kp, Some(other_kp.address.clone()), "message/send", json!({}));
        let err = agent.process_message(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::IdentityMismatch);
    }

    #[tokio::test]
    async fn service_call_bypasses_recipient_check() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let agent = Agent::new(server_kp.clone(), card_for(&server_kp));
        agent
            .handle(
                "service/call",
                Arc::new(|_env: Envelope| Box::pin(async move { Ok(json!({"ok": true})) })),
            )
            .await;

        // `to` is absent entirely, which is the normal agent-to-service shape.
        let req = request(&client_kp, None, "service/call", json!({"op": "x"}));
        let response = agent.process_message(req).await.unwrap();
        assert_eq!(response.payload["ok"], true);
    }

    #[tokio::test]
    async fn duplicate_envelope_is_rejected_by_the_built_in_validator() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let agent = Agent::new(server_kp.clone(), card_for(&server_kp));
        agent
            .handle("message/send", Arc::new(|_env: Envelope| Box::pin(async move { Ok(json!({})) })))
            .await;

        let req = request(&client_kp, Some(server_kp.address.clone()), "message/send", json!({}));
        assert!(agent.process_message(req.clone()).await.is_ok());
        let err = agent.process_message(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateMessage);
    }

    #[tokio::test]
    async fn stream_method_routes_to_stream_handler_not_unary() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let agent = Agent::new(server_kp.clone(), card_for(&server_kp));
        let server_kp_for_handler = server_kp.clone();
        agent
            .handle_stream(
                "message/stream",
                Arc::new(move |req: Envelope| {
                    let server_kp = server_kp_for_handler.clone();
                    Box::pin(async move {
                        let events = (0..2)
                            .map(|i| {
                                let mut ev = Envelope {
                                    id: Uuid::new_v4().to_string(),
                                    version: "0.1".to_string(),
                                    from: server_kp.address.clone(),
                                    to: Some(req.from.clone()),
                                    kind: EnvelopeType::Event,
                                    method: req.method.clone(),
                                    payload: json!({"chunk": i}),
                                    timestamp: chrono::Utc::now().timestamp() as u64,
                                    sig: None,
                                };
                                snap_sig::sign_envelope(&mut ev, &server_kp).unwrap();
                                ev
                            })
                            .chain(std::iter::once({
                                let mut resp = Envelope {
                                    id: Uuid::new_v4().to_string(),
                                    version: "0.1".to_string(),
                                    from: server_kp.address.clone(),
                                    to: Some(req.from.clone()),
                                    kind: EnvelopeType::Response,
                                    method: req.method.clone(),
                                    payload: json!({"done": true}),
                                    timestamp: chrono::Utc::now().timestamp() as u64,
                                    sig: None,
                                };
                                snap_sig::sign_envelope(&mut resp, &server_kp).unwrap();
                                resp
                            }));
                        let boxed: EnvelopeStream = Box::pin(stream::iter(events));
                        Ok(boxed)
                    })
                }),
            )
            .await;

        let req = request(&client_kp, Some(server_kp.address.clone()), "message/stream", json!({}));
        let mut items = agent.process_stream(req).await.unwrap();
        let mut kinds = Vec::new();
        while let Some(item) = items.next().await {
            kinds.push(item.kind);
        }
        assert_eq!(kinds, vec![EnvelopeType::Event, EnvelopeType::Event, EnvelopeType::Response]);
    }

    #[tokio::test]
    async fn middleware_runs_once_for_inbound_and_once_for_outbound() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let agent = Agent::new(server_kp.clone(), card_for(&server_kp));
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        agent
            .use_middleware(Arc::new(RecordingMiddleware { name: "audit", log: log.clone() }))
            .await;
        agent
            .handle("message/send", Arc::new(|_env: Envelope| Box::pin(async move { Ok(json!({})) })))
            .await;

        let req = request(&client_kp, Some(server_kp.address.clone()), "message/send", json!({}));
        agent.process_message(req).await.unwrap();

        let events = log.lock().unwrap().clone();
        assert_eq!(events, vec!["audit:Inbound", "audit:Outbound"]);
    }

    struct LoopbackTransport {
        kind: String,
        hooks: tokio::sync::OnceCell<Arc<dyn InboundHooks>>,
        calls: AtomicUsize,
    }

    impl LoopbackTransport {
        fn new(kind: &str) -> Self {
            Self {
                kind: kind.to_string(),
                hooks: tokio::sync::OnceCell::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for LoopbackTransport {
        fn kind(&self) -> &str {
            &self.kind
        }

        async fn start(&self, hooks: Arc<dyn InboundHooks>) -> Result<(), snap_error::SnapError> {
            let _ = self.hooks.set(hooks);
            Ok(())
        }

        async fn stop(&self) -> Result<(), snap_error::SnapError> {
            Ok(())
        }

        async fn send(&self, envelope: Envelope, _endpoint: &str) -> Result<Envelope, snap_error::SnapError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hooks = self.hooks.get().expect("transport started").clone();
            hooks.process_message(envelope).await
        }

        async fn send_stream(&self, envelope: Envelope, _endpoint: &str) -> Result<EnvelopeStream, snap_error::SnapError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hooks = self.hooks.get().expect("transport started").clone();
            let stream = hooks.process_stream(envelope).await?;
            Ok(stream)
        }
    }

    #[tokio::test]
    async fn send_round_trips_through_a_loopback_transport() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let server = Arc::new(Agent::new(server_kp.clone(), card_for(&server_kp)));
        server
            .handle("message/send", Arc::new(|env: Envelope| Box::pin(async move { Ok(json!({"got": env.payload})) })))
            .await;
        let transport = Arc::new(LoopbackTransport::new("loopback"));
        server.add_transport(transport.clone()).await;
        server.start().await.unwrap();

        let client = Agent::new(client_kp.clone(), card_for(&client_kp));
        client.add_transport(transport).await;

        let response = client
            .send(Some(server_kp.address.clone()), "loopback", "irrelevant", "message/send", json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(response.payload["got"]["x"], 1);
        assert!(snap_sig::verify_envelope(&response).unwrap());
    }

    #[tokio::test]
    async fn send_stream_round_trips_through_a_loopback_transport() {
        let server_kp = keypair(1);
        let client_kp = keypair(2);
        let server = Arc::new(Agent::new(server_kp.clone(), card_for(&server_kp)));
        let server_kp_for_handler = server_kp.clone();
        server
            .handle_stream(
                "message/stream",
                Arc::new(move |req: Envelope| {
                    let server_kp = server_kp_for_handler.clone();
                    Box::pin(async move {
                        let mut resp = Envelope {
                            id: Uuid::new_v4().to_string(),
                            version: "0.1".to_string(),
                            from: server_kp.address.clone(),
                            to: Some(req.from.clone()),
                            kind: EnvelopeType::Response,
                            method: req.method.clone(),
                            payload: json!({"done": true}),
                            timestamp: chrono::Utc::now().timestamp() as u64,
                            sig: None,
                        };
                        snap_sig::sign_envelope(&mut resp, &server_kp).unwrap();
                        let boxed: EnvelopeStream = Box::pin(stream::iter(vec![resp]));
                        Ok(boxed)
                    })
                }),
            )
            .await;
        let transport = Arc::new(LoopbackTransport::new("loopback"));
        server.add_transport(transport.clone()).await;
        server.start().await.unwrap();

        let client = Agent::new(client_kp.clone(), card_for(&client_kp));
        client.add_transport(transport).await;

        let mut items = client
            .send_stream(Some(server_kp.address.clone()), "loopback", "irrelevant", "message/stream", json!({}))
            .await
            .unwrap();
        let first = items.next().await.unwrap();
        assert_eq!(first.kind, EnvelopeType::Response);
        assert_eq!(first.payload["done"], true);
    }

    #[tokio::test]
    async fn signed_card_verifies_against_this_agents_identity() {
        let kp = keypair(1);
        let agent = Agent::new(kp.clone(), card_for(&kp));
        let signed = agent.signed_card().await;
        assert!(snap_sig::verify_card(&signed).unwrap());
        assert_eq!(signed.card.identity, kp.address);
    }
}
