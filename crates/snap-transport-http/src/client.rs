//! The outbound half: a `reqwest`-backed client for unary calls, SSE
//! streaming calls, and well-known card discovery.

use futures::StreamExt;
use snap_core::{Envelope, SignedCard};
use snap_error::{ErrorCode, SnapError};
use snap_runtime::EnvelopeStream;
use std::time::Duration;
use tokio_stream::StreamExt as TokioStreamExt;
use tracing::warn;

/// Per-call tuning for the outbound HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Overall timeout for a unary `send`.
    pub request_timeout: Duration,
    /// Idle timeout between SSE frames on a streaming call; the stream ends
    /// silently if no frame arrives within this window.
    pub stream_idle_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

fn transport_error(context: &str, source: reqwest::Error) -> SnapError {
    let code = if source.is_timeout() {
        ErrorCode::TransportTimeout
    } else {
        ErrorCode::TransportUnavailable
    };
    SnapError::new(code, format!("{context}: {source}")).with_source(source)
}

/// Build a bare `reqwest::Client` with no request-level timeout set.
///
/// Timeouts are applied per call instead of on the client: a client-wide
/// timeout would also bound SSE body reads in `send_stream`, killing a
/// slow-but-live stream well before its own idle timeout ever fires.
#[must_use]
pub fn build_client() -> Result<reqwest::Client, SnapError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| SnapError::new(ErrorCode::Internal, e.to_string()).with_source(e))
}

/// Send `envelope` to `endpoint` and wait for the single response envelope.
///
/// A non-2xx status is treated as a connection error, per `spec.md` §4.9.
pub async fn send(
    client: &reqwest::Client,
    envelope: &Envelope,
    endpoint: &str,
    config: &HttpClientConfig,
) -> Result<Envelope, SnapError> {
    let response = client
        .post(endpoint)
        .timeout(config.request_timeout)
        .json(envelope)
        .send()
        .await
        .map_err(|e| transport_error("http send failed", e))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(SnapError::new(
            ErrorCode::TransportUnavailable,
            format!("peer returned {status}"),
        )
        .with_context("body", body));
    }

    response
        .json::<Envelope>()
        .await
        .map_err(|e| SnapError::new(ErrorCode::InvalidMessage, format!("malformed response body: {e}")))
}

/// Send `envelope` to `endpoint` and return the lazy sequence of envelopes
/// the peer streams back over SSE.
pub async fn send_stream(
    client: &reqwest::Client,
    envelope: &Envelope,
    endpoint: &str,
    config: &HttpClientConfig,
) -> Result<EnvelopeStream, SnapError> {
    let response = client
        .post(endpoint)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(envelope)
        .send()
        .await
        .map_err(|e| transport_error("http send_stream failed", e))?;

    if !response.status().is_success() {
        let status = response.status();
        return Err(SnapError::new(
            ErrorCode::TransportUnavailable,
            format!("peer returned {status}"),
        ));
    }

    let byte_stream = response.bytes_stream();
    // An idle peer silently ends the stream rather than erroring it: the
    // spec treats stream completion and timeout alike from the caller's
    // perspective (the last frame received still stands).
    let timed = TokioStreamExt::timeout(byte_stream, config.stream_idle_timeout).take_while(|item| {
        let ready = item.is_ok();
        if !ready {
            warn!(target: "snap_transport_http", "sse idle timeout, ending stream");
        }
        futures::future::ready(ready)
    });
    let byte_stream = timed.map(|item| item.expect("filtered by take_while"));

    // SSE frames can arrive split across TCP chunks; carry a remainder
    // buffer forward and only parse complete `\n`-terminated lines.
    let event_stream = byte_stream
        .scan(String::new(), move |buf, chunk| {
            let text = match chunk {
                Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                Err(e) => {
                    warn!(target: "snap_transport_http", error = %e, "sse chunk read failed, ending stream");
                    return futures::future::ready(None);
                }
            };
            buf.push_str(&text);
            let mut envelopes = Vec::new();
            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    match serde_json::from_str::<Envelope>(data) {
                        Ok(env) => envelopes.push(env),
                        Err(e) => {
                            warn!(target: "snap_transport_http", error = %e, "dropping malformed sse frame");
                        }
                    }
                }
            }
            futures::future::ready(Some(envelopes))
        })
        .flat_map(futures::stream::iter);

    Ok(Box::pin(event_stream))
}

/// Fetch and verify the agent card served at `base_url`'s
/// `/.well-known/snap-agent.json`.
pub async fn discover(client: &reqwest::Client, base_url: &str) -> Result<SignedCard, SnapError> {
    let url = format!("{}/.well-known/snap-agent.json", base_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| transport_error("card discovery failed", e))?;

    if !response.status().is_success() {
        return Err(SnapError::new(
            ErrorCode::AgentNotFound,
            format!("discovery endpoint returned {}", response.status()),
        ));
    }

    let signed: SignedCard = response
        .json()
        .await
        .map_err(|e| SnapError::new(ErrorCode::CardInvalid, format!("malformed card document: {e}")))?;

    match snap_sig::verify_card(&signed) {
        Ok(true) => Ok(signed),
        Ok(false) => Err(SnapError::new(ErrorCode::CardSignatureInvalid, "card signature does not verify")),
        Err(e) => Err(SnapError::new(ErrorCode::CardSignatureInvalid, e.to_string())),
    }
}
