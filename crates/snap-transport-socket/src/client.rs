//! The outbound half: a `tokio-tungstenite`-backed client. Each call opens
//! its own connection, per `spec.md` §4.10 — the socket transport is framed
//! per-call, not a long-lived multiplexed session.

use futures::{SinkExt, StreamExt};
use snap_core::Envelope;
use snap_error::{ErrorCode, SnapError};
use snap_runtime::EnvelopeStream;
use tokio_tungstenite::tungstenite::Message;

fn transport_error(context: &str, source: impl std::fmt::Display) -> SnapError {
    SnapError::new(ErrorCode::TransportUnavailable, format!("{context}: {source}"))
}

async fn connect(endpoint: &str) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    SnapError,
> {
    let (stream, _response) = tokio_tungstenite::connect_async(endpoint)
        .await
        .map_err(|e| transport_error("socket connect failed", e))?;
    Ok(stream)
}

/// Open a connection to `endpoint`, write `envelope`, wait for the single
/// response frame, and close.
pub async fn send(envelope: &Envelope, endpoint: &str) -> Result<Envelope, SnapError> {
    let mut socket = connect(endpoint).await?;
    let text = serde_json::to_string(envelope)
        .map_err(|e| SnapError::new(ErrorCode::InvalidMessage, e.to_string()))?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|e| transport_error("socket write failed", e))?;

    let response = loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(payload))) => {
                let _ = socket.send(Message::Pong(payload)).await;
                continue;
            }
            Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                return Err(SnapError::new(ErrorCode::TransportUnavailable, "peer closed before responding"))
            }
            Some(Ok(Message::Binary(_)) | Ok(Message::Frame(_))) => continue,
            Some(Err(e)) => return Err(transport_error("socket read failed", e)),
        }
    };

    let _ = socket.close(None).await;
    serde_json::from_str::<Envelope>(&response)
        .map_err(|e| SnapError::new(ErrorCode::InvalidMessage, format!("malformed response frame: {e}")))
}

/// Open a connection to `endpoint`, write `envelope`, and return the lazy
/// sequence of frames the peer sends back, ending at (and including) the
/// frame with `type=response`.
pub async fn send_stream(envelope: &Envelope, endpoint: &str) -> Result<EnvelopeStream, SnapError> {
    let mut socket = connect(endpoint).await?;
    let text = serde_json::to_string(envelope)
        .map_err(|e| SnapError::new(ErrorCode::InvalidMessage, e.to_string()))?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|e| transport_error("socket write failed", e))?;

    let stream = futures::stream::unfold((socket, false), |(mut socket, done)| async move {
        if done {
            return None;
        }
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let envelope = match serde_json::from_str::<Envelope>(&text) {
                        Ok(env) => env,
                        Err(e) => {
                            tracing::warn!(target: "snap_transport_socket", error = %e, "dropping malformed stream frame");
                            continue;
                        }
                    };
                    let is_final = envelope.kind == snap_core::EnvelopeType::Response;
                    if is_final {
                        let _ = socket.close(None).await;
                    }
                    return Some((envelope, (socket, is_final)));
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = socket.send(Message::Pong(payload)).await;
                    continue;
                }
                Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Binary(_)) | Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => {
                    tracing::warn!(target: "snap_transport_socket", error = %e, "socket stream read failed, ending stream");
                    return None;
                }
            }
        }
    });

    Ok(Box::pin(stream))
}
