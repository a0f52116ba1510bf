//! WebSocket endpoint: upgrade, client protocol, and connection pumps.
//!
//! The upgrade handler re-checks the `Origin` allowlist (CORS middleware
//! never sees upgrades), performs the RFC 6455 handshake, and hands the
//! connection to a pair of tasks: a read pump that parses client frames
//! (`subscribe` / `unsubscribe` / `ping`) and a write pump that owns the
//! socket sink and drains the hub queue. The two meet only through the
//! client's send queue, and the hub alone closes that queue, so teardown is
//! single-authority: read pump exits → unregister → queue closes → write
//! pump exits.
//!
//! Liveness: a protocol ping goes out every 54 s; each pong extends the read
//! deadline by 60 s. Inbound frames are capped at 4 KiB; a larger frame
//! terminates the connection.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures_util::{SinkExt, StreamExt};
use http::{StatusCode, header};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{Value, json};
use sha1::{Digest, Sha1};
use tokio::{
    sync::mpsc,
    time::{Duration, Instant, timeout, timeout_at},
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Message, protocol::Role},
};

use crate::{
    auth::Claims,
    body::MuxBody,
    envelope::{self, ErrorCode, now_rfc3339},
    hub::{ClientInfo, Hub, is_valid_topic},
    middleware::request_id,
    origin::OriginPolicyHandle,
    types::{Request, Response},
};

const MAX_FRAME_BYTES: usize = 4 * 1024;
const PING_INTERVAL: Duration = Duration::from_secs(54);
const PONG_WAIT: Duration = Duration::from_secs(60);
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Frame sent by clients.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

fn server_frame(kind: &str, request_id: Option<&str>, data: Option<Value>) -> String {
    let mut frame = json!({
        "type": kind,
        "ts": now_rfc3339(),
    });
    if let Value::Object(map) = &mut frame {
        if let Some(request_id) = request_id {
            map.insert("request_id".into(), Value::String(request_id.into()));
        }
        if let Some(data) = data {
            map.insert("data".into(), data);
        }
    }
    frame.to_string()
}

fn error_frame(request_id: Option<&str>, code: &str, message: &str) -> String {
    server_frame(
        "error",
        request_id,
        Some(json!({"code": code, "message": message})),
    )
}

/// Upgrade endpoint. Origin is validated against the same allowlist as CORS;
/// in local mode, or when the client sends no `Origin`, the upgrade is
/// allowed.
pub async fn handler(
    mut req: Request,
    hub: Hub,
    origins: OriginPolicyHandle,
    local_mode: bool,
) -> Response {
    if !local_mode {
        if let Some(origin) = req.headers().get(header::ORIGIN) {
            let allowed = origin
                .to_str()
                .map(|o| origins.load().allows(o))
                .unwrap_or(false);
            if !allowed {
                tracing::warn!(origin = ?origin, "rejected websocket upgrade origin");
                return envelope::failure(&req, ErrorCode::Forbidden, "origin not allowed");
            }
        }
    }

    let Some(key) = req.headers().get("sec-websocket-key") else {
        return envelope::failure(&req, ErrorCode::BadRequest, "missing Sec-WebSocket-Key");
    };

    // RFC 6455 accept hash.
    let accept = {
        let mut sha1 = Sha1::new();
        sha1.update(key.as_bytes());
        sha1.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
        STANDARD.encode(sha1.finalize())
    };

    let claims = req.extensions().get::<Claims>().cloned();

    let response = hyper::Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header("Sec-WebSocket-Accept", accept)
        .body(MuxBody::empty())
        .unwrap();

    if let Some(on_upgrade) = req.extensions_mut().remove::<hyper::upgrade::OnUpgrade>() {
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let socket =
                        WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                            .await;
                    run_client(socket, hub, claims).await;
                }
                Err(err) => tracing::debug!(%err, "websocket upgrade failed"),
            }
        });
    }

    response
}

async fn run_client<S>(socket: WebSocketStream<S>, hub: Hub, claims: Option<Claims>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let id = request_id::generate();
    let info = ClientInfo::new(id.clone(), claims);
    let events_rx = hub.register(info.clone()).await;

    let (sink, stream) = socket.split();

    // Protocol replies from the read pump share the writer with hub frames.
    let (reply_tx, reply_rx) = mpsc::channel::<String>(16);

    let writer = tokio::spawn(write_pump(sink, events_rx, reply_rx));

    read_pump(stream, &hub, &info, reply_tx).await;

    // Read side is done; the hub closes the event queue, which ends the
    // write pump.
    hub.unregister(&id).await;
    let _ = writer.await;
    tracing::debug!(client = %id, "websocket client closed");
}

async fn write_pump<S>(
    mut sink: futures_util::stream::SplitSink<WebSocketStream<S>, Message>,
    mut events_rx: mpsc::Receiver<String>,
    mut reply_rx: mpsc::Receiver<String>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.reset();

    let mut replies_open = true;
    loop {
        let message = tokio::select! {
            event = events_rx.recv() => match event {
                Some(text) => Message::Text(text.into()),
                // Queue closed by the hub: say goodbye and stop.
                None => {
                    let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    break;
                }
            },
            reply = reply_rx.recv(), if replies_open => match reply {
                Some(text) => Message::Text(text.into()),
                None => {
                    replies_open = false;
                    continue;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new().into()),
        };

        match timeout(WRITE_WAIT, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(%err, "websocket write failed");
                break;
            }
            Err(_) => {
                tracing::debug!("websocket write timed out");
                break;
            }
        }
    }
}

async fn read_pump<S>(
    mut stream: futures_util::stream::SplitStream<WebSocketStream<S>>,
    hub: &Hub,
    info: &Arc<ClientInfo>,
    reply_tx: mpsc::Sender<String>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let mut deadline = Instant::now() + PONG_WAIT;

    loop {
        let message = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                tracing::debug!(client = %info.id, "websocket pong deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(client = %info.id, %err, "websocket read failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    tracing::warn!(client = %info.id, len = text.len(), "frame too large");
                    break;
                }
                let reply = handle_frame(hub, info, text.as_str());
                for frame in reply {
                    if reply_tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
            Message::Binary(payload) => {
                if payload.len() > MAX_FRAME_BYTES {
                    tracing::warn!(client = %info.id, len = payload.len(), "frame too large");
                    break;
                }
            }
            Message::Pong(_) => {
                deadline = Instant::now() + PONG_WAIT;
            }
            // The codec answers protocol pings on its own.
            Message::Ping(_) => {}
            Message::Close(_) => break,
            Message::Frame(_) => {}
        }
    }
}

/// Handles one client frame, returning the frames to send back.
fn handle_frame(hub: &Hub, info: &Arc<ClientInfo>, text: &str) -> Vec<String> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            return vec![error_frame(None, "bad_frame", &format!("unparseable frame: {err}"))];
        }
    };
    let request_id = frame.request_id.as_deref();

    match frame.kind.as_str() {
        "ping" => vec![server_frame("pong", request_id, None)],
        "subscribe" | "unsubscribe" => {
            let topics = match extract_topics(frame.data.as_ref()) {
                Ok(topics) => topics,
                Err(reply) => return vec![error_frame(request_id, reply.0, reply.1)],
            };

            for topic in &topics {
                if !is_valid_topic(topic) {
                    return vec![error_frame(
                        request_id,
                        "invalid_topic",
                        &format!("invalid topic {topic:?}"),
                    )];
                }
            }

            if frame.kind == "subscribe" {
                for topic in &topics {
                    if !hub.can_subscribe(info.claims.as_ref(), topic) {
                        return vec![error_frame(
                            request_id,
                            "forbidden_topic",
                            &format!("subscription to {topic:?} denied"),
                        )];
                    }
                }
            }

            let count = if frame.kind == "subscribe" {
                info.subscribe(&topics)
            } else {
                info.unsubscribe(&topics)
            };

            vec![server_frame(
                "ack",
                request_id,
                Some(json!({"op": frame.kind, "topics": topics, "count": count})),
            )]
        }
        other => vec![error_frame(
            request_id,
            "unknown_type",
            &format!("unrecognized frame type {other:?}"),
        )],
    }
}

fn extract_topics(data: Option<&Value>) -> Result<Vec<String>, (&'static str, &'static str)> {
    let topics = data
        .and_then(|d| d.get("topics"))
        .and_then(Value::as_array)
        .ok_or(("missing_topics", "data.topics must be a non-empty array"))?;
    if topics.is_empty() {
        return Err(("missing_topics", "data.topics must be a non-empty array"));
    }
    topics
        .iter()
        .map(|t| {
            t.as_str()
                .map(str::to_string)
                .ok_or(("invalid_topic", "topics must be strings"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_topics_requires_non_empty_array() {
        assert!(extract_topics(None).is_err());
        assert!(extract_topics(Some(&json!({"topics": []}))).is_err());
        assert!(extract_topics(Some(&json!({"topics": [1, 2]}))).is_err());
        let ok = extract_topics(Some(&json!({"topics": ["sessions:*"]}))).unwrap();
        assert_eq!(ok, vec!["sessions:*".to_string()]);
    }

    #[test]
    fn server_frames_carry_type_ts_and_request_id() {
        let text = server_frame("pong", Some("r1"), None);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["request_id"], "r1");
        assert!(value["ts"].as_str().is_some());
    }

    #[test]
    fn error_frames_carry_code() {
        let text = error_frame(None, "invalid_topic", "bad");
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "invalid_topic");
    }
}
