//! Supabase Realtime client (Phoenix channels over WebSocket)
//!
//! One socket per subscribed table. After `phx_join` is acknowledged the
//! socket is handed to a pump task that keeps the heartbeat going and forwards
//! `postgres_changes` events into the returned stream.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{ChangeKind, ChangeStream, RemoteChange, RemoteResult};
use crate::error::{RemoteError, RemoteErrorKind};

const JOIN_REF: &str = "1";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const CHANGE_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct RealtimeClient {
    endpoint: String,
    heartbeat_interval: Duration,
    join_timeout: Duration,
}

impl RealtimeClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            join_timeout: JOIN_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Join the change channel of `table` for `farm_id` and stream its events.
    pub async fn subscribe(
        &self,
        table: &str,
        farm_id: &str,
        access_token: &str,
    ) -> RemoteResult<ChangeStream> {
        let (socket, _) = tokio_tungstenite::connect_async(self.endpoint.as_str())
            .await
            .map_err(|error| RemoteError::transient(format!("realtime connect failed: {error}")))?;
        let (mut sink, mut stream) = socket.split();

        let topic = format!("realtime:public:{table}:{farm_id}");
        let join = join_message(&topic, table, farm_id, access_token);
        sink.send(Message::Text(join.to_string().into()))
            .await
            .map_err(|error| RemoteError::transient(format!("realtime join failed: {error}")))?;

        let acknowledged = tokio::time::timeout(self.join_timeout, async {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = join_reply(text.as_str()) {
                            return reply;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(RemoteError::transient("realtime socket closed during join"));
                    }
                    Some(Err(error)) => {
                        return Err(RemoteError::transient(format!(
                            "realtime socket error: {error}"
                        )));
                    }
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        match acknowledged {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(error),
            Err(_) => {
                return Err(RemoteError::transient(format!(
                    "realtime join of {topic} timed out"
                )));
            }
        }
        tracing::debug!(%topic, "Realtime channel joined");

        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let heartbeat_interval = self.heartbeat_interval;
        let table = table.to_string();
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_interval);
            heartbeat.tick().await; // skip immediate tick
            let mut heartbeat_ref: u64 = 1;

            loop {
                tokio::select! {
                    () = tx.closed() => {
                        let leave = json!({
                            "topic": topic,
                            "event": "phx_leave",
                            "payload": {},
                            "ref": null,
                        });
                        let _ = sink.send(Message::Text(leave.to_string().into())).await;
                        let _ = sink.close().await;
                        break;
                    }
                    _ = heartbeat.tick() => {
                        heartbeat_ref += 1;
                        let beat = json!({
                            "topic": "phoenix",
                            "event": "heartbeat",
                            "payload": {},
                            "ref": heartbeat_ref.to_string(),
                        });
                        if sink.send(Message::Text(beat.to_string().into())).await.is_err() {
                            tracing::warn!(%topic, "Realtime heartbeat failed, closing channel");
                            break;
                        }
                    }
                    message = stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => match parse_postgres_change(text.as_str(), &table) {
                                Ok(Some(change)) => {
                                    if tx.send(change).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(None) => {}
                                Err(error) => {
                                    tracing::warn!(%topic, "Dropping malformed realtime message: {error}");
                                }
                            },
                            Some(Ok(Message::Ping(data))) => {
                                let _ = sink.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!(%topic, "Realtime socket closed by server");
                                break;
                            }
                            Some(Err(error)) => {
                                tracing::warn!(%topic, "Realtime socket error: {error}");
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|change| (change, rx))
        })
        .boxed())
    }
}

fn join_message(topic: &str, table: &str, farm_id: &str, access_token: &str) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": table,
                    "filter": format!("farm_id=eq.{farm_id}"),
                }],
            },
            "access_token": access_token,
        },
    })
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

/// `Some` once the reply to our `phx_join` arrives.
fn join_reply(text: &str) -> Option<RemoteResult<()>> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    if envelope.event != "phx_reply" || envelope.reference.as_deref() != Some(JOIN_REF) {
        return None;
    }
    if envelope.payload.get("status").and_then(Value::as_str) == Some("ok") {
        return Some(Ok(()));
    }

    let reason = envelope
        .payload
        .get("response")
        .map_or_else(|| "join rejected".to_string(), Value::to_string);
    let kind = if reason.contains("token") || reason.contains("JWT") {
        RemoteErrorKind::Unauthorized
    } else {
        RemoteErrorKind::Rejected
    };
    Some(Err(RemoteError::new(kind, reason)))
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Decode a socket frame into a change on `table`.
///
/// `Ok(None)` for frames that are not `postgres_changes` events for `table`.
pub fn parse_postgres_change(text: &str, table: &str) -> Result<Option<RemoteChange>, String> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|error| format!("invalid frame: {error}"))?;
    if envelope.event != "postgres_changes" {
        return Ok(None);
    }

    let data = envelope
        .payload
        .get("data")
        .cloned()
        .ok_or_else(|| "postgres_changes frame without data".to_string())?;
    let data: ChangeData =
        serde_json::from_value(data).map_err(|error| format!("invalid change data: {error}"))?;
    if data.table != table {
        return Ok(None);
    }

    Ok(Some(RemoteChange {
        table: data.table,
        kind: data.kind,
        record: data.record.filter(|record| !record.is_null()),
        old_record: data.old_record.filter(|old| !old.is_null()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn change_frame(kind: &str, record: &Value, old_record: &Value) -> String {
        json!({
            "topic": "realtime:public:cattle:farm-1",
            "event": "postgres_changes",
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "cattle",
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "type": kind,
                    "record": record,
                    "old_record": old_record,
                    "errors": null
                }
            },
            "ref": null
        })
        .to_string()
    }

    #[test]
    fn parses_insert_change() {
        let frame = change_frame(
            "INSERT",
            &json!({ "id": "cow-1", "farm_id": "farm-1", "tag_number": "A-1" }),
            &Value::Null,
        );
        let change = parse_postgres_change(&frame, "cattle").unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.row_id(), Some("cow-1"));
        assert!(change.old_record.is_none());
    }

    #[test]
    fn parses_delete_with_old_record_only() {
        let frame = change_frame("DELETE", &Value::Null, &json!({ "id": "cow-1" }));
        let change = parse_postgres_change(&frame, "cattle").unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert!(change.record.is_none());
        assert_eq!(change.row_id(), Some("cow-1"));
    }

    #[test]
    fn ignores_other_events_and_tables() {
        let reply = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"},"ref":"2"}"#;
        assert_eq!(parse_postgres_change(reply, "cattle").unwrap(), None);

        let frame = change_frame("INSERT", &json!({ "id": "t-1" }), &Value::Null);
        assert_eq!(parse_postgres_change(&frame, "tasks").unwrap(), None);
    }

    #[test]
    fn malformed_change_is_an_error() {
        let frame = r#"{"event":"postgres_changes","payload":{"data":{"table":"cattle","type":"UPSERT"}}}"#;
        assert!(parse_postgres_change(frame, "cattle").is_err());
        assert!(parse_postgres_change("not json", "cattle").is_err());
    }

    #[test]
    fn join_reply_matches_join_ref() {
        let ok = r#"{"topic":"t","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        assert!(matches!(join_reply(ok), Some(Ok(()))));

        let other = r#"{"topic":"t","event":"phx_reply","payload":{"status":"ok"},"ref":"7"}"#;
        assert!(join_reply(other).is_none());

        let denied = r#"{"topic":"t","event":"phx_reply","payload":{"status":"error","response":{"reason":"invalid JWT"}},"ref":"1"}"#;
        let error = join_reply(denied).unwrap().unwrap_err();
        assert_eq!(error.kind, RemoteErrorKind::Unauthorized);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribe_joins_and_streams_changes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let join = socket.next().await.unwrap().unwrap();
            let join: Value = serde_json::from_str(join.to_text().unwrap()).unwrap();
            assert_eq!(join["event"], "phx_join");
            assert_eq!(
                join["payload"]["config"]["postgres_changes"][0]["filter"],
                "farm_id=eq.farm-1"
            );

            let reply = json!({
                "topic": join["topic"],
                "event": "phx_reply",
                "payload": { "status": "ok", "response": {} },
                "ref": "1"
            });
            socket
                .send(Message::Text(reply.to_string().into()))
                .await
                .unwrap();
            let frame = change_frame(
                "UPDATE",
                &json!({ "id": "cow-1", "farm_id": "farm-1", "tag_number": "A-2" }),
                &json!({ "id": "cow-1" }),
            );
            socket.send(Message::Text(frame.into())).await.unwrap();
            // Keep the socket open until the client leaves
            while let Some(Ok(message)) = socket.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let client = RealtimeClient::new(format!("ws://{address}"));
        let mut changes = client.subscribe("cattle", "farm-1", "jwt").await.unwrap();
        let change = changes.next().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.record.unwrap()["tag_number"], "A-2");

        drop(changes);
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn joined_channel_sends_heartbeats() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let join = socket.next().await.unwrap().unwrap();
            let join: Value = serde_json::from_str(join.to_text().unwrap()).unwrap();
            let reply = json!({
                "topic": join["topic"],
                "event": "phx_reply",
                "payload": { "status": "ok", "response": {} },
                "ref": "1"
            });
            socket
                .send(Message::Text(reply.to_string().into()))
                .await
                .unwrap();

            let mut refs = Vec::new();
            while refs.len() < 2 {
                let message = socket.next().await.unwrap().unwrap();
                let frame: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
                if frame["event"] == "heartbeat" {
                    assert_eq!(frame["topic"], "phoenix");
                    refs.push(frame["ref"].as_str().unwrap().to_string());
                }
            }
            refs
        });

        let client = RealtimeClient::new(format!("ws://{address}"))
            .with_heartbeat_interval(Duration::from_millis(20));
        let changes = client.subscribe("cattle", "farm-1", "jwt").await.unwrap();

        let refs = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refs, vec!["2".to_string(), "3".to_string()]);
        drop(changes);
    }
}
