//! Change-event feed over the hosted store's realtime websocket.
//!
//! The service exposes committed table changes through a phoenix-channel
//! socket: clients join a `realtime:{schema}:{table}` topic with a
//! `postgres_changes` binding, answer a periodic heartbeat, and receive one
//! message per committed row change. The stream runs as a background task
//! feeding an mpsc channel; if the socket drops it reconnects with capped
//! exponential backoff and re-joins, so a subscription outlives individual
//! connections.

use std::time::Duration;

use futures_util::SinkExt;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ChangeEvent;
use super::StoreError;
use crate::config::StoreConfig;
use crate::machine::Machine;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters for the realtime socket.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub socket_url: String,
    pub schema: String,
    pub table: String,
}

impl RealtimeConfig {
    pub(crate) fn from_store_config(config: &StoreConfig) -> Self {
        Self {
            socket_url: format!(
                "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
                config.ws_base(),
                config.api_key
            ),
            schema: "public".to_string(),
            table: config.table.clone(),
        }
    }

    fn topic(&self) -> String {
        format!("realtime:{}:{}", self.schema, self.table)
    }
}

/// Background task that owns the websocket and forwards decoded events.
pub(crate) struct RealtimeStream {
    config: RealtimeConfig,
    tx: mpsc::Sender<ChangeEvent>,
    msg_ref: u64,
}

impl RealtimeStream {
    /// Spawn the feed. The task ends when the receiving side of `tx` closes.
    pub(crate) fn spawn(config: RealtimeConfig, tx: mpsc::Sender<ChangeEvent>) -> JoinHandle<()> {
        let mut stream = Self {
            config,
            tx,
            msg_ref: 0,
        };
        tokio::spawn(async move { stream.run().await })
    }

    async fn run(&mut self) {
        let mut backoff = RECONNECT_BACKOFF_MIN;

        loop {
            match connect_async(self.config.socket_url.as_str()).await {
                Ok((ws, _)) => {
                    info!("realtime socket connected, joining {}", self.config.topic());
                    backoff = RECONNECT_BACKOFF_MIN;

                    match self.run_channel(ws).await {
                        Ok(()) => return, // subscriber went away
                        Err(e) => warn!("realtime channel dropped: {}", e),
                    }
                }
                Err(e) => warn!("realtime connect failed: {}", e),
            }

            if self.tx.is_closed() {
                return;
            }

            debug!("realtime reconnect in {:?}", backoff);
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
        }
    }

    /// Join the table topic and pump messages until the socket fails or the
    /// subscriber is dropped. `Ok(())` means the subscriber went away and
    /// the feed should shut down for good.
    async fn run_channel(&mut self, ws: WsStream) -> Result<(), StoreError> {
        let (mut sink, mut source) = ws.split();

        let join = self.envelope(
            &self.config.topic(),
            "phx_join",
            json!({
                "config": {
                    "postgres_changes": [{
                        "event": "*",
                        "schema": self.config.schema,
                        "table": self.config.table,
                    }]
                }
            }),
        );
        sink.send(Message::Text(join))
            .await
            .map_err(|e| StoreError::Realtime(e.to_string()))?;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_PERIOD);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the interval's immediate first tick; the join just went out.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let beat = self.envelope("phoenix", "heartbeat", json!({}));
                    sink.send(Message::Text(beat))
                        .await
                        .map_err(|e| StoreError::Realtime(e.to_string()))?;
                }
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => match decode_change(&text) {
                        Ok(Some(event)) => {
                            if self.tx.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                        Ok(None) => {}
                        // A malformed payload is not worth a reconnect.
                        Err(e) => warn!("undecodable realtime message: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(StoreError::Realtime("socket closed".to_string()));
                    }
                    Some(Ok(_)) => {} // ping/pong/binary, nothing to do
                    Some(Err(e)) => return Err(StoreError::Realtime(e.to_string())),
                },
            }
        }
    }

    fn envelope(&mut self, topic: &str, event: &str, payload: serde_json::Value) -> String {
        self.msg_ref += 1;
        json!({
            "topic": topic,
            "event": event,
            "payload": payload,
            "ref": self.msg_ref.to_string(),
        })
        .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct SocketMessage {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    old_record: Option<serde_json::Value>,
}

/// Replica identity of a deleted row; delete payloads carry only this.
#[derive(Debug, Deserialize)]
struct OldRecord {
    id: i64,
}

/// Decode one socket message into a change event.
///
/// Returns `Ok(None)` for protocol chatter (join replies, heartbeat acks,
/// system notices) and for change kinds the payload does not fully describe.
fn decode_change(text: &str) -> Result<Option<ChangeEvent>, StoreError> {
    let message: SocketMessage = serde_json::from_str(text).map_err(StoreError::Decode)?;

    if message.event != "postgres_changes" {
        debug!("realtime message: {}", message.event);
        return Ok(None);
    }

    // v2 sockets nest the change under `data`; older ones inline it.
    let data = match message.payload.get("data") {
        Some(data) => data.clone(),
        None => message.payload,
    };
    let change: ChangeData = serde_json::from_value(data).map_err(StoreError::Decode)?;

    let event = match change.kind.as_str() {
        "INSERT" => change
            .record
            .map(|r| serde_json::from_value::<Machine>(r).map(|new| ChangeEvent::Insert { new }))
            .transpose()
            .map_err(StoreError::Decode)?,
        "UPDATE" => change
            .record
            .map(|r| serde_json::from_value::<Machine>(r).map(|new| ChangeEvent::Update { new }))
            .transpose()
            .map_err(StoreError::Decode)?,
        "DELETE" => change
            .old_record
            .map(|r| serde_json::from_value::<OldRecord>(r).map(|old| ChangeEvent::Delete { id: old.id }))
            .transpose()
            .map_err(StoreError::Decode)?,
        other => {
            warn!("unknown change kind: {}", other);
            None
        }
    };

    Ok(event)
}
