//! Nostr relay client - tokio-tungstenite WebSocket.
//!
//! Frames are parsed off the socket in a reader task and delivered on a
//! typed channel. When the socket dies the channel closes, which the
//! subscription loop treats as a transport failure and reconnects.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
}

/// Parsed NIP-01 relay-to-client frames.
#[derive(Debug)]
pub enum RelayMessage {
    Event { sub_id: String, event: nostr::Event },
    Ok { event_id: String, accepted: bool, message: Option<String> },
    Eose { sub_id: String },
    Notice { message: String },
}

/// Subscription filter (NIP-01). Only the fields this daemon filters on.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SubscriptionFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
}

pub struct RelayClient {
    url: String,
    state: Arc<RwLock<RelayState>>,
    tx: Option<mpsc::Sender<String>>,
}

/// Cheap clonable write handle for tasks that publish replies.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<String>,
}

impl RelayHandle {
    pub async fn publish(&self, event: &nostr::Event) -> anyhow::Result<()> {
        let msg = json!(["EVENT", event]).to_string();
        self.tx.send(msg).await?;
        Ok(())
    }
}

impl RelayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Arc::new(RwLock::new(RelayState::Disconnected)),
            tx: None,
        }
    }

    pub async fn state(&self) -> RelayState {
        *self.state.read().await
    }

    /// Connect and spawn reader/writer tasks. Returns the channel of parsed
    /// incoming frames; it closes when the transport does.
    pub async fn connect(&mut self) -> anyhow::Result<mpsc::Receiver<RelayMessage>> {
        *self.state.write().await = RelayState::Connecting;

        let (ws, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(32);
        self.tx = Some(out_tx);

        let (in_tx, in_rx) = mpsc::channel::<RelayMessage>(64);

        let state = self.state.clone();
        *state.write().await = RelayState::Connected;

        let state_w = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if write.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
            *state_w.write().await = RelayState::Disconnected;
        });

        let state_r = state.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                if let Message::Text(txt) = msg {
                    let Some(parsed) = parse_relay_message(&txt) else {
                        continue;
                    };
                    if in_tx.send(parsed).await.is_err() {
                        break;
                    }
                }
            }
            *state_r.write().await = RelayState::Disconnected;
        });

        Ok(in_rx)
    }

    async fn send(&self, msg: &str) -> anyhow::Result<()> {
        if let Some(tx) = &self.tx {
            tx.send(msg.to_string()).await?;
            Ok(())
        } else {
            anyhow::bail!("Not connected")
        }
    }

    pub fn handle(&self) -> anyhow::Result<RelayHandle> {
        match &self.tx {
            Some(tx) => Ok(RelayHandle { tx: tx.clone() }),
            None => anyhow::bail!("Not connected"),
        }
    }

    /// Publish event (NIP-01)
    pub async fn publish(&self, event: &nostr::Event) -> anyhow::Result<()> {
        let msg = json!(["EVENT", event]).to_string();
        self.send(&msg).await
    }

    /// Subscribe (NIP-01)
    pub async fn subscribe(&self, id: &str, filter: &SubscriptionFilter) -> anyhow::Result<()> {
        let msg = json!(["REQ", id, filter]).to_string();
        self.send(&msg).await
    }

    /// Drop the writer; the writer task sends a close frame on its way out.
    pub async fn close(&mut self) {
        self.tx = None;
        *self.state.write().await = RelayState::Disconnected;
    }
}

/// Parse a relay-to-client frame. Unknown or malformed frames yield None.
pub fn parse_relay_message(msg: &str) -> Option<RelayMessage> {
    let arr: Vec<Value> = serde_json::from_str(msg).ok()?;
    let cmd = arr.first()?.as_str()?;
    match cmd {
        "EVENT" => {
            let sub_id = arr.get(1)?.as_str()?.to_string();
            let event: nostr::Event = serde_json::from_value(arr.get(2)?.clone()).ok()?;
            Some(RelayMessage::Event { sub_id, event })
        }
        "OK" => {
            let event_id = arr.get(1)?.as_str()?.to_string();
            let accepted = arr.get(2)?.as_bool()?;
            let message = arr.get(3).and_then(|v| v.as_str()).map(String::from);
            Some(RelayMessage::Ok { event_id, accepted, message })
        }
        "EOSE" => {
            let sub_id = arr.get(1)?.as_str()?.to_string();
            Some(RelayMessage::Eose { sub_id })
        }
        "NOTICE" => {
            let message = arr.get(1)?.as_str()?.to_string();
            Some(RelayMessage::Notice { message })
        }
        _ => None,
    }
}
