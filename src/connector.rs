//! Transport connectors: how a session reaches the backend.
//!
//! Two wire shapes carry the same envelope schema: a duplex WebSocket,
//! or a receive-only SSE stream paired with HTTP POST for the send
//! direction. A connector hides the shape behind a pair of channel
//! endpoints, which also lets the session state machine be tested with
//! no network at all.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::config::SessionMode;

/// Inbound side of one connection.
#[derive(Debug)]
pub enum WireEvent {
    /// One wire message (envelope JSON).
    Message(String),
    /// The connection is gone; no more events will follow.
    Closed,
}

/// Channel endpoints of one open connection. Dropping `outgoing` closes
/// the connection from our side.
pub struct WireDuplex {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<WireEvent>,
}

/// Opens one logical connection for a session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, session_id: &str, mode: SessionMode) -> anyhow::Result<WireDuplex>;
}

// ======================== Duplex WebSocket ========================

/// Full-duplex socket at `{base}/ws/{session_id}?is_audio=...`, envelope
/// JSON text frames in both directions.
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, session_id: &str, mode: SessionMode) -> anyhow::Result<WireDuplex> {
        let url = Url::parse(&format!(
            "{}/ws/{}?is_audio={}",
            self.base_url,
            session_id,
            mode.is_audio()
        ))?;

        log::info!("connecting to {}...", url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        log::info!("connected");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = mpsc::channel::<WireEvent>(64);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if in_tx.send(WireEvent::Message(text.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                log::info!("server closed connection: {:?}", frame);
                                let _ = in_tx.send(WireEvent::Closed).await;
                                break;
                            }
                            Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                            Some(Err(e)) => {
                                log::warn!("websocket read error: {}", e);
                                let _ = in_tx.send(WireEvent::Closed).await;
                                break;
                            }
                            None => {
                                let _ = in_tx.send(WireEvent::Closed).await;
                                break;
                            }
                        }
                    }
                    cmd = out_rx.recv() => {
                        match cmd {
                            Some(text) => {
                                if let Err(e) = write.send(Message::Text(text.into())).await {
                                    log::warn!("websocket send failed: {}", e);
                                    let _ = in_tx.send(WireEvent::Closed).await;
                                    break;
                                }
                            }
                            None => {
                                // Session side hung up; close cleanly.
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(WireDuplex {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

// ======================== SSE + POST pair ========================

/// Receive-only event stream at `{base}/events/{session_id}?is_audio=...`
/// paired with `POST {base}/send/{session_id}` for the send direction.
/// Same envelope schema both ways.
pub struct SseConnector {
    base_url: String,
    client: reqwest::Client,
}

impl SseConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Connector for SseConnector {
    async fn open(&self, session_id: &str, mode: SessionMode) -> anyhow::Result<WireDuplex> {
        let events_url = format!(
            "{}/events/{}?is_audio={}",
            self.base_url,
            session_id,
            mode.is_audio()
        );
        let send_url = format!("{}/send/{}", self.base_url, session_id);

        log::info!("connecting to {}...", events_url);
        let response = self
            .client
            .get(&events_url)
            .send()
            .await?
            .error_for_status()?;
        log::info!("event stream open");

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = mpsc::channel::<WireEvent>(64);

        // Receive half: parse `data:` lines out of the byte stream. An
        // event ends at a blank line; multiple data lines per event do
        // not occur in this protocol.
        let mut stream = response.bytes_stream();
        tokio::spawn(async move {
            let mut pending = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        pending.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(end) = pending.find("\n\n") {
                            let block: String = pending.drain(..end + 2).collect();
                            for line in block.lines() {
                                if let Some(data) = line.strip_prefix("data:") {
                                    let event = WireEvent::Message(data.trim_start().to_string());
                                    if in_tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("event stream error: {}", e);
                        break;
                    }
                }
            }
            let _ = in_tx.send(WireEvent::Closed).await;
        });

        // Send half: each outgoing wire message is one POST.
        let client = self.client.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                let request = client
                    .post(&send_url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(text);
                match request.send().await {
                    Ok(resp) if !resp.status().is_success() => {
                        log::warn!("send endpoint returned {}", resp.status());
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("send request failed: {}", e),
                }
            }
        });

        Ok(WireDuplex {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
