// =============================================================================
// WebSocket connection — approval key, session lifecycle, control frames
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsReader = SplitStream<WsStream>;
type WsWriter = SplitSink<WsStream, Message>;

/// Seconds without a pong before the session counts as unhealthy.
const PONG_STALE_SECS: u64 = 60;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ConnectionStats {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub disconnections: u64,
    pub messages_sent: u64,
    pub pongs_sent: u64,
}

/// Broker credentials needed for the websocket approval handshake.
#[derive(Clone)]
pub struct WsCredentials {
    pub rest_base: String,
    pub app_key: String,
    pub app_secret: String,
}

impl std::fmt::Debug for WsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsCredentials")
            .field("rest_base", &self.rest_base)
            .field("app_key", &"<redacted>")
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// Owns the socket write half and the approval key. The read half is handed
/// to the gateway's single message loop on connect.
pub struct WsConnection {
    ws_url: String,
    credentials: WsCredentials,
    http: reqwest::Client,

    approval_key: RwLock<Option<String>>,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    connected: AtomicBool,
    last_pong: Mutex<Option<Instant>>,
    stats: Mutex<ConnectionStats>,
}

impl WsConnection {
    pub fn new(ws_url: impl Into<String>, credentials: WsCredentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            ws_url: ws_url.into(),
            credentials,
            http,
            approval_key: RwLock::new(None),
            writer: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            last_pong: Mutex::new(None),
            stats: Mutex::new(ConnectionStats::default()),
        }
    }

    // -------------------------------------------------------------------------
    // Approval key
    // -------------------------------------------------------------------------

    /// POST /oauth2/Approval. The key is cached for the session; `reset_key`
    /// drops it so a reconnect fetches a fresh one.
    pub async fn approval_key(&self) -> Result<String> {
        if let Some(key) = self.approval_key.read().clone() {
            return Ok(key);
        }

        info!("requesting websocket approval key");
        let url = format!("{}/oauth2/Approval", self.credentials.rest_base);
        let body = json!({
            "grant_type": "client_credentials",
            "appkey": self.credentials.app_key,
            "secretkey": self.credentials.app_secret,
        });

        let resp = self
            .http
            .post(&url)
            .header("content-type", "application/json; charset=utf-8")
            .json(&body)
            .send()
            .await
            .context("POST /oauth2/Approval request failed")?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse approval response")?;
        if !status.is_success() {
            anyhow::bail!("approval request returned {status}: {payload}");
        }

        let key = payload
            .get("approval_key")
            .and_then(|v| v.as_str())
            .context("approval response missing approval_key")?
            .to_string();

        *self.approval_key.write() = Some(key.clone());
        info!("websocket approval key issued");
        Ok(key)
    }

    pub fn reset_key(&self) {
        *self.approval_key.write() = None;
    }

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------

    /// Open the session and return the read half for the message loop.
    /// Idempotence is the caller's concern: a second connect replaces the
    /// write half and orphans the previous reader.
    pub async fn connect(&self) -> Result<WsReader> {
        self.stats.lock().connection_attempts += 1;

        self.approval_key().await.context("approval key unavailable")?;

        info!(url = %self.ws_url, "connecting websocket");
        let (stream, _response) = connect_async(&self.ws_url)
            .await
            .context("websocket connect failed")?;
        let (writer, reader) = stream.split();

        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        *self.last_pong.lock() = None;
        self.stats.lock().successful_connections += 1;
        info!("websocket connected");
        Ok(reader)
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        if let Some(mut w) = writer.take() {
            if let Err(e) = w.close().await {
                debug!(error = %e, "websocket close error");
            }
            self.stats.lock().disconnections += 1;
        }
        info!("websocket disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Socket open and a pong observed within the stale window (a session
    /// that has not yet seen any pong counts as healthy).
    pub fn is_healthy(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        match *self.last_pong.lock() {
            Some(at) => at.elapsed().as_secs() <= PONG_STALE_SECS,
            None => true,
        }
    }

    // -------------------------------------------------------------------------
    // Frames
    // -------------------------------------------------------------------------

    /// Outbound control frame: register (`tr_type="1"`) or release
    /// (`tr_type="2"`) one TR for one key.
    pub fn build_control_frame(&self, tr_id: &str, tr_key: &str, tr_type: &str) -> String {
        let frame = json!({
            "header": {
                "approval_key": self.approval_key.read().clone().unwrap_or_default(),
                "custtype": "P",
                "tr_type": tr_type,
                "content-type": "utf-8",
            },
            "body": {
                "input": {
                    "tr_id": tr_id,
                    "tr_key": tr_key,
                }
            }
        });
        frame.to_string()
    }

    pub async fn send(&self, text: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let w = writer.as_mut().context("websocket not connected")?;
        w.send(Message::Text(text)).await.context("websocket send failed")?;
        self.stats.lock().messages_sent += 1;
        Ok(())
    }

    /// Echo a PINGPONG payload byte-for-byte and refresh the pong clock.
    pub async fn send_pong(&self, payload: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let w = writer.as_mut().context("websocket not connected")?;
        w.send(Message::Text(payload))
            .await
            .context("pingpong echo failed")?;
        *self.last_pong.lock() = Some(Instant::now());
        self.stats.lock().pongs_sent += 1;
        debug!("pingpong echoed");
        Ok(())
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn set_approval_key_for_tests(&self, key: &str) {
        *self.approval_key.write() = Some(key.to_string());
    }

    #[cfg(test)]
    pub(crate) fn set_last_pong_for_tests(&self, at: Instant) {
        *self.last_pong.lock() = Some(at);
    }
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("ws_url", &self.ws_url)
            .field("connected", &self.is_connected())
            .finish()
    }
}
