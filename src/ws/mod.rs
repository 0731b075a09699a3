// =============================================================================
// WebSocket Gateway — single multiplexed session to the broker realtime feed
// =============================================================================
//
// One message loop drives the session: recv with a 30 s timeout, classify,
// dispatch to registered callbacks, echo PINGPONG. Five consecutive errors,
// a closed connection, or a failed health check trigger a reconnect with a
// fresh approval key and a re-subscribe of the account notice stream.
// Per-symbol subscriptions are re-issued by the monitor on its next cycle.
// =============================================================================

pub mod connection;
pub mod handler;
pub mod parser;
pub mod subscriptions;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use connection::{WsConnection, WsCredentials, WsReader};
use handler::{HandlerOutcome, MessageHandler};
use parser::FrameParser;
use subscriptions::{EventCallback, SubscriptionManager, TR_CONTRACT, TR_NOTICE, TR_NOTICE_DEMO, TR_ORDERBOOK};

const RECV_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
/// Consecutive failed connect attempts before the gateway gives up and
/// returns, surfacing the outage to the orchestrator.
const MAX_CONNECT_FAILURES: u32 = 10;

pub struct WsGateway {
    connection: Arc<WsConnection>,
    parser: Arc<FrameParser>,
    subscriptions: Arc<SubscriptionManager>,
    handler: MessageHandler,
    hts_id: String,
    demo: bool,
    shutdown: AtomicBool,
    reconnects: AtomicU32,
}

impl WsGateway {
    pub fn new(
        ws_url: impl Into<String>,
        credentials: WsCredentials,
        hts_id: impl Into<String>,
        demo: bool,
        max_connections: u32,
        connections_per_stock: u32,
        system_connections: u32,
    ) -> Arc<Self> {
        let parser = Arc::new(FrameParser::new());
        let subscriptions = Arc::new(SubscriptionManager::new(
            max_connections,
            connections_per_stock,
            system_connections,
        ));
        let handler = MessageHandler::new(parser.clone(), subscriptions.clone());
        Arc::new(Self {
            connection: Arc::new(WsConnection::new(ws_url, credentials)),
            parser,
            subscriptions,
            handler,
            hts_id: hts_id.into(),
            demo,
            shutdown: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
        })
    }

    // -------------------------------------------------------------------------
    // Callbacks and status
    // -------------------------------------------------------------------------

    /// Register a callback for one TR id (`H0STCNT0`, `H0STASP0`, `H0STCNI0`).
    pub fn on(&self, tr_id: &str, callback: EventCallback) {
        self.subscriptions.register(tr_id, callback);
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_healthy(&self) -> bool {
        self.connection.is_healthy()
    }

    pub fn has_capacity(&self) -> bool {
        self.subscriptions.has_capacity()
    }

    pub fn is_subscribed(&self, code: &str) -> bool {
        self.subscriptions.is_subscribed(code)
    }

    pub fn subscribed_codes(&self) -> Vec<String> {
        self.subscriptions.subscribed()
    }

    pub fn subscription_usage(&self) -> String {
        self.subscriptions.usage()
    }

    pub fn parser_stats(&self) -> parser::ParserStats {
        self.parser.stats()
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe one symbol: contract + quote TRs, two slots.
    pub async fn subscribe(&self, code: &str) -> bool {
        if !self.connection.is_connected() {
            warn!(code, "subscribe while disconnected");
            return false;
        }
        if self.subscriptions.is_subscribed(code) {
            return true;
        }
        if !self.subscriptions.can_subscribe(code) {
            warn!(code, usage = %self.subscriptions.usage(), "subscription capacity reached");
            return false;
        }

        let contract = self.connection.build_control_frame(TR_CONTRACT, code, "1");
        let quote = self.connection.build_control_frame(TR_ORDERBOOK, code, "1");
        if let Err(e) = self.connection.send(contract).await {
            error!(code, error = %e, "contract subscribe failed");
            return false;
        }
        if let Err(e) = self.connection.send(quote).await {
            error!(code, error = %e, "quote subscribe failed");
            return false;
        }

        if self.subscriptions.add(code) {
            info!(code, usage = %self.subscriptions.usage(), "symbol subscribed");
            true
        } else {
            false
        }
    }

    pub async fn unsubscribe(&self, code: &str) -> bool {
        let contract = self.connection.build_control_frame(TR_CONTRACT, code, "2");
        let quote = self.connection.build_control_frame(TR_ORDERBOOK, code, "2");
        let mut ok = true;
        if let Err(e) = self.connection.send(contract).await {
            warn!(code, error = %e, "contract unsubscribe failed");
            ok = false;
        }
        if let Err(e) = self.connection.send(quote).await {
            warn!(code, error = %e, "quote unsubscribe failed");
            ok = false;
        }
        self.subscriptions.remove(code);
        info!(code, "symbol unsubscribed");
        ok
    }

    /// Subscribe the account execution-notice stream, keyed by HTS id.
    async fn subscribe_account_notices(&self) -> Result<()> {
        let tr = if self.demo { TR_NOTICE_DEMO } else { TR_NOTICE };
        let frame = self.connection.build_control_frame(tr, &self.hts_id, "1");
        self.connection.send(frame).await?;
        info!(tr, "account notice stream subscribed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Message loop
    // -------------------------------------------------------------------------

    /// Run the gateway until `safe_cleanup`. Reconnects internally; returns
    /// only on shutdown or when reconnection keeps failing.
    pub async fn run(self: Arc<Self>) {
        let mut connect_failures: u32 = 0;
        while !self.shutdown.load(Ordering::SeqCst) {
            let reader = match self.connection.connect().await {
                Ok(reader) => reader,
                Err(e) => {
                    connect_failures += 1;
                    error!(error = %e, connect_failures, "websocket connect failed, retrying");
                    if connect_failures >= MAX_CONNECT_FAILURES {
                        error!("repeated reconnect failures, giving up on the session");
                        return;
                    }
                    self.connection.reset_key();
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            };
            connect_failures = 0;

            if let Err(e) = self.subscribe_account_notices().await {
                error!(error = %e, "account notice subscribe failed");
            }

            self.message_loop(reader).await;

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            // Reconnect with a fresh approval key. Per-symbol subscriptions
            // are re-issued by the monitor; only the notice stream is ours.
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            warn!(reconnects = self.reconnects.load(Ordering::SeqCst), "reconnecting websocket");
            self.connection.disconnect().await;
            self.connection.reset_key();
            self.subscriptions.clear();
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
        info!("gateway loop stopped");
    }

    async fn message_loop(&self, mut reader: WsReader) {
        let mut consecutive_errors: u32 = 0;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let next = tokio::time::timeout(RECV_TIMEOUT, reader.next()).await;
            match next {
                Err(_) => {
                    // recv timeout: count toward the error threshold, and
                    // bail out early when the session has gone stale.
                    consecutive_errors += 1;
                    if !self.connection.is_healthy() || consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!(consecutive_errors, "recv timeouts exceeded, reconnecting");
                        self.connection.mark_disconnected();
                        return;
                    }
                }
                Ok(None) => {
                    warn!("websocket stream ended");
                    self.connection.mark_disconnected();
                    return;
                }
                Ok(Some(Err(e))) => {
                    consecutive_errors += 1;
                    error!(error = %e, consecutive_errors, "websocket recv error");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        self.connection.mark_disconnected();
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok(Some(Ok(message))) => {
                    consecutive_errors = 0;
                    match message {
                        Message::Text(text) => {
                            if let HandlerOutcome::Pong(payload) = self.handler.process(&text) {
                                if let Err(e) = self.connection.send_pong(payload).await {
                                    warn!(error = %e, "pong echo failed");
                                }
                            }
                        }
                        Message::Ping(payload) => {
                            // Transport-level ping; tungstenite queues the
                            // pong, nothing to do beyond logging.
                            tracing::debug!(len = payload.len(), "transport ping");
                        }
                        Message::Close(_) => {
                            warn!("close frame received");
                            self.connection.mark_disconnected();
                            return;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Stop the loop, close the socket, clear subscriptions.
    pub async fn safe_cleanup(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.connection.disconnect().await;
        self.subscriptions.clear();
        let stats = self.connection.stats();
        info!(
            connections = stats.successful_connections,
            sent = stats.messages_sent,
            pongs = stats.pongs_sent,
            reconnects = self.reconnects.load(Ordering::SeqCst),
            "gateway cleaned up"
        );
    }
}

impl std::fmt::Debug for WsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsGateway")
            .field("connected", &self.is_connected())
            .field("subscribed", &self.subscriptions.count())
            .field("usage", &self.subscription_usage())
            .finish()
    }
}
