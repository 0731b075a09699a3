// =============================================================================
// Message handler — classifies inbound frames and dispatches parsed events
// =============================================================================
//
// Two frame kinds arrive on the session:
//   * JSON system messages: PINGPONG (echo verbatim) and subscription acks,
//     which may carry the AES KEY/IV for execution-notice decryption.
//   * Pipe-delimited realtime frames `flag|tr_id|count|payload`, where
//     flag "1" marks base64 AES-CBC ciphertext.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::parser::FrameParser;
use super::subscriptions::{
    GatewayEvent, SubscriptionManager, TR_CONTRACT, TR_NOTICE, TR_NOTICE_DEMO, TR_ORDERBOOK,
};

/// What the message loop should do after a frame was handled.
#[derive(Debug, PartialEq)]
pub enum HandlerOutcome {
    /// Echo this exact payload back (PINGPONG).
    Pong(String),
    /// Frame consumed (dispatched, ack'd, or deliberately skipped).
    Handled,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct HandlerStats {
    pub messages: u64,
    pub ping_pongs: u64,
    pub errors: u64,
}

pub struct MessageHandler {
    parser: Arc<FrameParser>,
    subscriptions: Arc<SubscriptionManager>,
    stats: Mutex<HandlerStats>,
}

impl MessageHandler {
    pub fn new(parser: Arc<FrameParser>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            parser,
            subscriptions,
            stats: Mutex::new(HandlerStats::default()),
        }
    }

    pub fn stats(&self) -> HandlerStats {
        self.stats.lock().clone()
    }

    /// Classify and handle one inbound text frame. Per-frame errors are
    /// logged and swallowed; the message loop never stops for one bad frame.
    pub fn process(&self, message: &str) -> HandlerOutcome {
        self.stats.lock().messages += 1;
        if message.starts_with('{') {
            self.handle_system_message(message)
        } else {
            self.handle_realtime_frame(message);
            HandlerOutcome::Handled
        }
    }

    // -------------------------------------------------------------------------
    // System messages
    // -------------------------------------------------------------------------

    fn handle_system_message(&self, message: &str) -> HandlerOutcome {
        let parsed: serde_json::Value = match serde_json::from_str(message) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "malformed system message");
                self.stats.lock().errors += 1;
                return HandlerOutcome::Handled;
            }
        };

        let tr_id = parsed["header"]["tr_id"].as_str().unwrap_or_default();
        if tr_id == "PINGPONG" {
            self.stats.lock().ping_pongs += 1;
            debug!("pingpong received");
            return HandlerOutcome::Pong(message.to_string());
        }

        let body = &parsed["body"];
        let rt_cd = body["rt_cd"].as_str().unwrap_or_default();
        let msg1 = body["msg1"].as_str().unwrap_or_default();
        if rt_cd == "0" {
            debug!(tr_id, msg = msg1, "system message");
            // Subscription acks may carry the notice AES key/iv in
            // body.output; field names vary in case across accounts.
            let output = if body["output"].is_object() {
                &body["output"]
            } else {
                &parsed["output"]
            };
            let key = find_field(output, &["KEY", "key", "aes_key", "AES_KEY"]);
            let iv = find_field(output, &["IV", "iv", "aes_iv", "AES_IV"]);
            if let (Some(key), Some(iv)) = (key, iv) {
                if self.parser.set_encryption_keys(&key, &iv) {
                    info!("execution-notice encryption keys installed");
                } else {
                    warn!("failed to install execution-notice encryption keys");
                }
            }
        } else {
            warn!(tr_id, rt_cd, msg = msg1, "system message error");
        }
        HandlerOutcome::Handled
    }

    // -------------------------------------------------------------------------
    // Realtime frames
    // -------------------------------------------------------------------------

    fn handle_realtime_frame(&self, message: &str) {
        let parts: Vec<&str> = message.splitn(4, '|').collect();
        if parts.len() < 4 {
            debug!(parts = parts.len(), "short realtime frame, skipping");
            self.stats.lock().errors += 1;
            return;
        }
        let encrypted = parts[0] == "1";
        let tr_id = parts[1];
        let payload = parts[3];

        let payload = if encrypted {
            match self.parser.decrypt(payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!(tr_id, error = %e, "failed to decrypt frame, skipping");
                    self.stats.lock().errors += 1;
                    return;
                }
            }
        } else {
            payload.to_string()
        };

        match tr_id {
            TR_CONTRACT => {
                if let Some(tick) = self.parser.parse_contract(&payload) {
                    self.subscriptions.dispatch(TR_CONTRACT, &GatewayEvent::Contract(tick));
                }
            }
            TR_ORDERBOOK => {
                if let Some(tick) = self.parser.parse_orderbook(&payload) {
                    self.subscriptions.dispatch(TR_ORDERBOOK, &GatewayEvent::Orderbook(tick));
                }
            }
            TR_NOTICE | TR_NOTICE_DEMO => {
                if let Some(notice) = self.parser.parse_execution_notice(&payload) {
                    self.subscriptions.dispatch(TR_NOTICE, &GatewayEvent::Notice(notice));
                }
            }
            other => {
                warn!(tr_id = other, "unknown TR id, skipping frame");
            }
        }
    }
}

fn find_field(value: &serde_json::Value, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(v) = value.get(name).and_then(|v| v.as_str()) {
            return Some(v.to_string());
        }
    }
    None
}
