// =============================================================================
// Realtime frame parsing — contract ticks, orderbook depth, execution notices
// =============================================================================
//
// Field positions follow the broker's realtime TR layouts:
//   H0STCNT0 — 46 `^`-separated fields per record, multiple records may be
//              concatenated in one frame (newest last).
//   H0STASP0 — 57 `^`-separated fields, 10-depth quotes.
//   H0STCNI0 — ≥23 `^`-separated fields, AES-CBC encrypted when the frame's
//              encryption flag is set.
// =============================================================================

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::types::{MarketPressure, OrderSide};

const CONTRACT_FIELDS: usize = 46;
const ORDERBOOK_FIELDS: usize = 57;
const NOTICE_MIN_FIELDS: usize = 23;

// =============================================================================
// Parsed events
// =============================================================================

/// One `H0STCNT0` contract tick, normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractTick {
    pub code: String,
    pub contract_time: String,
    pub current_price: f64,
    pub change_sign: String,
    pub change_amount: f64,
    pub change_rate: f64,
    pub weighted_avg_price: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub ask_price1: f64,
    pub bid_price1: f64,
    pub contract_volume: u64,
    pub acc_volume: u64,
    pub acc_trade_amount: f64,
    pub sell_contract_count: u64,
    pub buy_contract_count: u64,
    pub net_buy_contract_count: i64,
    pub contract_strength: f64,
    pub contract_type: String,
    pub buy_ratio: f64,
    pub prev_volume_ratio: f64,
    pub market_operation_code: String,
    pub trading_halt: bool,
    pub ask_qty1: u64,
    pub bid_qty1: u64,
    pub total_ask_qty: u64,
    pub total_bid_qty: u64,
    pub volume_turnover_rate: f64,
    pub prev_same_time_volume: u64,
    pub prev_same_time_volume_rate: f64,
    pub hour_cls_code: String,
    pub vi_standard_price: f64,
    pub market_pressure: MarketPressure,
}

impl ContractTick {
    pub fn is_vi_active(&self) -> bool {
        matches!(self.hour_cls_code.as_str(), "51" | "52")
            || matches!(self.market_operation_code.as_str(), "30" | "31")
    }
}

/// One `H0STASP0` quote tick. The broker sends 10 levels; the engine keeps
/// the full depth here and the store projects the top 5.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderbookTick {
    pub code: String,
    pub business_hour: String,
    pub hour_cls_code: String,
    pub ask_prices: [f64; 10],
    pub bid_prices: [f64; 10],
    pub ask_qtys: [u64; 10],
    pub bid_qtys: [u64; 10],
    pub total_ask_qty: u64,
    pub total_bid_qty: u64,
    pub acc_volume: u64,
}

/// One `H0STCNI0` account execution notice, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionNotice {
    pub customer_id: String,
    pub account_no: String,
    pub order_no: String,
    pub orig_order_no: String,
    /// "01" sell, "02" buy.
    pub sell_buy_dvsn: String,
    pub stock_code: String,
    pub exec_qty: u32,
    pub exec_price: f64,
    pub exec_time: String,
    pub reject_yn: String,
    /// "2" means executed; anything else is an order/amend/cancel event.
    pub exec_yn: String,
    pub receipt_yn: String,
    pub branch_no: String,
    pub ord_qty: u32,
    pub ord_price: f64,
    pub stock_name: String,
}

impl ExecutionNotice {
    pub fn is_executed(&self) -> bool {
        self.exec_yn == "2"
    }

    pub fn side(&self) -> Option<OrderSide> {
        match self.sell_buy_dvsn.as_str() {
            "01" => Some(OrderSide::Sell),
            "02" => Some(OrderSide::Buy),
            _ => None,
        }
    }

    /// Dedup key for replayed notices.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}|{}", self.order_no, self.exec_time, self.exec_qty)
    }
}

// =============================================================================
// Parser
// =============================================================================

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ParserStats {
    pub processed: u64,
    pub errors: u64,
}

enum AesKey {
    K128([u8; 16]),
    K192([u8; 24]),
    K256([u8; 32]),
}

/// Stateful frame parser. The only state is the AES key/iv delivered by the
/// subscription acknowledgment for the account notice stream, plus counters.
pub struct FrameParser {
    aes: Mutex<Option<(AesKey, [u8; 16])>>,
    stats: Mutex<ParserStats>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            aes: Mutex::new(None),
            stats: Mutex::new(ParserStats::default()),
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats.lock().clone()
    }

    fn bump_processed(&self) {
        self.stats.lock().processed += 1;
    }

    fn bump_errors(&self) {
        self.stats.lock().errors += 1;
    }

    // -------------------------------------------------------------------------
    // Encryption keys
    // -------------------------------------------------------------------------

    /// Install the notice-decryption key and IV. The broker delivers them as
    /// base64, ASCII hex, or plain text; normalize to 16/24/32 raw bytes.
    pub fn set_encryption_keys(&self, key: &str, iv: &str) -> bool {
        let key_bytes = normalize_key_material(key);
        let iv_bytes = normalize_key_material(iv);
        match (key_bytes, iv_bytes) {
            (Some(k), Some(v)) if v.len() == 16 => {
                let mut iv_arr = [0u8; 16];
                iv_arr.copy_from_slice(&v);
                let aes_key = match k.len() {
                    16 => AesKey::K128(k.try_into().unwrap()),
                    24 => AesKey::K192(k.try_into().unwrap()),
                    32 => AesKey::K256(k.try_into().unwrap()),
                    n => {
                        warn!(len = n, "unsupported AES key length");
                        return false;
                    }
                };
                *self.aes.lock() = Some((aes_key, iv_arr));
                debug!("execution-notice decryption keys installed");
                true
            }
            _ => {
                warn!("failed to normalize AES key/iv material");
                false
            }
        }
    }

    pub fn has_encryption_keys(&self) -> bool {
        self.aes.lock().is_some()
    }

    /// Decrypt a base64 AES-CBC payload (padding-stripped base64 tolerated).
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let guard = self.aes.lock();
        let (key, iv) = guard
            .as_ref()
            .context("encrypted frame arrived before AES keys were set")?;

        let mut data = encrypted.trim().to_string();
        let missing = (4 - data.len() % 4) % 4;
        data.push_str(&"=".repeat(missing));
        let ciphertext = BASE64
            .decode(data.as_bytes())
            .context("execution notice payload is not valid base64")?;

        let plain = match key {
            AesKey::K128(k) => cbc::Decryptor::<aes::Aes128>::new(k.into(), iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
            AesKey::K192(k) => cbc::Decryptor::<aes::Aes192>::new(k.into(), iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
            AesKey::K256(k) => cbc::Decryptor::<aes::Aes256>::new(k.into(), iv.into())
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext),
        };
        let plain = match plain {
            Ok(p) => p,
            Err(_) => bail!("AES-CBC decryption failed (bad padding)"),
        };
        Ok(String::from_utf8_lossy(&plain).into_owned())
    }

    // -------------------------------------------------------------------------
    // H0STCNT0 — realtime contract
    // -------------------------------------------------------------------------

    /// Parse a contract payload. Frames may carry several concatenated
    /// records; the newest (last) record wins. Frames with fewer than 46
    /// fields are dropped and counted as errors.
    pub fn parse_contract(&self, payload: &str) -> Option<ContractTick> {
        let parts: Vec<&str> = payload.split('^').collect();
        if parts.len() < CONTRACT_FIELDS {
            warn!(fields = parts.len(), "contract frame too short, dropping");
            self.bump_errors();
            return None;
        }

        let total_records = parts.len() / CONTRACT_FIELDS;
        let start = (total_records - 1) * CONTRACT_FIELDS;
        let p = &parts[start..start + CONTRACT_FIELDS];

        let contract_type = p[21].to_string();
        let buy_ratio = safe_f64(p[22]);

        // Pressure from the contract type, corrected by the buy ratio.
        let mut market_pressure = match contract_type.as_str() {
            "1" => MarketPressure::Buy,
            "5" => MarketPressure::Sell,
            _ => MarketPressure::Neutral,
        };
        if buy_ratio > 60.0 {
            market_pressure = MarketPressure::Buy;
        } else if buy_ratio > 0.0 && buy_ratio < 40.0 {
            market_pressure = MarketPressure::Sell;
        }

        let hour_cls_code = p[43].to_string();
        let market_operation_code = p[34].to_string();
        let vi_active = matches!(hour_cls_code.as_str(), "51" | "52")
            || matches!(market_operation_code.as_str(), "30" | "31");

        let tick = ContractTick {
            code: p[0].to_string(),
            contract_time: p[1].to_string(),
            current_price: safe_f64(p[2]),
            change_sign: p[3].to_string(),
            change_amount: safe_f64(p[4]),
            change_rate: safe_f64(p[5]),
            weighted_avg_price: safe_f64(p[6]),
            open_price: safe_f64(p[7]),
            high_price: safe_f64(p[8]),
            low_price: safe_f64(p[9]),
            ask_price1: safe_f64(p[10]),
            bid_price1: safe_f64(p[11]),
            contract_volume: safe_u64(p[12]),
            acc_volume: safe_u64(p[13]),
            acc_trade_amount: safe_f64(p[14]),
            sell_contract_count: safe_u64(p[15]),
            buy_contract_count: safe_u64(p[16]),
            net_buy_contract_count: safe_i64(p[17]),
            contract_strength: safe_f64(p[18]),
            contract_type,
            buy_ratio,
            prev_volume_ratio: safe_f64(p[23]),
            market_operation_code,
            trading_halt: p[35] == "Y",
            ask_qty1: safe_u64(p[36]),
            bid_qty1: safe_u64(p[37]),
            // The alternate totals at 38/39 are the authoritative ones.
            total_ask_qty: safe_u64(p[38]),
            total_bid_qty: safe_u64(p[39]),
            volume_turnover_rate: safe_f64(p[40]),
            prev_same_time_volume: safe_u64(p[41]),
            prev_same_time_volume_rate: safe_f64(p[42]),
            hour_cls_code,
            vi_standard_price: if vi_active { safe_f64(p[45]) } else { 0.0 },
            market_pressure,
        };

        self.bump_processed();
        Some(tick)
    }

    // -------------------------------------------------------------------------
    // H0STASP0 — realtime orderbook
    // -------------------------------------------------------------------------

    pub fn parse_orderbook(&self, payload: &str) -> Option<OrderbookTick> {
        let p: Vec<&str> = payload.split('^').collect();
        if p.len() < ORDERBOOK_FIELDS {
            warn!(fields = p.len(), "orderbook frame too short, dropping");
            self.bump_errors();
            return None;
        }

        let mut ask_prices = [0.0; 10];
        let mut bid_prices = [0.0; 10];
        let mut ask_qtys = [0u64; 10];
        let mut bid_qtys = [0u64; 10];
        for i in 0..10 {
            ask_prices[i] = safe_f64(p[3 + i]);
            bid_prices[i] = safe_f64(p[13 + i]);
            ask_qtys[i] = safe_u64(p[23 + i]);
            bid_qtys[i] = safe_u64(p[33 + i]);
        }

        let tick = OrderbookTick {
            code: p[0].to_string(),
            business_hour: p[1].to_string(),
            hour_cls_code: p[2].to_string(),
            ask_prices,
            bid_prices,
            ask_qtys,
            bid_qtys,
            total_ask_qty: safe_u64(p[43]),
            total_bid_qty: safe_u64(p[44]),
            acc_volume: safe_u64(p[53]),
        };

        self.bump_processed();
        Some(tick)
    }

    // -------------------------------------------------------------------------
    // H0STCNI0 — account execution notice
    // -------------------------------------------------------------------------

    /// Parse a (decrypted) execution-notice record.
    ///
    /// Field order: customer_id|account_no|order_no|orig_order_no|
    /// sell_buy_dvsn|amend_dvsn|order_kind|order_cond|stock_code|exec_qty|
    /// exec_price|exec_time|reject_yn|exec_yn|receipt_yn|branch_no|ord_qty|
    /// account_name|stock_name|credit_dvsn|credit_loan_date|stock_name_40|
    /// ord_price
    pub fn parse_execution_notice(&self, payload: &str) -> Option<ExecutionNotice> {
        let p: Vec<&str> = payload.split('^').collect();
        if p.len() < NOTICE_MIN_FIELDS {
            warn!(fields = p.len(), "execution notice too short, dropping");
            self.bump_errors();
            return None;
        }

        let notice = ExecutionNotice {
            customer_id: p[0].to_string(),
            account_no: p[1].to_string(),
            order_no: p[2].to_string(),
            orig_order_no: p[3].to_string(),
            sell_buy_dvsn: p[4].to_string(),
            stock_code: p[8].to_string(),
            exec_qty: safe_u64(p[9]) as u32,
            exec_price: safe_f64(p[10]),
            exec_time: p[11].to_string(),
            reject_yn: p[12].to_string(),
            exec_yn: p[13].to_string(),
            receipt_yn: p[14].to_string(),
            branch_no: p[15].to_string(),
            ord_qty: safe_u64(p[16]) as u32,
            ord_price: safe_f64(p[22]),
            stock_name: p[18].to_string(),
        };

        self.bump_processed();
        Some(notice)
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Decode key material to raw bytes: plain ASCII of AES length, then hex,
/// then base64, then raw UTF-8 truncated to 32 bytes as a last resort.
fn normalize_key_material(value: &str) -> Option<Vec<u8>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if matches!(value.len(), 16 | 24 | 32) {
        return Some(value.as_bytes().to_vec());
    }

    if value.len() % 2 == 0 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(decoded) = hex::decode(value) {
            if matches!(decoded.len(), 16 | 24 | 32) {
                return Some(decoded);
            }
        }
    }

    if let Ok(decoded) = BASE64.decode(value.as_bytes()) {
        if matches!(decoded.len(), 16 | 24 | 32) {
            return Some(decoded);
        }
    }

    let bytes = value.as_bytes();
    if bytes.len() > 32 {
        warn!(len = bytes.len(), "AES material not 16/24/32 bytes, truncating");
        Some(bytes[..32].to_vec())
    } else {
        Some(bytes.to_vec())
    }
}

fn safe_f64(value: &str) -> f64 {
    let v = value.trim();
    if v.is_empty() {
        return 0.0;
    }
    v.parse::<f64>().unwrap_or(0.0)
}

fn safe_u64(value: &str) -> u64 {
    let v = value.trim();
    if v.is_empty() {
        return 0;
    }
    v.parse::<f64>().map(|f| f.max(0.0) as u64).unwrap_or(0)
}

fn safe_i64(value: &str) -> i64 {
    let v = value.trim();
    if v.is_empty() {
        return 0;
    }
    v.parse::<f64>().map(|f| f as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    /// Build a 46-field contract payload with recognizable values.
    fn contract_payload(code: &str, price: &str) -> String {
        let mut fields = vec![String::new(); CONTRACT_FIELDS];
        fields[0] = code.to_string();
        fields[1] = "091230".to_string();
        fields[2] = price.to_string();
        fields[3] = "2".to_string();
        fields[4] = "300".to_string();
        fields[5] = "0.40".to_string();
        fields[6] = "75150.5".to_string();
        fields[7] = "74800".to_string();
        fields[8] = "75400".to_string();
        fields[9] = "74600".to_string();
        fields[10] = "75310".to_string();
        fields[11] = "75290".to_string();
        fields[12] = "120".to_string();
        fields[13] = "1920000".to_string();
        fields[14] = "144000000000".to_string();
        fields[15] = "800".to_string();
        fields[16] = "1200".to_string();
        fields[17] = "400".to_string();
        fields[18] = "128.5".to_string();
        fields[19] = "50000".to_string();
        fields[20] = "60000".to_string();
        fields[21] = "1".to_string();
        fields[22] = "62.0".to_string();
        fields[23] = "160.0".to_string();
        fields[34] = "20".to_string();
        fields[35] = "N".to_string();
        fields[36] = "900".to_string();
        fields[37] = "1100".to_string();
        fields[38] = "52000".to_string();
        fields[39] = "61000".to_string();
        fields[40] = "1.25".to_string();
        fields[41] = "1200000".to_string();
        fields[42] = "160.0".to_string();
        fields[43] = "0".to_string();
        fields[44] = String::new();
        fields[45] = "0".to_string();
        fields.join("^")
    }

    #[test]
    fn contract_field_positions() {
        let parser = FrameParser::new();
        let tick = parser.parse_contract(&contract_payload("005930", "75300")).unwrap();
        assert_eq!(tick.code, "005930");
        assert!((tick.current_price - 75_300.0).abs() < f64::EPSILON);
        assert!((tick.contract_strength - 128.5).abs() < f64::EPSILON);
        assert!((tick.buy_ratio - 62.0).abs() < f64::EPSILON);
        assert_eq!(tick.acc_volume, 1_920_000);
        // Preferred totals come from fields 38/39, not 19/20.
        assert_eq!(tick.total_ask_qty, 52_000);
        assert_eq!(tick.total_bid_qty, 61_000);
        assert!(!tick.trading_halt);
        assert!(!tick.is_vi_active());
        assert_eq!(tick.market_pressure, MarketPressure::Buy);
    }

    #[test]
    fn contract_parse_is_idempotent() {
        let parser = FrameParser::new();
        let payload = contract_payload("005930", "75300");
        let a = parser.parse_contract(&payload).unwrap();
        let b = parser.parse_contract(&payload).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn short_contract_frame_dropped_and_counted() {
        let parser = FrameParser::new();
        assert!(parser.parse_contract("005930^091230^75300").is_none());
        assert_eq!(parser.stats().errors, 1);
        assert_eq!(parser.stats().processed, 0);
    }

    #[test]
    fn multi_record_frame_uses_newest() {
        let parser = FrameParser::new();
        let older = contract_payload("005930", "75000");
        let newer = contract_payload("005930", "75900");
        let tick = parser.parse_contract(&format!("{older}^{newer}")).unwrap();
        assert!((tick.current_price - 75_900.0).abs() < f64::EPSILON);
    }

    #[test]
    fn vi_activation_zeroes_or_keeps_standard_price() {
        let parser = FrameParser::new();
        let mut fields: Vec<String> =
            contract_payload("005380", "190000").split('^').map(String::from).collect();
        fields[45] = "185000".to_string();

        // VI inactive → standard price forced to 0.
        let tick = parser.parse_contract(&fields.join("^")).unwrap();
        assert_eq!(tick.vi_standard_price, 0.0);

        // hour_cls_code 51 → VI active, standard price preserved.
        fields[43] = "51".to_string();
        let tick = parser.parse_contract(&fields.join("^")).unwrap();
        assert!(tick.is_vi_active());
        assert!((tick.vi_standard_price - 185_000.0).abs() < f64::EPSILON);

        // market_operation_code 30 alone also activates VI.
        fields[43] = "0".to_string();
        fields[34] = "30".to_string();
        let tick = parser.parse_contract(&fields.join("^")).unwrap();
        assert!(tick.is_vi_active());
    }

    #[test]
    fn pressure_correction_from_buy_ratio() {
        let parser = FrameParser::new();
        let mut fields: Vec<String> =
            contract_payload("005930", "75300").split('^').map(String::from).collect();
        // Sell-typed contract but overwhelming buy ratio → BUY.
        fields[21] = "5".to_string();
        fields[22] = "70.0".to_string();
        let tick = parser.parse_contract(&fields.join("^")).unwrap();
        assert_eq!(tick.market_pressure, MarketPressure::Buy);

        fields[21] = "1".to_string();
        fields[22] = "30.0".to_string();
        let tick = parser.parse_contract(&fields.join("^")).unwrap();
        assert_eq!(tick.market_pressure, MarketPressure::Sell);
    }

    fn orderbook_payload(code: &str) -> String {
        let mut fields = vec![String::new(); ORDERBOOK_FIELDS];
        fields[0] = code.to_string();
        fields[1] = "092000".to_string();
        fields[2] = "0".to_string();
        for i in 0..10 {
            fields[3 + i] = format!("{}", 75_310 + i * 10); // asks
            fields[13 + i] = format!("{}", 75_290 - i * 10); // bids
            fields[23 + i] = format!("{}", 100 + i); // ask qtys
            fields[33 + i] = format!("{}", 200 + i); // bid qtys
        }
        fields[43] = "52000".to_string();
        fields[44] = "61000".to_string();
        fields[53] = "1920000".to_string();
        fields.join("^")
    }

    #[test]
    fn orderbook_depth_parsing() {
        let parser = FrameParser::new();
        let tick = parser.parse_orderbook(&orderbook_payload("005930")).unwrap();
        assert_eq!(tick.code, "005930");
        assert!((tick.ask_prices[0] - 75_310.0).abs() < f64::EPSILON);
        assert!((tick.bid_prices[0] - 75_290.0).abs() < f64::EPSILON);
        assert_eq!(tick.ask_qtys[9], 109);
        assert_eq!(tick.bid_qtys[0], 200);
        assert_eq!(tick.total_bid_qty, 61_000);

        assert!(parser.parse_orderbook("005930^1^2").is_none());
    }

    fn notice_payload(code: &str, side: &str, qty: &str, price: &str, exec_yn: &str) -> String {
        let mut fields = vec![String::new(); NOTICE_MIN_FIELDS];
        fields[0] = "HTS0001".to_string();
        fields[1] = "5001234567".to_string();
        fields[2] = "0000117057".to_string();
        fields[3] = String::new();
        fields[4] = side.to_string();
        fields[8] = code.to_string();
        fields[9] = qty.to_string();
        fields[10] = price.to_string();
        fields[11] = "091501".to_string();
        fields[12] = "0".to_string();
        fields[13] = exec_yn.to_string();
        fields[14] = "1".to_string();
        fields[15] = "91252".to_string();
        fields[16] = "13".to_string();
        fields[18] = "삼성전자".to_string();
        fields[22] = price.to_string();
        fields.join("^")
    }

    #[test]
    fn notice_parsing_and_side() {
        let parser = FrameParser::new();
        let n = parser
            .parse_execution_notice(&notice_payload("005930", "02", "13", "75350", "2"))
            .unwrap();
        assert_eq!(n.stock_code, "005930");
        assert_eq!(n.exec_qty, 13);
        assert!((n.exec_price - 75_350.0).abs() < f64::EPSILON);
        assert!(n.is_executed());
        assert_eq!(n.side(), Some(OrderSide::Buy));
        assert_eq!(n.order_no, "0000117057");
        assert_eq!(n.branch_no, "91252");

        let n = parser
            .parse_execution_notice(&notice_payload("005930", "01", "13", "77600", "1"))
            .unwrap();
        assert!(!n.is_executed());
        assert_eq!(n.side(), Some(OrderSide::Sell));
    }

    #[test]
    fn dedup_key_distinguishes_fills() {
        let parser = FrameParser::new();
        let a = parser
            .parse_execution_notice(&notice_payload("005930", "02", "7", "75350", "2"))
            .unwrap();
        let b = parser
            .parse_execution_notice(&notice_payload("005930", "02", "6", "75350", "2"))
            .unwrap();
        assert_ne!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), a.clone().dedup_key());
    }

    #[test]
    fn aes_roundtrip_with_base64_key() {
        // Encrypt a known notice with AES-128-CBC and confirm the parser
        // decrypts it after key normalization from base64.
        let key = b"0123456789abcdef";
        let iv = b"fedcba9876543210";
        let plain = notice_payload("005930", "02", "13", "75350", "2");

        let ciphertext = cbc::Encryptor::<aes::Aes128>::new(key.into(), iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
        // Strip the base64 padding as the broker does.
        let encoded = BASE64.encode(&ciphertext).trim_end_matches('=').to_string();

        let parser = FrameParser::new();
        assert!(parser.set_encryption_keys(&BASE64.encode(key), &BASE64.encode(iv)));
        let decrypted = parser.decrypt(&encoded).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn key_normalization_paths() {
        // Plain 16-char ASCII.
        assert_eq!(normalize_key_material("0123456789abcdef").unwrap().len(), 16);
        // Hex-encoded 16 bytes (32 hex chars).
        assert_eq!(
            normalize_key_material("00112233445566778899aabbccddeeff").unwrap(),
            hex::decode("00112233445566778899aabbccddeeff").unwrap()
        );
        // Base64-encoded 32 bytes.
        let b64 = BASE64.encode([7u8; 32]);
        assert_eq!(normalize_key_material(&b64).unwrap(), vec![7u8; 32]);
        assert!(normalize_key_material("").is_none());
    }

    #[test]
    fn decrypt_without_keys_is_an_error() {
        let parser = FrameParser::new();
        assert!(parser.decrypt("AAAA").is_err());
    }
}
