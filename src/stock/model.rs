// =============================================================================
// Per-symbol data model: reference bars, realtime ticks, trade bookkeeping,
// and the atomic Snapshot projection the decision loop consumes.
// =============================================================================

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::types::{now_kst, MarketPressure, TradingStatus};

/// One daily OHLCV bar as returned by the broker's chart endpoint
/// (newest-first ordering in API responses).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(default)]
    pub trading_value: f64,
}

/// Static per-symbol record created at selection time.
#[derive(Debug, Clone, Serialize)]
pub struct StockMeta {
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Tz>,
    pub max_holding_days: u32,
    pub is_intraday_added: bool,
    pub intraday_reasons: String,
    pub intraday_score: f64,
}

/// Reference data frozen for the trading day (yesterday's bars + indicators).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceData {
    pub yesterday_close: f64,
    pub yesterday_volume: u64,
    pub yesterday_high: f64,
    pub yesterday_low: f64,

    pub sma_20: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,

    pub pattern_score: f64,
    pub pattern_names: Vec<String>,

    pub avg_daily_volume: u64,
    pub avg_trading_value: f64,
}

impl Default for ReferenceData {
    fn default() -> Self {
        Self {
            yesterday_close: 0.0,
            yesterday_volume: 0,
            yesterday_high: 0.0,
            yesterday_low: 0.0,
            sma_20: 0.0,
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            bb_upper: 0.0,
            bb_middle: 0.0,
            bb_lower: 0.0,
            pattern_score: 0.0,
            pattern_names: Vec::new(),
            avg_daily_volume: 0,
            avg_trading_value: 0.0,
        }
    }
}

/// Realtime state mutated only by gateway-driven writes.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeData {
    pub current_price: f64,
    pub bid_price: f64,
    pub ask_price: f64,

    pub bid_prices: [f64; 5],
    pub ask_prices: [f64; 5],
    pub bid_volumes: [u64; 5],
    pub ask_volumes: [u64; 5],

    pub today_volume: u64,
    pub contract_volume: u64,
    pub today_high: f64,
    pub today_low: f64,

    pub contract_strength: f64,
    pub buy_ratio: f64,
    pub market_pressure: MarketPressure,
    pub sell_contract_count: u64,
    pub buy_contract_count: u64,
    pub net_buy_contract_count: i64,
    pub total_ask_qty: u64,
    pub total_bid_qty: u64,

    pub volume_turnover_rate: f64,
    pub prev_same_time_volume: u64,
    pub prev_same_time_volume_rate: f64,

    pub change_sign: String,
    pub change_amount: f64,
    pub change_rate: f64,
    pub weighted_avg_price: f64,

    pub vi_standard_price: f64,
    pub trading_halt: bool,
    pub hour_cls_code: String,
    pub market_operation_code: String,

    // derived
    pub volume_spike_ratio: f64,
    pub price_change_rate: f64,
    pub volatility: f64,

    pub last_updated: DateTime<Tz>,
}

impl Default for RealtimeData {
    fn default() -> Self {
        Self {
            current_price: 0.0,
            bid_price: 0.0,
            ask_price: 0.0,
            bid_prices: [0.0; 5],
            ask_prices: [0.0; 5],
            bid_volumes: [0; 5],
            ask_volumes: [0; 5],
            today_volume: 0,
            contract_volume: 0,
            today_high: 0.0,
            today_low: 0.0,
            contract_strength: 100.0,
            buy_ratio: 50.0,
            market_pressure: MarketPressure::Neutral,
            sell_contract_count: 0,
            buy_contract_count: 0,
            net_buy_contract_count: 0,
            total_ask_qty: 0,
            total_bid_qty: 0,
            volume_turnover_rate: 0.0,
            prev_same_time_volume: 0,
            prev_same_time_volume_rate: 0.0,
            change_sign: "3".to_string(),
            change_amount: 0.0,
            change_rate: 0.0,
            weighted_avg_price: 0.0,
            vi_standard_price: 0.0,
            trading_halt: false,
            hour_cls_code: "0".to_string(),
            market_operation_code: "20".to_string(),
            volume_spike_ratio: 1.0,
            price_change_rate: 0.0,
            volatility: 0.0,
            last_updated: now_kst(),
        }
    }
}

impl RealtimeData {
    /// Volatility Interruption is active when the hour class or the market
    /// operation code reports it.
    pub fn is_vi_active(&self) -> bool {
        matches!(self.hour_cls_code.as_str(), "51" | "52")
            || matches!(self.market_operation_code.as_str(), "30" | "31")
    }

    pub fn touch(&mut self) {
        let now = now_kst();
        // last_updated is monotone non-decreasing per symbol.
        if now > self.last_updated {
            self.last_updated = now;
        }
    }
}

/// Broker-side identification of an open order leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: String,
    pub orgno: String,
    /// HHMMSS order time as echoed by the broker.
    pub order_time_api: String,
}

/// Trade bookkeeping for one symbol: the buy leg, the sell leg, and the
/// fill-aggregation fields shared by the execution-notice processor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeInfo {
    pub buy_price: Option<f64>,
    pub buy_quantity: Option<u32>,
    pub buy_amount: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss_price: Option<f64>,

    pub buy_order: Option<OrderRef>,
    pub sell_order: Option<OrderRef>,

    pub order_time: Option<DateTime<Tz>>,
    pub execution_time: Option<DateTime<Tz>>,
    pub sell_order_time: Option<DateTime<Tz>>,
    pub sell_execution_time: Option<DateTime<Tz>>,

    pub sell_price: Option<f64>,
    pub sell_reason: Option<String>,

    pub unrealized_pnl: Option<f64>,
    pub unrealized_pnl_rate: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_rate: Option<f64>,

    pub ordered_qty: Option<u32>,
    pub filled_qty: u32,
    pub remaining_qty: Option<u32>,
    pub avg_exec_price: Option<f64>,

    pub dynamic_peak_price: Option<f64>,
    pub dynamic_target_price: Option<f64>,

    pub detected_time: Option<DateTime<Tz>>,
    pub updated_at: Option<DateTime<Tz>>,
}

/// Field updates applied through the `change_status` gate. `Option<Option<T>>`
/// distinguishes "leave unchanged" (None) from "clear" (Some(None)).
#[derive(Debug, Clone, Default)]
pub struct TradeUpdates {
    pub buy_price: Option<f64>,
    pub buy_quantity: Option<u32>,
    pub buy_amount: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss_price: Option<f64>,

    pub buy_order: Option<Option<OrderRef>>,
    pub sell_order: Option<Option<OrderRef>>,
    pub order_time: Option<Option<DateTime<Tz>>>,
    pub sell_order_time: Option<Option<DateTime<Tz>>>,
    pub execution_time: Option<DateTime<Tz>>,
    pub sell_execution_time: Option<DateTime<Tz>>,

    pub sell_price: Option<f64>,
    pub sell_reason: Option<String>,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_rate: Option<f64>,

    pub ordered_qty: Option<Option<u32>>,
    pub filled_qty: Option<u32>,
    pub remaining_qty: Option<Option<u32>>,
    pub avg_exec_price: Option<f64>,

    pub dynamic_peak_price: Option<f64>,
    pub dynamic_target_price: Option<f64>,
}

impl TradeUpdates {
    pub fn apply(self, info: &mut TradeInfo) {
        // Plain `Option` fields overwrite when set.
        if let Some(v) = self.buy_price {
            info.buy_price = Some(v);
        }
        if let Some(v) = self.buy_quantity {
            info.buy_quantity = Some(v);
        }
        if let Some(v) = self.buy_amount {
            info.buy_amount = Some(v);
        }
        if let Some(v) = self.target_price {
            info.target_price = Some(v);
        }
        if let Some(v) = self.stop_loss_price {
            info.stop_loss_price = Some(v);
        }
        if let Some(v) = self.execution_time {
            info.execution_time = Some(v);
        }
        if let Some(v) = self.sell_execution_time {
            info.sell_execution_time = Some(v);
        }
        if let Some(v) = self.sell_price {
            info.sell_price = Some(v);
        }
        if let Some(v) = self.sell_reason {
            info.sell_reason = Some(v);
        }
        if let Some(v) = self.realized_pnl {
            info.realized_pnl = Some(v);
        }
        if let Some(v) = self.realized_pnl_rate {
            info.realized_pnl_rate = Some(v);
        }
        if let Some(v) = self.avg_exec_price {
            info.avg_exec_price = Some(v);
        }
        if let Some(v) = self.dynamic_peak_price {
            info.dynamic_peak_price = Some(v);
        }
        if let Some(v) = self.dynamic_target_price {
            info.dynamic_target_price = Some(v);
        }

        // Double-`Option` fields distinguish set from clear.
        if let Some(v) = self.buy_order {
            info.buy_order = v;
        }
        if let Some(v) = self.sell_order {
            info.sell_order = v;
        }
        if let Some(v) = self.order_time {
            info.order_time = v;
        }
        if let Some(v) = self.sell_order_time {
            info.sell_order_time = v;
        }
        if let Some(v) = self.ordered_qty {
            info.ordered_qty = v;
        }
        if let Some(v) = self.remaining_qty {
            info.remaining_qty = v;
        }
        if let Some(v) = self.filled_qty {
            info.filled_qty = v;
        }
        info.updated_at = Some(now_kst());
    }

    // --- builder helpers used by the executor and recovery paths -------------

    pub fn with_buy_order(mut self, order: OrderRef, at: DateTime<Tz>) -> Self {
        self.buy_order = Some(Some(order));
        self.order_time = Some(Some(at));
        self
    }

    pub fn with_sell_order(mut self, order: OrderRef, at: DateTime<Tz>) -> Self {
        self.sell_order = Some(Some(order));
        self.sell_order_time = Some(Some(at));
        self
    }

    pub fn clearing_buy_order(mut self) -> Self {
        self.buy_order = Some(None);
        self.order_time = Some(None);
        self
    }

    pub fn clearing_sell_order(mut self) -> Self {
        self.sell_order = Some(None);
        self.sell_order_time = Some(None);
        self
    }
}

/// Atomic, immutable cross-section of one symbol taken under the store's
/// triple lock in the fixed order reference → realtime → status.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub code: String,
    pub name: String,

    // realtime
    pub current_price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_prices: [f64; 5],
    pub ask_prices: [f64; 5],
    pub today_volume: u64,
    pub today_high: f64,
    pub today_low: f64,
    pub price_change_rate: f64,
    pub volume_spike_ratio: f64,
    pub volatility: f64,
    pub contract_strength: f64,
    pub buy_ratio: f64,
    pub market_pressure: MarketPressure,
    pub sell_contract_count: u64,
    pub buy_contract_count: u64,
    pub total_ask_qty: u64,
    pub total_bid_qty: u64,
    pub volume_turnover_rate: f64,
    pub prev_same_time_volume_rate: f64,
    pub trading_halt: bool,
    pub vi_active: bool,
    pub vi_standard_price: f64,
    pub last_updated: DateTime<Tz>,

    // reference
    pub yesterday_close: f64,
    pub sma_20: f64,
    pub pattern_score: f64,
    pub avg_daily_volume: u64,

    // status + trade info
    pub status: TradingStatus,
    pub buy_price: Option<f64>,
    pub buy_quantity: Option<u32>,
    pub target_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub order_time: Option<DateTime<Tz>>,
    pub sell_order_time: Option<DateTime<Tz>>,
    pub execution_time: Option<DateTime<Tz>>,
    pub unrealized_pnl: Option<f64>,
    pub unrealized_pnl_rate: Option<f64>,
    pub dynamic_peak_price: Option<f64>,
    pub dynamic_target_price: Option<f64>,

    pub is_intraday_added: bool,
    pub max_holding_days: u32,
    pub liquidity_score: f64,

    pub snapshot_time: DateTime<Tz>,
}

impl Snapshot {
    /// Minutes since the buy order went out; 0 when no order is open.
    pub fn holding_minutes(&self, now: DateTime<Tz>) -> f64 {
        self.order_time
            .map(|t| (now - t).num_seconds() as f64 / 60.0)
            .unwrap_or(0.0)
    }

    /// Unrealized P&L rate at `price`, as a percentage of the buy price.
    pub fn pnl_rate_at(&self, price: f64) -> f64 {
        match self.buy_price {
            Some(buy) if buy > 0.0 && price > 0.0 => (price - buy) / buy * 100.0,
            _ => 0.0,
        }
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        matches!((self.stop_loss_price, self.buy_price), (Some(stop), Some(_)) if price <= stop)
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        matches!((self.target_price, self.buy_price), (Some(target), Some(_)) if price >= target)
    }

    pub fn holding_period_exceeded(&self, now: DateTime<Tz>) -> bool {
        match self.execution_time {
            Some(t) => (now - t).num_days() >= self.max_holding_days as i64,
            None => false,
        }
    }

    /// Position of the current price inside today's range, 0–100.
    pub fn daily_range_position(&self) -> f64 {
        let range = self.today_high - self.today_low;
        if self.today_high > 0.0 && self.today_low > 0.0 && range > 0.0 {
            (self.current_price - self.today_low) / range * 100.0
        } else {
            50.0
        }
    }

    /// Quoted spread as a percentage of the bid, when both sides exist.
    pub fn spread_rate(&self) -> Option<f64> {
        if self.bid_price > 0.0 && self.ask_price > 0.0 {
            Some((self.ask_price - self.bid_price) / self.bid_price * 100.0)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            code: "005930".into(),
            name: "삼성전자".into(),
            current_price: 75_000.0,
            bid_price: 74_990.0,
            ask_price: 75_010.0,
            bid_prices: [0.0; 5],
            ask_prices: [0.0; 5],
            today_volume: 1_000_000,
            today_high: 76_000.0,
            today_low: 74_000.0,
            price_change_rate: 1.0,
            volume_spike_ratio: 1.5,
            volatility: 2.7,
            contract_strength: 110.0,
            buy_ratio: 55.0,
            market_pressure: MarketPressure::Neutral,
            sell_contract_count: 100,
            buy_contract_count: 150,
            total_ask_qty: 10_000,
            total_bid_qty: 12_000,
            volume_turnover_rate: 1.0,
            prev_same_time_volume_rate: 120.0,
            trading_halt: false,
            vi_active: false,
            vi_standard_price: 0.0,
            last_updated: now_kst(),
            yesterday_close: 74_300.0,
            sma_20: 73_000.0,
            pattern_score: 60.0,
            avg_daily_volume: 900_000,
            status: TradingStatus::Bought,
            buy_price: Some(74_500.0),
            buy_quantity: Some(10),
            target_price: Some(76_700.0),
            stop_loss_price: Some(73_000.0),
            order_time: None,
            sell_order_time: None,
            execution_time: None,
            unrealized_pnl: Some(5_000.0),
            unrealized_pnl_rate: Some(0.67),
            dynamic_peak_price: None,
            dynamic_target_price: None,
            is_intraday_added: false,
            max_holding_days: 1,
            liquidity_score: 5.0,
            snapshot_time: now_kst(),
        }
    }

    #[test]
    fn stop_and_target_checks() {
        let snap = snapshot();
        assert!(snap.should_stop_loss(72_900.0));
        assert!(!snap.should_stop_loss(73_100.0));
        assert!(snap.should_take_profit(76_800.0));
        assert!(!snap.should_take_profit(76_000.0));
    }

    #[test]
    fn pnl_rate_relative_to_buy_price() {
        let snap = snapshot();
        let rate = snap.pnl_rate_at(76_735.0);
        assert!((rate - 3.0).abs() < 1e-9);
        assert_eq!(snap.pnl_rate_at(0.0), 0.0);
    }

    #[test]
    fn daily_range_position_bounds() {
        let mut snap = snapshot();
        snap.current_price = 74_000.0;
        assert!((snap.daily_range_position() - 0.0).abs() < 1e-9);
        snap.current_price = 76_000.0;
        assert!((snap.daily_range_position() - 100.0).abs() < 1e-9);
        snap.today_high = 0.0;
        assert!((snap.daily_range_position() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn vi_detection_from_codes() {
        let mut rt = RealtimeData::default();
        assert!(!rt.is_vi_active());
        rt.hour_cls_code = "51".into();
        assert!(rt.is_vi_active());
        rt.hour_cls_code = "0".into();
        rt.market_operation_code = "30".into();
        assert!(rt.is_vi_active());
    }

    #[test]
    fn trade_updates_set_and_clear() {
        let mut info = TradeInfo::default();
        let at = now_kst();
        let updates = TradeUpdates {
            buy_price: Some(100.0),
            buy_quantity: Some(5),
            ..Default::default()
        }
        .with_buy_order(
            OrderRef {
                order_id: "0001".into(),
                orgno: "91252".into(),
                order_time_api: "091201".into(),
            },
            at,
        );
        updates.apply(&mut info);
        assert_eq!(info.buy_price, Some(100.0));
        assert!(info.buy_order.is_some());
        assert_eq!(info.order_time, Some(at));

        TradeUpdates::default().clearing_buy_order().apply(&mut info);
        assert!(info.buy_order.is_none());
        assert!(info.order_time.is_none());
        // untouched fields survive
        assert_eq!(info.buy_quantity, Some(5));
    }

    #[test]
    fn spread_rate_requires_both_sides() {
        let mut snap = snapshot();
        let spread = snap.spread_rate().unwrap();
        assert!(spread > 0.0 && spread < 0.1);
        snap.ask_price = 0.0;
        assert!(snap.spread_rate().is_none());
    }
}
