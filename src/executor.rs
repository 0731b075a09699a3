// =============================================================================
// Order Executor — turns analyzer decisions into broker orders
// =============================================================================
//
// Gatekeeping (duplicate orders, daily caps, emergency stop, position-size
// clamps) happens before any broker call. Broker acks are judged leniently:
// the execution notice stream is the source of truth for fills. Confirmed
// closes feed the statistics ring, the equity curve, and the emergency-stop
// latch.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::BrokerApi;
use crate::config::ConfigRegistry;
use crate::stock::{OrderRef, StockStore, TradeUpdates};
use crate::types::{now_kst, MarketPhase, OrderSide, TradingStatus};

/// Flat commission applied once at close: 0.3% of buy + sell notional.
const COMMISSION_RATE: f64 = 0.003;
/// Recent-trade ring capacity for win-rate computation.
const RECENT_TRADES_CAP: usize = 50;

/// One closed round trip.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TradeRecord {
    pub code: String,
    pub name: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub quantity: u32,
    /// Net of commission.
    pub realized_pnl: f64,
    pub realized_pnl_rate: f64,
    pub is_winning: bool,
    pub sell_reason: String,
    pub holding_minutes: f64,
    pub closed_at: DateTime<Tz>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_pnl: f64,
    pub daily_trade_count: u32,
    pub emergency_stop: bool,
    pub recent_win_rate: f64,
    pub max_drawdown: f64,
}

struct Inner {
    total_trades: u32,
    winning_trades: u32,
    losing_trades: u32,
    total_pnl: f64,
    daily_trade_count: u32,
    emergency_stop: bool,
    recent_trades: VecDeque<TradeRecord>,
    hourly_trades: HashMap<u32, u32>,
    equity_curve: Vec<f64>,
    running_max_equity: f64,
    max_drawdown: f64,
}

impl Inner {
    fn new() -> Self {
        Self {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: 0.0,
            daily_trade_count: 0,
            emergency_stop: false,
            recent_trades: VecDeque::with_capacity(RECENT_TRADES_CAP),
            hourly_trades: HashMap::new(),
            equity_curve: Vec::new(),
            running_max_equity: 0.0,
            max_drawdown: 0.0,
        }
    }

    fn recent_win_rate(&self, count: usize) -> f64 {
        if self.recent_trades.is_empty() {
            return if self.total_trades > 0 {
                self.winning_trades as f64 / self.total_trades as f64
            } else {
                0.5
            };
        }
        let considered: Vec<&TradeRecord> =
            self.recent_trades.iter().rev().take(count).collect();
        let wins = considered.iter().filter(|t| t.is_winning).count();
        wins as f64 / considered.len() as f64
    }

    fn update_equity(&mut self) {
        let equity = self.total_pnl;
        self.equity_curve.push(equity);
        if equity > self.running_max_equity {
            self.running_max_equity = equity;
        }
        let drawdown = self.running_max_equity - equity;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }
}

pub struct OrderExecutor<B: BrokerApi> {
    broker: Arc<B>,
    store: Arc<StockStore>,
    config: Arc<ConfigRegistry>,
    inner: Mutex<Inner>,
    last_price_cache: Mutex<HashMap<String, f64>>,
    /// KOSPI daily-range proxy, pushed in by the monitor.
    market_volatility: Mutex<f64>,
}

impl<B: BrokerApi> OrderExecutor<B> {
    pub fn new(broker: Arc<B>, store: Arc<StockStore>, config: Arc<ConfigRegistry>) -> Self {
        Self {
            broker,
            store,
            config,
            inner: Mutex::new(Inner::new()),
            last_price_cache: Mutex::new(HashMap::new()),
            market_volatility: Mutex::new(1.0),
        }
    }

    // =========================================================================
    // Buy
    // =========================================================================

    /// Place a buy order for `code`. Gate order: duplicate states, emergency
    /// stop, daily trade cap, position count, daily-loss floor, size clamp.
    pub async fn execute_buy(&self, code: &str, price: f64, qty: u32, current_positions: usize) -> bool {
        let cfg = self.config.current();
        let risk = &cfg.risk_management;

        let status = match self.store.status_of(code) {
            Some(s) => s,
            None => {
                warn!(code, "buy for unknown symbol rejected");
                return false;
            }
        };
        if matches!(
            status,
            TradingStatus::BuyOrdered | TradingStatus::PartialBought | TradingStatus::Bought
        ) {
            warn!(code, %status, "duplicate buy blocked");
            return false;
        }

        {
            let inner = self.inner.lock();
            if inner.emergency_stop {
                warn!(code, "emergency stop active, buy blocked");
                return false;
            }
            if inner.daily_trade_count >= risk.max_daily_trades {
                warn!(code, count = inner.daily_trade_count, "daily trade cap reached");
                return false;
            }
        }
        if current_positions >= risk.max_positions as usize {
            warn!(code, current_positions, max = risk.max_positions, "positions full");
            return false;
        }
        if price <= 0.0 || qty == 0 {
            return false;
        }

        // Daily loss floor latches the emergency stop.
        {
            let mut inner = self.inner.lock();
            if inner.total_pnl <= risk.max_daily_loss {
                error!(
                    code,
                    total_pnl = inner.total_pnl,
                    floor = risk.max_daily_loss,
                    "daily loss limit reached, latching emergency stop"
                );
                inner.emergency_stop = true;
                return false;
            }
        }

        // Clamp quantity into the position-size cap.
        let mut qty = qty;
        if price * qty as f64 > risk.max_position_size {
            qty = (risk.max_position_size / price) as u32;
            if qty == 0 {
                return false;
            }
            info!(code, qty, "quantity clamped to max position size");
        }

        info!(code, qty, price, "placing buy order");
        let ack = match self.broker.place_order(OrderSide::Buy, code, qty, price).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(code, error = %e, "buy order request failed");
                return false;
            }
        };
        if !ack.accepted() {
            error!(code, rt_cd = %ack.rt_cd, msg = %ack.msg1, "buy order rejected by broker");
            return false;
        }

        let order_no = if ack.order_no.trim().is_empty() {
            // Simulated/empty response: synthesize a local id and trust the
            // execution notice for the real one.
            format!("BUY-{}", Uuid::new_v4())
        } else {
            ack.order_no.clone()
        };

        let now = now_kst();
        let stop_rate = self.dynamic_stop_loss_rate();
        let tp_rate = self.dynamic_take_profit_rate();

        let mut updates = TradeUpdates {
            buy_price: Some(price),
            buy_quantity: Some(qty),
            buy_amount: Some(price * qty as f64),
            stop_loss_price: Some(price * (1.0 + stop_rate)),
            target_price: Some(price * (1.0 + tp_rate)),
            ordered_qty: Some(Some(qty)),
            filled_qty: Some(0),
            remaining_qty: Some(Some(qty)),
            avg_exec_price: None,
            ..TradeUpdates::default()
        }
        .with_buy_order(
            OrderRef {
                order_id: order_no.clone(),
                orgno: ack.orgno.clone(),
                order_time_api: ack.order_time.clone(),
            },
            now,
        );

        if cfg.trading_strategy.trailing_stop_enabled {
            let ratio = cfg.trading_strategy.trailing_stop_ratio;
            updates.dynamic_peak_price = Some(price);
            updates.dynamic_target_price = Some(price * (1.0 - ratio / 100.0));
        }

        if !self.store.change_status(code, TradingStatus::BuyOrdered, "buy_order_accepted", updates) {
            error!(code, "status update failed after buy order");
            return false;
        }

        {
            let mut inner = self.inner.lock();
            let hour = now.hour();
            *inner.hourly_trades.entry(hour).or_insert(0) += 1;
        }
        self.last_price_cache.lock().insert(code.to_string(), price);

        info!(
            code,
            qty,
            price,
            order_no = %order_no,
            stop = price * (1.0 + stop_rate),
            target = price * (1.0 + tp_rate),
            "buy order accepted"
        );
        true
    }

    // =========================================================================
    // Sell
    // =========================================================================

    /// Place a sell order for the full held quantity. `price` falls back to
    /// the last-price cache; an offered limit below the current market price
    /// is lifted to it.
    pub async fn execute_sell(&self, code: &str, price: Option<f64>, reason: &str) -> bool {
        let status = match self.store.status_of(code) {
            Some(s) => s,
            None => return false,
        };
        if status != TradingStatus::Bought {
            warn!(code, %status, reason, "sell requires BOUGHT");
            return false;
        }

        let info = match self.store.trade_info(code) {
            Some(i) => i,
            None => return false,
        };
        let qty = match info.buy_quantity {
            Some(q) if q > 0 => q,
            _ => {
                error!(code, "no held quantity to sell");
                return false;
            }
        };

        let market_price = self
            .store
            .snapshot(code)
            .map(|s| s.current_price)
            .unwrap_or(0.0);
        let mut sell_price = price
            .or_else(|| self.last_price_cache.lock().get(code).copied())
            .or(info.buy_price)
            .unwrap_or(0.0);
        if sell_price <= 0.0 {
            error!(code, "no usable sell price");
            return false;
        }
        // Inverted-limit protection: never offer below the market.
        if market_price > 0.0 && sell_price < market_price {
            sell_price = market_price;
        }

        info!(code, qty, price = sell_price, reason, "placing sell order");
        let ack = match self.broker.place_order(OrderSide::Sell, code, qty, sell_price).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(code, error = %e, "sell order request failed");
                return false;
            }
        };
        if !ack.accepted() {
            error!(code, rt_cd = %ack.rt_cd, msg = %ack.msg1, "sell order rejected by broker");
            return false;
        }

        let order_no = if ack.order_no.trim().is_empty() {
            format!("SELL-{}", Uuid::new_v4())
        } else {
            ack.order_no.clone()
        };

        let now = now_kst();
        let updates = TradeUpdates {
            sell_reason: Some(reason.to_string()),
            // Reset the fill-aggregation counters for the sell leg.
            ordered_qty: Some(Some(qty)),
            filled_qty: Some(0),
            remaining_qty: Some(Some(qty)),
            sell_price: Some(sell_price),
            ..TradeUpdates::default()
        }
        .with_sell_order(
            OrderRef {
                order_id: order_no.clone(),
                orgno: ack.orgno.clone(),
                order_time_api: ack.order_time.clone(),
            },
            now,
        );

        if !self.store.change_status(code, TradingStatus::SellOrdered, "sell_order_accepted", updates) {
            error!(code, "status update failed after sell order");
            return false;
        }

        {
            let mut inner = self.inner.lock();
            let hour = now.hour();
            *inner.hourly_trades.entry(hour).or_insert(0) += 1;
        }

        info!(code, qty, price = sell_price, order_no = %order_no, reason, "sell order accepted");
        true
    }

    // =========================================================================
    // Cancel
    // =========================================================================

    /// Issue a full-quantity cancel. On an accepted cancel (and regardless of
    /// the broker outcome, when the caller is the recovery path) the status
    /// is restored by `restore_after_cancel`.
    pub async fn cancel_order(&self, code: &str, side: OrderSide) -> bool {
        let status = match self.store.status_of(code) {
            Some(s) => s,
            None => return false,
        };
        let order = {
            let info = match self.store.trade_info(code) {
                Some(i) => i,
                None => return false,
            };
            match side {
                OrderSide::Buy if status.has_open_buy_order() => info.buy_order.clone(),
                OrderSide::Sell if status.has_open_sell_order() => info.sell_order.clone(),
                _ => {
                    warn!(code, %status, %side, "no open order of this side to cancel");
                    return false;
                }
            }
        };
        let order = match order {
            Some(o) if !o.order_id.is_empty() && !o.orgno.is_empty() => o,
            _ => {
                error!(code, %side, "order reference incomplete, cannot cancel");
                return false;
            }
        };

        info!(code, %side, order_no = %order.order_id, "cancelling order");
        let ack = match self.broker.cancel_order(&order.orgno, &order.order_id).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(code, error = %e, "cancel request failed");
                return false;
            }
        };
        if !ack.accepted() {
            error!(code, rt_cd = %ack.rt_cd, msg = %ack.msg1, "cancel rejected by broker");
            return false;
        }

        let restored = self.restore_after_cancel(code, side, "order_cancelled");
        info!(code, %side, restored, "order cancelled");
        restored
    }

    /// Restore the status after a cancel (or a timeout recovery).
    ///
    /// Buy side: a partially-filled order keeps its fills as a live position
    /// (ordered_qty rewritten to filled_qty, status BOUGHT); a zero-fill
    /// order returns to WATCHING. Sell side always returns to BOUGHT with
    /// the remaining shares.
    pub fn restore_after_cancel(&self, code: &str, side: OrderSide, reason: &str) -> bool {
        match side {
            OrderSide::Buy => {
                let filled = self.store.trade_info(code).map(|i| i.filled_qty).unwrap_or(0);
                if filled > 0 {
                    let avg = self
                        .store
                        .trade_info(code)
                        .and_then(|i| i.avg_exec_price)
                        .unwrap_or(0.0);
                    let updates = TradeUpdates {
                        buy_quantity: Some(filled),
                        buy_price: if avg > 0.0 { Some(avg) } else { None },
                        ordered_qty: Some(Some(filled)),
                        remaining_qty: Some(Some(0)),
                        ..TradeUpdates::default()
                    }
                    .clearing_buy_order();
                    self.store.change_status(code, TradingStatus::Bought, reason, updates)
                } else {
                    let updates = TradeUpdates {
                        buy_price: None,
                        ordered_qty: Some(None),
                        remaining_qty: Some(None),
                        filled_qty: Some(0),
                        ..TradeUpdates::default()
                    }
                    .clearing_buy_order();
                    self.store.change_status(code, TradingStatus::Watching, reason, updates)
                }
            }
            OrderSide::Sell => {
                let updates = TradeUpdates::default().clearing_sell_order();
                self.store.change_status(code, TradingStatus::Bought, reason, updates)
            }
        }
    }

    // =========================================================================
    // Dynamic stop / target rates
    // =========================================================================

    /// Stop rate (negative fraction): tighter after a losing streak or in a
    /// volatile market, looser when winning.
    pub fn dynamic_stop_loss_rate(&self) -> f64 {
        let cfg = self.config.current();
        let mut rate = cfg.risk_management.stop_loss_rate;

        let win_rate = self.inner.lock().recent_win_rate(10);
        if win_rate < 0.3 {
            rate *= 0.7;
        } else if win_rate > 0.7 {
            rate *= 1.2;
        }

        if *self.market_volatility.lock() > 2.0 {
            rate *= 0.8;
        }
        rate
    }

    /// Target rate (positive fraction), with time-of-day adjustments skipped
    /// in day-trading mode.
    pub fn dynamic_take_profit_rate(&self) -> f64 {
        let cfg = self.config.current();
        let mut rate = cfg.risk_management.take_profit_rate;

        if !cfg.is_day_trading() {
            let hour = now_kst().hour();
            if (9..=10).contains(&hour) {
                rate *= 1.15;
            } else if (14..=15).contains(&hour) {
                rate *= 0.8;
            }
        }

        let volatility = *self.market_volatility.lock();
        if volatility > 2.0 {
            rate *= 1.15;
        } else if volatility < 0.5 {
            rate *= 1.10;
        }
        rate
    }

    /// Update the KOSPI daily-range proxy (computed by the monitor).
    pub fn set_market_volatility(&self, volatility: f64) {
        *self.market_volatility.lock() = volatility;
    }

    // =========================================================================
    // Position sizing
    // =========================================================================

    /// Shares to buy at `price` given the phase, the current position load,
    /// and the account state.
    pub fn position_size(
        &self,
        phase: MarketPhase,
        price: f64,
        current_positions: usize,
        available_cash: f64,
        stock_value: f64,
    ) -> u32 {
        if price <= 0.0 {
            return 0;
        }
        let cfg = self.config.current();
        let risk = &cfg.risk_management;

        let mut amount = if risk.use_account_ratio {
            risk.position_size_ratio * (stock_value + available_cash)
        } else {
            risk.base_investment_amount
        };
        amount = amount.min(risk.max_position_size);
        if available_cash > 0.0 {
            amount = amount.min(available_cash);
        }

        amount *= match phase {
            MarketPhase::Opening => risk.opening_reduction_ratio,
            MarketPhase::PreClose => risk.preclose_reduction_ratio,
            _ => 1.0,
        };

        if risk.max_positions > 0
            && current_positions as f64 >= risk.max_positions as f64 * 0.8
        {
            amount *= risk.conservative_ratio;
        }

        ((amount / price) as u32).max(1)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Record a confirmed close. `gross_pnl` is the pure price difference;
    /// commission (0.3% of both legs) is netted here, once per round trip.
    pub fn record_closed_trade(
        &self,
        code: &str,
        name: &str,
        buy_price: f64,
        sell_price: f64,
        quantity: u32,
        gross_pnl: f64,
        sell_reason: &str,
        holding_minutes: f64,
    ) -> TradeRecord {
        let notional = (buy_price + sell_price) * quantity as f64;
        let commission = notional * COMMISSION_RATE;
        let net_pnl = gross_pnl - commission;
        let rate = if buy_price > 0.0 {
            (sell_price - buy_price) / buy_price * 100.0
        } else {
            0.0
        };

        let record = TradeRecord {
            code: code.to_string(),
            name: name.to_string(),
            buy_price,
            sell_price,
            quantity,
            realized_pnl: net_pnl,
            realized_pnl_rate: rate,
            is_winning: net_pnl > 0.0,
            sell_reason: sell_reason.to_string(),
            holding_minutes,
            closed_at: now_kst(),
        };

        let mut inner = self.inner.lock();
        inner.total_trades += 1;
        inner.daily_trade_count += 1;
        inner.total_pnl += net_pnl;
        if record.is_winning {
            inner.winning_trades += 1;
        } else {
            inner.losing_trades += 1;
        }
        inner.recent_trades.push_back(record.clone());
        while inner.recent_trades.len() > RECENT_TRADES_CAP {
            inner.recent_trades.pop_front();
        }
        inner.update_equity();

        // Sustained-loss latch: losses with nothing on the board.
        if inner.losing_trades >= 3 && inner.winning_trades == 0 {
            warn!("three straight losses with no wins, latching emergency stop");
            inner.emergency_stop = true;
        }

        info!(
            code,
            pnl = net_pnl,
            rate,
            reason = sell_reason,
            holding_minutes,
            "trade closed"
        );
        record
    }

    pub fn update_last_price(&self, code: &str, price: f64) {
        if price > 0.0 {
            self.last_price_cache.lock().insert(code.to_string(), price);
        }
    }

    pub fn statistics(&self) -> ExecutorStats {
        let inner = self.inner.lock();
        ExecutorStats {
            total_trades: inner.total_trades,
            winning_trades: inner.winning_trades,
            losing_trades: inner.losing_trades,
            total_pnl: inner.total_pnl,
            daily_trade_count: inner.daily_trade_count,
            emergency_stop: inner.emergency_stop,
            recent_win_rate: inner.recent_win_rate(10),
            max_drawdown: inner.max_drawdown,
        }
    }

    pub fn recent_trades(&self) -> Vec<TradeRecord> {
        self.inner.lock().recent_trades.iter().cloned().collect()
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.inner.lock().emergency_stop
    }

    /// Daily reset: counters and the latch; cumulative totals survive.
    pub fn reset_daily(&self) {
        let mut inner = self.inner.lock();
        inner.daily_trade_count = 0;
        inner.emergency_stop = false;
        inner.hourly_trades.clear();
        info!("executor daily counters reset");
    }
}
