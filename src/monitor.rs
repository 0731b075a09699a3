// =============================================================================
// Realtime Monitor — the single-threaded decision loop
// =============================================================================
//
// Per tick: derive the KST market phase, adapt the cadence to volatility,
// drain pending subscriptions in batches, evaluate every tracked symbol
// (sell analysis for held positions, buy analysis for watched ones), run the
// recovery sweep, schedule the intraday scan worker, and emit the minute
// status line plus the end-of-day summary.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::analyzer;
use crate::broker::BrokerApi;
use crate::config::ConfigRegistry;
use crate::db::{DailyMetricsRow, DailySummaryRow, TradeDatabase};
use crate::executor::OrderExecutor;
use crate::recovery::OrderRecoveryManager;
use crate::scanner::{IntradayCandidate, MarketScanner};
use crate::stock::{Snapshot, StockStore};
use crate::types::{now_kst, MarketPhase, TradingStatus};
use crate::ws::WsGateway;

const SUBSCRIPTION_MAX_RETRIES: u32 = 3;

// =============================================================================
// Market clock
// =============================================================================

/// Session timing from the schedule config. `test_mode` treats every weekday
/// moment as market hours.
#[derive(Debug, Clone)]
pub struct MarketClock {
    open: NaiveTime,
    close: NaiveTime,
    exit: NaiveTime,
    test_mode: bool,
}

impl MarketClock {
    pub fn new(open: &str, close: &str, exit: &str, test_mode: bool) -> Self {
        Self {
            open: parse_hhmm(open).unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            close: parse_hhmm(close).unwrap_or_else(|| NaiveTime::from_hms_opt(15, 30, 0).unwrap()),
            exit: parse_hhmm(exit).unwrap_or_else(|| NaiveTime::from_hms_opt(15, 0, 0).unwrap()),
            test_mode,
        }
    }

    pub fn is_market_open(&self, now: chrono::DateTime<chrono_tz::Tz>) -> bool {
        use chrono::Datelike;
        if now.weekday().number_from_monday() >= 6 {
            return false;
        }
        if self.test_mode {
            return true;
        }
        let t = now.time();
        t >= self.open && t <= self.close
    }

    /// Day-trading entries stop at the configured exit time.
    pub fn is_trading_time(&self, now: chrono::DateTime<chrono_tz::Tz>) -> bool {
        self.is_market_open(now) && now.time() < self.exit
    }

    pub fn phase(&self, now: chrono::DateTime<chrono_tz::Tz>) -> MarketPhase {
        if !self.is_market_open(now) {
            return MarketPhase::Closed;
        }
        MarketPhase::from_session_time(now.time())
    }

    pub fn past_exit(&self, now: chrono::DateTime<chrono_tz::Tz>) -> bool {
        now.time() >= self.exit
    }
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let mut parts = value.split(':');
    let h: u32 = parts.next()?.trim().parse().ok()?;
    let m: u32 = parts.next()?.trim().parse().ok()?;
    NaiveTime::from_hms_opt(h, m, 0)
}

// =============================================================================
// Pending subscriptions
// =============================================================================

/// Queue of symbols awaiting gateway subscription, retried up to three times
/// per symbol in batches on the monitor thread.
pub struct PendingSubscriptions {
    pending: Mutex<Vec<String>>,
    retries: Mutex<HashMap<String, u32>>,
}

impl PendingSubscriptions {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            retries: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, code: &str) {
        let mut pending = self.pending.lock();
        if !pending.iter().any(|c| c.as_str() == code) {
            pending.push(code.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn take_batch(&self, size: usize) -> Vec<String> {
        let mut pending = self.pending.lock();
        let n = size.min(pending.len());
        pending.drain(..n).collect()
    }

    /// Requeue a failed code, dropping it after the retry budget.
    fn requeue(&self, code: String) {
        let mut retries = self.retries.lock();
        let count = retries.entry(code.clone()).or_insert(0);
        *count += 1;
        if *count >= SUBSCRIPTION_MAX_RETRIES {
            warn!(code = %code, "subscription retries exhausted, dropping");
            retries.remove(&code);
        } else {
            drop(retries);
            self.pending.lock().push(code);
        }
    }

    fn clear_retries(&self, code: &str) {
        self.retries.lock().remove(code);
    }
}

impl Default for PendingSubscriptions {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Volatility-adaptive cadence
// =============================================================================

/// High volatility: at least `position_ratio` of tracked symbols moving more
/// than `threshold` (fraction) against yesterday's close.
pub fn is_high_volatility(snapshots: &[Snapshot], threshold: f64, position_ratio: f64) -> bool {
    if snapshots.is_empty() {
        return false;
    }
    let tracked: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| matches!(s.status, TradingStatus::Bought | TradingStatus::Watching))
        .collect();
    if tracked.is_empty() {
        return false;
    }
    let moving = tracked
        .iter()
        .filter(|s| {
            s.yesterday_close > 0.0
                && ((s.current_price - s.yesterday_close) / s.yesterday_close).abs() >= threshold
        })
        .count();
    moving as f64 >= tracked.len() as f64 * position_ratio
}

/// Tick interval: the fast cadence under high volatility, otherwise normal.
pub fn tick_interval(high_volatility: bool, fast_secs: u64, normal_secs: u64) -> Duration {
    Duration::from_secs(if high_volatility { fast_secs } else { normal_secs })
}

// =============================================================================
// Monitor
// =============================================================================

pub struct RealtimeMonitor<B: BrokerApi> {
    store: Arc<StockStore>,
    executor: Arc<OrderExecutor<B>>,
    recovery: Arc<OrderRecoveryManager<B>>,
    scanner: Arc<MarketScanner>,
    gateway: Arc<WsGateway>,
    config: Arc<ConfigRegistry>,
    db: Option<Arc<TradeDatabase>>,
    pub pending_subscriptions: Arc<PendingSubscriptions>,

    scan_results_tx: tokio::sync::mpsc::UnboundedSender<Vec<IntradayCandidate>>,
    scan_results_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Vec<IntradayCandidate>>>,
    unsubscribe_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>,

    last_scan: Mutex<Option<chrono::DateTime<chrono_tz::Tz>>>,
    scan_in_flight: AtomicBool,
    last_report_minute: Mutex<Option<u32>>,
    daily_summary_done: AtomicBool,
    day_exit_done: AtomicBool,
    shutdown: AtomicBool,
}

impl<B: BrokerApi + 'static> RealtimeMonitor<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StockStore>,
        executor: Arc<OrderExecutor<B>>,
        recovery: Arc<OrderRecoveryManager<B>>,
        scanner: Arc<MarketScanner>,
        gateway: Arc<WsGateway>,
        config: Arc<ConfigRegistry>,
        db: Option<Arc<TradeDatabase>>,
        unsubscribe_rx: tokio::sync::mpsc::UnboundedReceiver<String>,
    ) -> Arc<Self> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Self {
            store,
            executor,
            recovery,
            scanner,
            gateway,
            config,
            db,
            pending_subscriptions: Arc::new(PendingSubscriptions::new()),
            scan_results_tx: tx,
            scan_results_rx: tokio::sync::Mutex::new(rx),
            unsubscribe_rx: tokio::sync::Mutex::new(unsubscribe_rx),
            last_scan: Mutex::new(None),
            scan_in_flight: AtomicBool::new(false),
            last_report_minute: Mutex::new(None),
            daily_summary_done: AtomicBool::new(false),
            day_exit_done: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        })
    }

    fn clock(&self) -> MarketClock {
        let cfg = self.config.current();
        MarketClock::new(
            &cfg.market_schedule.market_open_time,
            &cfg.market_schedule.market_close_time,
            &cfg.market_schedule.day_trading_exit_time,
            cfg.trading_strategy.test_mode,
        )
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// The decision loop. Runs until `stop`.
    pub async fn run(self: Arc<Self>) {
        info!("realtime monitor starting");
        while !self.shutdown.load(Ordering::SeqCst) {
            let interval = self.cycle().await;
            if self.store.is_empty() {
                // Nothing tracked: idle on the store's data-updated signal
                // instead of burning the tick.
                let store = self.store.clone();
                let _ = tokio::task::spawn_blocking(move || store.wait_for_update(interval)).await;
            } else {
                tokio::time::sleep(interval).await;
            }
        }
        info!("realtime monitor stopped");
    }

    /// One monitoring cycle; returns the sleep until the next one.
    pub async fn cycle(&self) -> Duration {
        let cfg = self.config.current();
        let clock = self.clock();
        let now = now_kst();
        let phase = clock.phase(now);

        // Outside market hours: only the end-of-day report remains.
        if phase == MarketPhase::Closed {
            self.maybe_emit_daily_summary(now);
            return Duration::from_secs(60);
        }

        self.drain_unsubscribes().await;

        // Re-issue per-symbol subscriptions lost to a gateway reconnect.
        // Fully sold symbols stay unsubscribed.
        if self.gateway.is_connected() {
            for code in self.store.codes() {
                if !self.gateway.is_subscribed(&code)
                    && self.store.status_of(&code) != Some(TradingStatus::Sold)
                {
                    self.pending_subscriptions.add(&code);
                }
            }
        }
        self.process_pending_subscriptions(cfg.performance.websocket_subscription_batch_size).await;

        // Per-symbol decisions, grouped under one status-lock pass.
        let batch = self.store.by_status_batch(&[
            TradingStatus::Bought,
            TradingStatus::PartialBought,
            TradingStatus::Watching,
        ]);
        let snapshots: Vec<Snapshot> = batch.into_values().flatten().collect();

        let bought_count = snapshots
            .iter()
            .filter(|s| s.status == TradingStatus::Bought)
            .count();

        for snap in &snapshots {
            match snap.status {
                TradingStatus::Bought => {
                    if let Some(reason) = analyzer::sell::analyze(snap, phase, &cfg, now) {
                        info!(code = %snap.code, reason, "sell signal");
                        if !self.executor.execute_sell(&snap.code, Some(snap.current_price), reason).await {
                            warn!(code = %snap.code, reason, "sell execution failed");
                        }
                    }
                }
                TradingStatus::PartialBought => {
                    // Held shares behind an open order: the recovery sweep
                    // reconciles them before any sell can go out.
                    if analyzer::sell::analyze(snap, phase, &cfg, now).is_some() {
                        info!(code = %snap.code, "sell signal while partially bought, deferring to recovery");
                    }
                }
                TradingStatus::Watching => {
                    if clock.is_trading_time(now)
                        && analyzer::buy::analyze(snap, phase, &cfg, now)
                    {
                        let qty = self.executor.position_size(
                            phase,
                            snap.current_price,
                            bought_count,
                            cfg.risk_management.base_investment_amount,
                            0.0,
                        );
                        info!(code = %snap.code, qty, price = snap.current_price, "buy signal");
                        if !self
                            .executor
                            .execute_buy(&snap.code, snap.current_price, qty, bought_count)
                            .await
                        {
                            warn!(code = %snap.code, "buy execution failed");
                        }
                    }
                }
                _ => {}
            }
        }

        // Stuck-order recovery.
        self.recovery.recover_stuck_orders().await;

        // Day-trading flatten after the exit cutoff.
        if cfg.trading_strategy.next_day_force_sell
            && clock.past_exit(now)
            && !self.day_exit_done.load(Ordering::SeqCst)
        {
            self.flatten_all_positions().await;
            self.day_exit_done.store(true, Ordering::SeqCst);
        }

        // Intraday scan scheduling + result intake.
        self.maybe_spawn_intraday_scan(now);
        self.process_scan_results().await;

        // Minute status line.
        self.maybe_emit_status_report(now, &snapshots);
        self.maybe_emit_daily_summary(now);

        let high_vol = is_high_volatility(
            &snapshots,
            cfg.performance.market_volatility_threshold,
            cfg.performance.high_volatility_position_ratio,
        );
        tick_interval(
            high_vol,
            cfg.performance.fast_monitoring_interval,
            cfg.performance.normal_monitoring_interval,
        )
    }

    // -------------------------------------------------------------------------
    // Subscription upkeep
    // -------------------------------------------------------------------------

    async fn process_pending_subscriptions(&self, batch_size: usize) {
        if self.pending_subscriptions.is_empty() {
            return;
        }
        if !self.gateway.is_healthy() {
            warn!("gateway unhealthy, deferring subscription batch");
            return;
        }

        let batch = self.pending_subscriptions.take_batch(batch_size);
        let mut ok = 0usize;
        for code in batch {
            if self.gateway.subscribe(&code).await {
                self.pending_subscriptions.clear_retries(&code);
                ok += 1;
            } else {
                self.pending_subscriptions.requeue(code);
            }
        }
        if ok > 0 {
            info!(subscribed = ok, pending = self.pending_subscriptions.len(), "subscription batch done");
        }
    }

    async fn drain_unsubscribes(&self) {
        let mut rx = self.unsubscribe_rx.lock().await;
        while let Ok(code) = rx.try_recv() {
            self.gateway.unsubscribe(&code).await;
        }
    }

    // -------------------------------------------------------------------------
    // Intraday scan worker
    // -------------------------------------------------------------------------

    fn maybe_spawn_intraday_scan(&self, now: chrono::DateTime<chrono_tz::Tz>) {
        let cfg = self.config.current();
        if self.scan_in_flight.load(Ordering::SeqCst) {
            return;
        }

        let due = match *self.last_scan.lock() {
            None => true,
            Some(last) => {
                (now - last).num_minutes() >= cfg.performance.intraday_scan_interval_minutes as i64
            }
        };
        if !due {
            return;
        }

        let effective_max = cfg
            .performance
            .max_total_observable_stocks
            .min(cfg.websocket_symbol_capacity());
        let tracked = self.store.len();
        if tracked >= effective_max {
            return;
        }
        let slots = (effective_max - tracked).min(cfg.performance.max_intraday_selected_stocks);

        *self.last_scan.lock() = Some(now);
        self.scan_in_flight.store(true, Ordering::SeqCst);

        let scanner = self.scanner.clone();
        let executor = self.executor.clone();
        let tx = self.scan_results_tx.clone();
        info!(slots, "spawning intraday scan worker");
        tokio::spawn(async move {
            // Refresh the index-volatility proxy on the same worker cadence.
            executor.set_market_volatility(scanner.market_volatility().await);
            let results = scanner.intraday_scan_additional_stocks(slots).await;
            let _ = tx.send(results);
        });
    }

    async fn process_scan_results(&self) {
        let results = {
            let mut rx = self.scan_results_rx.lock().await;
            match rx.try_recv() {
                Ok(results) => results,
                Err(_) => return,
            }
        };
        self.scan_in_flight.store(false, Ordering::SeqCst);
        if results.is_empty() {
            info!("intraday scan found no qualifying symbols");
            return;
        }

        let cfg = self.config.current();
        let effective_max = cfg
            .performance
            .max_total_observable_stocks
            .min(cfg.websocket_symbol_capacity());

        let mut added = 0usize;
        for candidate in &results {
            if self.store.len() >= effective_max {
                warn!("observable capacity reached, dropping remaining candidates");
                break;
            }
            if self.scanner.register_intraday_candidate(candidate).await {
                self.pending_subscriptions.add(&candidate.code);
                added += 1;
            }
        }
        let intraday = self.store.intraday_summary();
        info!(
            added,
            offered = results.len(),
            intraday_total = intraday.total_count,
            avg_score = format!("{:.1}", intraday.average_score),
            "intraday additions processed"
        );
    }

    // -------------------------------------------------------------------------
    // Flatten, reporting
    // -------------------------------------------------------------------------

    /// Sell every BOUGHT position (day-trading exit).
    async fn flatten_all_positions(&self) {
        let held = self.store.by_status(TradingStatus::Bought);
        if held.is_empty() {
            return;
        }
        warn!(count = held.len(), "day-trading exit, flattening positions");
        for snap in held {
            if !self
                .executor
                .execute_sell(&snap.code, Some(snap.current_price), "market_close")
                .await
            {
                error!(code = %snap.code, "exit-time sell failed");
            }
        }
    }

    fn maybe_emit_status_report(&self, now: chrono::DateTime<chrono_tz::Tz>, snapshots: &[Snapshot]) {
        let minute = now.minute();
        {
            let mut last = self.last_report_minute.lock();
            if *last == Some(minute) {
                return;
            }
            *last = Some(minute);
        }

        let stats = self.executor.statistics();
        let summary = self.store.summary();
        let parser = self.gateway.parser_stats();
        let cache = self.store.cache_stats();
        let held = snapshots
            .iter()
            .filter(|s| s.status == TradingStatus::Bought)
            .count();
        info!(
            tracked = summary.total_selected,
            held,
            trades = stats.total_trades,
            pnl = stats.total_pnl,
            win_rate = format!("{:.1}", stats.recent_win_rate * 100.0),
            usage = %self.gateway.subscription_usage(),
            healthy = self.gateway.is_healthy(),
            frames = parser.processed,
            frame_errors = parser.errors,
            cache_hits = cache.hits,
            "status"
        );

        for issue in self.recovery.validate_transitions() {
            warn!(issue = %issue, "stale order detected");
        }
    }

    fn maybe_emit_daily_summary(&self, now: chrono::DateTime<chrono_tz::Tz>) {
        if now.hour() < 16 || self.daily_summary_done.load(Ordering::SeqCst) {
            return;
        }
        self.daily_summary_done.store(true, Ordering::SeqCst);

        let stats = self.executor.statistics();
        let recovery = self.recovery.stats();
        let recent = self.executor.recent_trades();
        let avg_holding = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|t| t.holding_minutes).sum::<f64>() / recent.len() as f64
        };

        info!(
            trades = stats.total_trades,
            wins = stats.winning_trades,
            losses = stats.losing_trades,
            pnl = stats.total_pnl,
            max_drawdown = stats.max_drawdown,
            recoveries = recovery.total_recoveries,
            "daily summary"
        );

        if let Some(db) = &self.db {
            let win_rate = if stats.total_trades > 0 {
                stats.winning_trades as f64 / stats.total_trades as f64 * 100.0
            } else {
                0.0
            };
            let summary = DailySummaryRow {
                pre_market_scanned_count: db.count_pre_market_scans_today().unwrap_or(0),
                intraday_scanned_count: db.count_intraday_scans_today().unwrap_or(0),
                total_buy_orders: stats.daily_trade_count,
                total_sell_orders: stats.total_trades,
                executed_buy_orders: stats.total_trades,
                executed_sell_orders: stats.total_trades,
                total_profit_loss: stats.total_pnl,
                win_count: stats.winning_trades,
                loss_count: stats.losing_trades,
                win_rate,
                total_investment: 0.0,
                max_position_count: self.store.summary().total_selected as u32,
                avg_holding_minutes: avg_holding,
            };
            if let Err(e) = db.upsert_daily_summary(&summary) {
                error!(error = %e, "daily summary persist failed");
            }

            let cfg = self.config.current();
            let metrics = DailyMetricsRow {
                trades: stats.total_trades,
                win_rate,
                total_pnl: stats.total_pnl,
                avg_pnl: if stats.total_trades > 0 {
                    stats.total_pnl / stats.total_trades as f64
                } else {
                    0.0
                },
                max_drawdown: stats.max_drawdown,
                params_json: serde_json::json!({
                    "stop_loss_rate": cfg.risk_management.stop_loss_rate,
                    "take_profit_rate": cfg.risk_management.take_profit_rate,
                    "max_positions": cfg.risk_management.max_positions,
                }),
            };
            if let Err(e) = db.save_daily_metrics(&metrics) {
                error!(error = %e, "daily metrics persist failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_kst, MarketPressure};
    use chrono::TimeZone;
    use chrono_tz::Asia::Seoul;

    fn kst(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> chrono::DateTime<chrono_tz::Tz> {
        Seoul.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn market_clock_weekday_session() {
        let clock = MarketClock::new("09:00", "15:30", "15:00", false);
        // 2025-06-13 is a Friday.
        assert!(clock.is_market_open(kst(2025, 6, 13, 10, 0)));
        assert!(!clock.is_market_open(kst(2025, 6, 13, 8, 30)));
        assert!(!clock.is_market_open(kst(2025, 6, 13, 16, 0)));
        // Saturday.
        assert!(!clock.is_market_open(kst(2025, 6, 14, 10, 0)));

        assert!(clock.is_trading_time(kst(2025, 6, 13, 14, 30)));
        assert!(!clock.is_trading_time(kst(2025, 6, 13, 15, 10)));
        assert!(clock.past_exit(kst(2025, 6, 13, 15, 10)));
    }

    #[test]
    fn market_clock_test_mode_only_covers_weekdays() {
        let clock = MarketClock::new("09:00", "15:30", "15:00", true);
        assert!(clock.is_market_open(kst(2025, 6, 13, 22, 0)));
        assert!(!clock.is_market_open(kst(2025, 6, 14, 10, 0)));
    }

    #[test]
    fn phase_mapping_through_clock() {
        let clock = MarketClock::new("09:00", "15:30", "15:00", false);
        assert_eq!(clock.phase(kst(2025, 6, 13, 9, 10)), MarketPhase::Opening);
        assert_eq!(clock.phase(kst(2025, 6, 13, 12, 30)), MarketPhase::Lunch);
        assert_eq!(clock.phase(kst(2025, 6, 13, 14, 55)), MarketPhase::PreClose);
        assert_eq!(clock.phase(kst(2025, 6, 14, 10, 0)), MarketPhase::Closed);
        assert_eq!(clock.phase(kst(2025, 6, 13, 7, 0)), MarketPhase::Closed);
    }

    #[test]
    fn pending_subscription_retry_budget() {
        let pending = PendingSubscriptions::new();
        pending.add("005930");
        pending.add("005930"); // dedup
        assert_eq!(pending.len(), 1);

        let batch = pending.take_batch(3);
        assert_eq!(batch, vec!["005930".to_string()]);
        assert!(pending.is_empty());

        // Two failures requeue, the third drops.
        pending.requeue("005930".to_string());
        assert_eq!(pending.len(), 1);
        pending.take_batch(1);
        pending.requeue("005930".to_string());
        assert_eq!(pending.len(), 1);
        pending.take_batch(1);
        pending.requeue("005930".to_string());
        assert!(pending.is_empty());
    }

    fn snap(code: &str, price: f64, yesterday: f64, status: TradingStatus) -> Snapshot {
        Snapshot {
            code: code.into(),
            name: String::new(),
            current_price: price,
            bid_price: 0.0,
            ask_price: 0.0,
            bid_prices: [0.0; 5],
            ask_prices: [0.0; 5],
            today_volume: 0,
            today_high: 0.0,
            today_low: 0.0,
            price_change_rate: 0.0,
            volume_spike_ratio: 1.0,
            volatility: 0.0,
            contract_strength: 100.0,
            buy_ratio: 50.0,
            market_pressure: MarketPressure::Neutral,
            sell_contract_count: 0,
            buy_contract_count: 0,
            total_ask_qty: 0,
            total_bid_qty: 0,
            volume_turnover_rate: 0.0,
            prev_same_time_volume_rate: 0.0,
            trading_halt: false,
            vi_active: false,
            vi_standard_price: 0.0,
            last_updated: now_kst(),
            yesterday_close: yesterday,
            sma_20: 0.0,
            pattern_score: 0.0,
            avg_daily_volume: 0,
            status,
            buy_price: None,
            buy_quantity: None,
            target_price: None,
            stop_loss_price: None,
            order_time: None,
            sell_order_time: None,
            execution_time: None,
            unrealized_pnl: None,
            unrealized_pnl_rate: None,
            dynamic_peak_price: None,
            dynamic_target_price: None,
            is_intraday_added: false,
            max_holding_days: 1,
            liquidity_score: 0.0,
            snapshot_time: now_kst(),
        }
    }

    #[test]
    fn volatility_detection_ratio() {
        // Threshold 2%, ratio 0.3: one of three moving is enough.
        let snaps = vec![
            snap("a", 103.0, 100.0, TradingStatus::Bought), // +3%
            snap("b", 100.5, 100.0, TradingStatus::Watching),
            snap("c", 100.2, 100.0, TradingStatus::Watching),
        ];
        assert!(is_high_volatility(&snaps, 0.02, 0.3));
        assert!(!is_high_volatility(&snaps, 0.02, 0.5));
        assert!(!is_high_volatility(&[], 0.02, 0.3));

        // Symbols without reference data never count as moving.
        let blind = vec![snap("d", 103.0, 0.0, TradingStatus::Bought)];
        assert!(!is_high_volatility(&blind, 0.02, 0.3));
    }

    #[test]
    fn tick_interval_scales_down_under_volatility() {
        assert_eq!(tick_interval(true, 3, 10), Duration::from_secs(3));
        assert_eq!(tick_interval(false, 3, 10), Duration::from_secs(10));
    }

    #[test]
    fn parse_hhmm_accepts_schedule_times() {
        assert_eq!(parse_hhmm("09:00"), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(parse_hhmm("15:30"), NaiveTime::from_hms_opt(15, 30, 0));
        assert_eq!(parse_hhmm("garbage"), None);
    }
}
