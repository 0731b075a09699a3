// =============================================================================
// Execution Notice Processor — applies broker fill callbacks to the store
// =============================================================================
//
// One notice is applied in a single status-lock critical section via the
// store's transition gate, so `filled_qty ≤ ordered_qty` can never be
// observed violated. Replayed notices are dropped by a dedup key of
// (order_no, exec_time, exec_qty). On a completed sell the symbol is queued
// for gateway unsubscription.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Timelike;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::broker::BrokerApi;
use crate::db::{BuyOrderRow, SellOrderRow, TradeDatabase};
use crate::executor::OrderExecutor;
use crate::stock::StockStore;
use crate::types::{now_kst, MarketPhase, OrderSide, TradingStatus};
use crate::ws::parser::ExecutionNotice;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct NoticeCounters {
    pub buy_fills: u64,
    pub sell_fills: u64,
    pub buys_completed: u64,
    pub sells_completed: u64,
    pub duplicates: u64,
    pub ignored: u64,
}

/// Outcome of applying one fill inside the status-lock critical section.
#[derive(Debug, Clone, Copy)]
struct FillOutcome {
    filled: u32,
    ordered: u32,
    remaining: u32,
    avg_price: f64,
    buy_price: f64,
}

pub struct NoticeProcessor<B: BrokerApi> {
    store: Arc<StockStore>,
    executor: Arc<OrderExecutor<B>>,
    db: Option<Arc<TradeDatabase>>,
    seen: Mutex<HashSet<String>>,
    counters: Mutex<NoticeCounters>,
    /// Symbols whose realtime subscription should be dropped (fully sold).
    unsubscribe_tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl<B: BrokerApi> NoticeProcessor<B> {
    /// Returns the processor and the receiver of unsubscribe requests, which
    /// the gateway-side task drains.
    pub fn new(
        store: Arc<StockStore>,
        executor: Arc<OrderExecutor<B>>,
        db: Option<Arc<TradeDatabase>>,
    ) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Arc::new(Self {
                store,
                executor,
                db,
                seen: Mutex::new(HashSet::new()),
                counters: Mutex::new(NoticeCounters::default()),
                unsubscribe_tx: tx,
            }),
            rx,
        )
    }

    pub fn counters(&self) -> NoticeCounters {
        self.counters.lock().clone()
    }

    /// Entry point, invoked from the gateway callback.
    pub fn handle(&self, notice: &ExecutionNotice) {
        let code = notice.stock_code.trim();
        if code.is_empty() || !self.store.contains(code) {
            debug!(code, "notice for untracked symbol, ignoring");
            self.counters.lock().ignored += 1;
            return;
        }
        if !notice.is_executed() {
            debug!(code, exec_yn = %notice.exec_yn, "non-execution notice, ignoring");
            self.counters.lock().ignored += 1;
            return;
        }
        if notice.exec_price <= 0.0 || notice.exec_qty == 0 {
            warn!(code, price = notice.exec_price, qty = notice.exec_qty, "malformed fill, ignoring");
            self.counters.lock().ignored += 1;
            return;
        }
        if !self.seen.lock().insert(notice.dedup_key()) {
            warn!(code, key = %notice.dedup_key(), "duplicate notice dropped");
            self.counters.lock().duplicates += 1;
            return;
        }

        match notice.side() {
            Some(OrderSide::Buy) => self.handle_buy_fill(code, notice),
            Some(OrderSide::Sell) => self.handle_sell_fill(code, notice),
            None => {
                warn!(code, dvsn = %notice.sell_buy_dvsn, "unknown buy/sell division");
                self.counters.lock().ignored += 1;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Buy leg
    // -------------------------------------------------------------------------

    fn handle_buy_fill(&self, code: &str, notice: &ExecutionNotice) {
        let exec_qty = notice.exec_qty;
        let exec_price = notice.exec_price;

        let outcome = self.store.transition_with(code, "buy_fill", |status, info| {
            if !status.has_open_buy_order() {
                warn!(code, %status, "buy fill in unexpected status");
            }

            let ordered = info
                .ordered_qty
                .or(info.buy_quantity)
                .unwrap_or(exec_qty)
                .max(exec_qty);
            let filled_prev = info.filled_qty;
            let mut filled = filled_prev + exec_qty;
            if filled > ordered {
                warn!(code, filled, ordered, "fill exceeds ordered quantity, clamping");
                filled = ordered;
            }
            let remaining = ordered - filled;

            let avg_price = if filled_prev == 0 {
                exec_price
            } else {
                let prev_avg = info.avg_exec_price.unwrap_or(exec_price);
                (prev_avg * filled_prev as f64 + exec_price * exec_qty as f64) / filled as f64
            };

            info.ordered_qty = Some(ordered);
            info.filled_qty = filled;
            info.remaining_qty = Some(remaining);
            info.avg_exec_price = Some(avg_price);
            info.buy_price = Some(avg_price);
            info.buy_quantity = Some(filled);
            info.buy_amount = Some(avg_price * filled as f64);
            info.execution_time = Some(now_kst());
            if info.order_time.is_none() {
                info.order_time = Some(now_kst());
            }

            let next = if remaining == 0 {
                TradingStatus::Bought
            } else {
                TradingStatus::PartialBought
            };
            (
                Some(next),
                FillOutcome {
                    filled,
                    ordered,
                    remaining,
                    avg_price,
                    buy_price: avg_price,
                },
            )
        });

        let outcome = match outcome {
            Some(o) => o,
            None => {
                error!(code, "buy fill could not be applied");
                return;
            }
        };

        {
            let mut counters = self.counters.lock();
            counters.buy_fills += 1;
            if outcome.remaining == 0 {
                counters.buys_completed += 1;
            }
        }
        self.executor.update_last_price(code, exec_price);

        info!(
            code,
            exec_qty,
            exec_price,
            filled = outcome.filled,
            ordered = outcome.ordered,
            remaining = outcome.remaining,
            avg = outcome.avg_price,
            "buy fill applied"
        );

        self.persist_buy(code, notice, &outcome);
    }

    fn persist_buy(&self, code: &str, notice: &ExecutionNotice, outcome: &FillOutcome) {
        let db = match &self.db {
            Some(db) => db,
            None => return,
        };
        let meta = self.store.meta(code);
        let info = self.store.trade_info(code);
        let row = BuyOrderRow {
            stock_code: code.to_string(),
            stock_name: meta.as_ref().map(|m| m.name.clone()).unwrap_or_default(),
            order_id: notice.order_no.clone(),
            order_orgno: notice.branch_no.clone(),
            order_status: if outcome.remaining == 0 { "executed" } else { "partial" }.to_string(),
            order_price: notice.ord_price,
            execution_price: notice.exec_price,
            quantity: notice.exec_qty,
            total_amount: notice.exec_price * notice.exec_qty as f64,
            target_profit_rate: info
                .as_ref()
                .and_then(|i| i.target_price.zip(i.buy_price))
                .map(|(t, b)| (t - b) / b * 100.0)
                .unwrap_or(0.0),
            stop_loss_rate: info
                .as_ref()
                .and_then(|i| i.stop_loss_price.zip(i.buy_price))
                .map(|(s, b)| (s - b) / b * 100.0)
                .unwrap_or(0.0),
            selection_source: meta
                .as_ref()
                .map(|m| if m.is_intraday_added { "intraday" } else { "pre_market" })
                .unwrap_or("unknown")
                .to_string(),
            selection_criteria: json!({}),
            market_phase: current_phase_label(),
        };
        if let Err(e) = db.save_buy_execution(&row) {
            error!(code, error = %e, "buy execution persist failed");
        }
    }

    // -------------------------------------------------------------------------
    // Sell leg
    // -------------------------------------------------------------------------

    fn handle_sell_fill(&self, code: &str, notice: &ExecutionNotice) {
        let exec_qty = notice.exec_qty;
        let exec_price = notice.exec_price;

        let outcome = self.store.transition_with(code, "sell_fill", |status, info| {
            if !status.has_open_sell_order() {
                warn!(code, %status, "sell fill in unexpected status");
            }

            let ordered = info
                .ordered_qty
                .or(info.buy_quantity)
                .unwrap_or(exec_qty)
                .max(exec_qty);
            let filled_prev = info.filled_qty;
            let mut filled = filled_prev + exec_qty;
            if filled > ordered {
                warn!(code, filled, ordered, "sell fill exceeds ordered quantity, clamping");
                filled = ordered;
            }
            let remaining = ordered - filled;

            let avg_price = if filled_prev == 0 {
                exec_price
            } else {
                let prev_avg = info.avg_exec_price.unwrap_or(exec_price);
                (prev_avg * filled_prev as f64 + exec_price * exec_qty as f64) / filled as f64
            };

            let buy_price = info.buy_price.unwrap_or(0.0);
            let (pnl, pnl_rate) = if buy_price > 0.0 {
                (
                    (avg_price - buy_price) * filled as f64,
                    (avg_price - buy_price) / buy_price * 100.0,
                )
            } else {
                (0.0, 0.0)
            };

            info.ordered_qty = Some(ordered);
            info.filled_qty = filled;
            info.remaining_qty = Some(remaining);
            info.avg_exec_price = Some(avg_price);
            info.sell_price = Some(avg_price);
            info.sell_execution_time = Some(now_kst());
            info.realized_pnl = Some(pnl);
            info.realized_pnl_rate = Some(pnl_rate);

            let next = if remaining == 0 {
                TradingStatus::Sold
            } else {
                TradingStatus::PartialSold
            };
            (
                Some(next),
                FillOutcome {
                    filled,
                    ordered,
                    remaining,
                    avg_price,
                    buy_price,
                },
            )
        });

        let outcome = match outcome {
            Some(o) => o,
            None => {
                error!(code, "sell fill could not be applied");
                return;
            }
        };

        {
            let mut counters = self.counters.lock();
            counters.sell_fills += 1;
            if outcome.remaining == 0 {
                counters.sells_completed += 1;
            }
        }
        self.executor.update_last_price(code, exec_price);

        let gross_pnl = (outcome.avg_price - outcome.buy_price) * outcome.filled as f64;
        info!(
            code,
            exec_qty,
            exec_price,
            filled = outcome.filled,
            remaining = outcome.remaining,
            avg = outcome.avg_price,
            gross_pnl,
            "sell fill applied"
        );

        self.persist_sell(code, notice, &outcome, gross_pnl);

        if outcome.remaining == 0 {
            let info = self.store.trade_info(code);
            let meta = self.store.meta(code);
            let holding_minutes = info
                .as_ref()
                .and_then(|i| i.order_time.zip(i.sell_execution_time))
                .map(|(open, close)| (close - open).num_seconds() as f64 / 60.0)
                .unwrap_or(0.0);
            let reason = info
                .as_ref()
                .and_then(|i| i.sell_reason.clone())
                .unwrap_or_else(|| "unknown".to_string());

            self.executor.record_closed_trade(
                code,
                meta.as_ref().map(|m| m.name.as_str()).unwrap_or(""),
                outcome.buy_price,
                outcome.avg_price,
                outcome.filled,
                gross_pnl,
                &reason,
                holding_minutes,
            );

            // Fully sold: drop the realtime subscription.
            if self.unsubscribe_tx.send(code.to_string()).is_err() {
                warn!(code, "unsubscribe channel closed");
            }
        }
    }

    fn persist_sell(&self, code: &str, notice: &ExecutionNotice, outcome: &FillOutcome, gross_pnl: f64) {
        let db = match &self.db {
            Some(db) => db,
            None => return,
        };
        let meta = self.store.meta(code);
        let info = self.store.trade_info(code);
        let pnl_rate = if outcome.buy_price > 0.0 {
            (outcome.avg_price - outcome.buy_price) / outcome.buy_price * 100.0
        } else {
            0.0
        };
        let holding_minutes = info
            .as_ref()
            .and_then(|i| i.order_time)
            .map(|open| (now_kst() - open).num_seconds() as f64 / 60.0)
            .unwrap_or(0.0);

        let row = SellOrderRow {
            stock_code: code.to_string(),
            stock_name: meta.map(|m| m.name).unwrap_or_default(),
            order_id: notice.order_no.clone(),
            order_orgno: notice.branch_no.clone(),
            order_status: if outcome.remaining == 0 { "executed" } else { "partial" }.to_string(),
            order_price: notice.ord_price,
            execution_price: notice.exec_price,
            quantity: notice.exec_qty,
            total_amount: notice.exec_price * notice.exec_qty as f64,
            profit_loss: gross_pnl,
            profit_loss_rate: pnl_rate,
            holding_minutes,
            sell_reason: info
                .and_then(|i| i.sell_reason)
                .unwrap_or_else(|| "unknown".to_string()),
            market_phase: current_phase_label(),
        };
        if let Err(e) = db.save_sell_execution(&row) {
            error!(code, error = %e, "sell execution persist failed");
        }
    }
}

fn current_phase_label() -> String {
    let now = now_kst();
    let t = chrono::NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap();
    MarketPhase::from_session_time(t).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{CancelAck, OrderAck};
    use crate::config::{ConfigRegistry, TradingConfig};
    use crate::stock::{DailyBar, TradeUpdates};
    use anyhow::Result;

    struct NullBroker;

    impl BrokerApi for NullBroker {
        async fn place_order(&self, _: OrderSide, _: &str, _: u32, _: f64) -> Result<OrderAck> {
            Ok(OrderAck { rt_cd: "0".into(), order_no: "1".into(), ..OrderAck::default() })
        }
        async fn cancel_order(&self, _: &str, _: &str) -> Result<CancelAck> {
            Ok(CancelAck { rt_cd: "0".into(), ..CancelAck::default() })
        }
    }

    type Fixture = (
        Arc<StockStore>,
        Arc<NoticeProcessor<NullBroker>>,
        Arc<OrderExecutor<NullBroker>>,
        tokio::sync::mpsc::UnboundedReceiver<String>,
    );

    fn fixture() -> Fixture {
        let store = Arc::new(StockStore::new(10, 10, 1, 60.0, false));
        let registry = Arc::new(ConfigRegistry::new(TradingConfig::default(), "config/trading.ini"));
        let executor = Arc::new(OrderExecutor::new(Arc::new(NullBroker), store.clone(), registry));
        let (processor, rx) = NoticeProcessor::new(store.clone(), executor.clone(), None);

        store.add_selected_stock(
            "005930",
            "삼성전자",
            &DailyBar { open: 74_800.0, high: 75_400.0, low: 74_600.0, close: 75_000.0, volume: 1_200_000, trading_value: 0.0 },
            78.5,
            None,
        );
        (store, processor, executor, rx)
    }

    fn notice(code: &str, dvsn: &str, order_no: &str, qty: u32, price: f64, exec_time: &str) -> ExecutionNotice {
        ExecutionNotice {
            customer_id: "HTS0001".into(),
            account_no: "5001234567".into(),
            order_no: order_no.into(),
            orig_order_no: String::new(),
            sell_buy_dvsn: dvsn.into(),
            stock_code: code.into(),
            exec_qty: qty,
            exec_price: price,
            exec_time: exec_time.into(),
            reject_yn: "0".into(),
            exec_yn: "2".into(),
            receipt_yn: "1".into(),
            branch_no: "91252".into(),
            ord_qty: qty,
            ord_price: price,
            stock_name: "삼성전자".into(),
        }
    }

    fn place_buy_order(store: &StockStore, qty: u32) {
        store.change_status(
            "005930",
            TradingStatus::BuyOrdered,
            "test",
            TradeUpdates {
                buy_quantity: Some(qty),
                ordered_qty: Some(Some(qty)),
                filled_qty: Some(0),
                remaining_qty: Some(Some(qty)),
                ..TradeUpdates::default()
            }
            .with_buy_order(
                crate::stock::OrderRef {
                    order_id: "0000117057".into(),
                    orgno: "91252".into(),
                    order_time_api: "091201".into(),
                },
                now_kst(),
            ),
        );
    }

    #[tokio::test]
    async fn full_buy_fill_moves_to_bought() {
        let (store, processor, _exec, _rx) = fixture();
        place_buy_order(&store, 13);

        processor.handle(&notice("005930", "02", "0000117057", 13, 75_350.0, "091501"));

        assert_eq!(store.status_of("005930"), Some(TradingStatus::Bought));
        let info = store.trade_info("005930").unwrap();
        assert_eq!(info.filled_qty, 13);
        assert_eq!(info.remaining_qty, Some(0));
        assert!((info.buy_price.unwrap() - 75_350.0).abs() < f64::EPSILON);
        assert_eq!(processor.counters().buys_completed, 1);
    }

    #[tokio::test]
    async fn partial_fills_aggregate_weighted_average() {
        let (store, processor, _exec, _rx) = fixture();
        place_buy_order(&store, 20);

        processor.handle(&notice("005930", "02", "0000117057", 7, 120_000.0, "091501"));
        assert_eq!(store.status_of("005930"), Some(TradingStatus::PartialBought));

        processor.handle(&notice("005930", "02", "0000117057", 13, 120_500.0, "091544"));
        assert_eq!(store.status_of("005930"), Some(TradingStatus::Bought));

        let info = store.trade_info("005930").unwrap();
        assert_eq!(info.filled_qty, 20);
        // Weighted average across the two partials.
        let expected = (120_000.0 * 7.0 + 120_500.0 * 13.0) / 20.0;
        assert!((info.buy_price.unwrap() - expected).abs() < 1e-9);
        assert_eq!(info.remaining_qty, Some(0));
    }

    #[tokio::test]
    async fn replayed_notice_does_not_advance_fills() {
        let (store, processor, _exec, _rx) = fixture();
        place_buy_order(&store, 13);

        let n = notice("005930", "02", "0000117057", 7, 75_350.0, "091501");
        processor.handle(&n);
        processor.handle(&n);

        let info = store.trade_info("005930").unwrap();
        assert_eq!(info.filled_qty, 7);
        assert_eq!(processor.counters().duplicates, 1);
        assert!(info.filled_qty <= info.ordered_qty.unwrap());
    }

    #[tokio::test]
    async fn non_execution_and_untracked_notices_ignored() {
        let (store, processor, _exec, _rx) = fixture();
        place_buy_order(&store, 13);

        let mut n = notice("005930", "02", "0000117057", 13, 75_350.0, "091501");
        n.exec_yn = "1".into();
        processor.handle(&n);
        assert_eq!(store.status_of("005930"), Some(TradingStatus::BuyOrdered));

        processor.handle(&notice("999999", "02", "0000117058", 13, 75_350.0, "091502"));
        let counters = processor.counters();
        assert_eq!(counters.ignored, 2);
        assert_eq!(counters.buy_fills, 0);
    }

    #[tokio::test]
    async fn zero_price_fill_dropped() {
        let (store, processor, _exec, _rx) = fixture();
        place_buy_order(&store, 13);
        processor.handle(&notice("005930", "02", "0000117057", 13, 0.0, "091501"));
        assert_eq!(store.status_of("005930"), Some(TradingStatus::BuyOrdered));
        assert_eq!(processor.counters().ignored, 1);
    }

    #[tokio::test]
    async fn full_sell_realizes_pnl_and_requests_unsubscribe() {
        let (store, processor, exec, mut rx) = fixture();

        // Bought 13 @ 75,350, then a sell order goes out.
        place_buy_order(&store, 13);
        processor.handle(&notice("005930", "02", "0000117057", 13, 75_350.0, "091501"));
        assert!(exec.execute_sell("005930", Some(77_600.0), "take_profit").await);

        processor.handle(&notice("005930", "01", "0000117099", 13, 77_600.0, "100101"));

        assert_eq!(store.status_of("005930"), Some(TradingStatus::Sold));
        let info = store.trade_info("005930").unwrap();
        let expected = (77_600.0 - 75_350.0) * 13.0;
        assert!((info.realized_pnl.unwrap() - expected).abs() < 1e-6);
        assert!((expected - 29_250.0).abs() < 1e-9);

        // The executor booked the (commission-netted) round trip.
        let stats = exec.statistics();
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.winning_trades, 1);

        // And the symbol was queued for unsubscription.
        assert_eq!(rx.try_recv().unwrap(), "005930");
    }

    #[tokio::test]
    async fn partial_sell_keeps_position_open() {
        let (store, processor, exec, mut rx) = fixture();
        place_buy_order(&store, 10);
        processor.handle(&notice("005930", "02", "0000117057", 10, 75_000.0, "091501"));
        assert!(exec.execute_sell("005930", Some(76_000.0), "take_profit").await);

        processor.handle(&notice("005930", "01", "0000117099", 4, 76_000.0, "100101"));
        assert_eq!(store.status_of("005930"), Some(TradingStatus::PartialSold));
        let info = store.trade_info("005930").unwrap();
        assert_eq!(info.remaining_qty, Some(6));
        // realized P&L reflects the filled portion so far.
        assert!((info.realized_pnl.unwrap() - (76_000.0 - 75_000.0) * 4.0).abs() < 1e-9);
        assert!(rx.try_recv().is_err());

        processor.handle(&notice("005930", "01", "0000117099", 6, 76_100.0, "100201"));
        assert_eq!(store.status_of("005930"), Some(TradingStatus::Sold));
        let info = store.trade_info("005930").unwrap();
        let avg = (76_000.0 * 4.0 + 76_100.0 * 6.0) / 10.0;
        assert!((info.sell_price.unwrap() - avg).abs() < 1e-9);
        assert!((info.realized_pnl.unwrap() - (avg - 75_000.0) * 10.0).abs() < 1e-6);
        assert_eq!(rx.try_recv().unwrap(), "005930");
    }
}
