// =============================================================================
// Order Recovery Manager — detects and unwinds stuck orders
// =============================================================================
//
// Runs on the monitor's periodic tick. An order is stuck when its order
// timestamp is older than the configured timeout (0 means never). The cancel
// RPC is attempted first; the status restore happens regardless of the
// broker outcome, because a stuck order must not wedge the symbol.
// =============================================================================

use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::broker::BrokerApi;
use crate::config::ConfigRegistry;
use crate::executor::OrderExecutor;
use crate::stock::StockStore;
use crate::types::{now_kst, OrderSide, TradingStatus};

#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    pub total_recoveries: u64,
    pub successful_api_cancels: u64,
    pub failed_api_cancels: u64,
}

#[derive(Debug, Clone)]
struct StuckOrder {
    code: String,
    side: OrderSide,
    minutes_elapsed: f64,
}

pub struct OrderRecoveryManager<B: BrokerApi> {
    store: Arc<StockStore>,
    executor: Arc<OrderExecutor<B>>,
    config: Arc<ConfigRegistry>,
    stats: Mutex<RecoveryStats>,
}

impl<B: BrokerApi> OrderRecoveryManager<B> {
    pub fn new(
        store: Arc<StockStore>,
        executor: Arc<OrderExecutor<B>>,
        config: Arc<ConfigRegistry>,
    ) -> Self {
        Self {
            store,
            executor,
            config,
            stats: Mutex::new(RecoveryStats::default()),
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats.lock().clone()
    }

    /// One recovery sweep. Returns how many orders were recovered.
    pub async fn recover_stuck_orders(&self) -> usize {
        let timeout = self.config.current().performance.stuck_order_timeout_minutes;
        if timeout <= 0 {
            // 0 disables recovery entirely.
            return 0;
        }

        let stuck = self.identify_stuck_orders(now_kst(), timeout as f64);
        if stuck.is_empty() {
            return 0;
        }
        warn!(count = stuck.len(), "stuck orders found");

        let mut recovered = 0usize;
        for order in stuck {
            if self.recover_one(&order).await {
                recovered += 1;
            }
        }
        self.stats.lock().total_recoveries += recovered as u64;
        if recovered > 0 {
            info!(recovered, "stuck orders recovered");
        }
        recovered
    }

    fn identify_stuck_orders(&self, now: DateTime<Tz>, timeout_minutes: f64) -> Vec<StuckOrder> {
        let mut stuck = Vec::new();
        for code in self.store.codes() {
            let status = match self.store.status_of(&code) {
                Some(s) => s,
                None => continue,
            };
            let info = match self.store.trade_info(&code) {
                Some(i) => i,
                None => continue,
            };

            if status.has_open_buy_order() {
                if let Some(order_time) = info.order_time {
                    let minutes = (now - order_time).num_seconds() as f64 / 60.0;
                    if minutes > timeout_minutes {
                        stuck.push(StuckOrder {
                            code: code.clone(),
                            side: OrderSide::Buy,
                            minutes_elapsed: minutes,
                        });
                    }
                }
            } else if status.has_open_sell_order() {
                if let Some(sell_time) = info.sell_order_time {
                    let minutes = (now - sell_time).num_seconds() as f64 / 60.0;
                    if minutes > timeout_minutes {
                        stuck.push(StuckOrder {
                            code: code.clone(),
                            side: OrderSide::Sell,
                            minutes_elapsed: minutes,
                        });
                    }
                }
            }
        }
        stuck
    }

    async fn recover_one(&self, order: &StuckOrder) -> bool {
        warn!(
            code = %order.code,
            side = %order.side,
            minutes = format!("{:.1}", order.minutes_elapsed),
            "recovering stuck order"
        );

        // Cancel attempt: success is recorded but not required.
        let cancelled = self.executor.cancel_order(&order.code, order.side).await;
        {
            let mut stats = self.stats.lock();
            if cancelled {
                stats.successful_api_cancels += 1;
            } else {
                stats.failed_api_cancels += 1;
            }
        }

        // A successful cancel already restored the status; otherwise force
        // the restore so the symbol does not stay wedged.
        let restored = if cancelled {
            true
        } else {
            self.executor
                .restore_after_cancel(&order.code, order.side, "stuck_order_timeout")
        };
        if !restored {
            error!(code = %order.code, "stuck order status restore failed");
        }
        restored
    }

    /// Emergency path: cancel every open order right now, regardless of age.
    pub async fn force_cancel_all_pending_orders(&self) -> usize {
        let mut cancelled = 0usize;
        for code in self.store.codes() {
            let status = match self.store.status_of(&code) {
                Some(s) => s,
                None => continue,
            };
            let side = if status.has_open_buy_order() {
                OrderSide::Buy
            } else if status.has_open_sell_order() {
                OrderSide::Sell
            } else {
                continue;
            };
            if self.executor.cancel_order(&code, side).await {
                cancelled += 1;
                info!(code = %code, %side, "pending order force-cancelled");
            } else if self.executor.restore_after_cancel(&code, side, "force_cancel") {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            warn!(cancelled, "force-cancel sweep complete");
        }
        cancelled
    }

    /// Diagnostic pass: orders that have outlived the timeout but were not
    /// yet recovered.
    pub fn validate_transitions(&self) -> Vec<String> {
        let timeout = self.config.current().performance.stuck_order_timeout_minutes;
        if timeout <= 0 {
            return Vec::new();
        }
        self.identify_stuck_orders(now_kst(), timeout as f64)
            .into_iter()
            .map(|o| {
                format!(
                    "{}: {} order open for {:.1} minutes",
                    o.code, o.side, o.minutes_elapsed
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{CancelAck, OrderAck};
    use crate::config::TradingConfig;
    use crate::stock::{DailyBar, OrderRef, TradeUpdates};
    use anyhow::Result;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingBroker {
        cancel_ok: bool,
        cancels: AtomicU32,
    }

    impl BrokerApi for CountingBroker {
        async fn place_order(&self, _: OrderSide, _: &str, _: u32, _: f64) -> Result<OrderAck> {
            Ok(OrderAck { rt_cd: "0".into(), order_no: "1".into(), ..OrderAck::default() })
        }
        async fn cancel_order(&self, _: &str, _: &str) -> Result<CancelAck> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(CancelAck {
                rt_cd: if self.cancel_ok { "0" } else { "1" }.into(),
                ..CancelAck::default()
            })
        }
    }

    struct Fixture {
        store: Arc<StockStore>,
        manager: OrderRecoveryManager<CountingBroker>,
    }

    fn fixture(cancel_ok: bool, timeout_minutes: i64) -> Fixture {
        let store = Arc::new(StockStore::new(10, 10, 1, 60.0, false));
        let mut cfg = TradingConfig::default();
        cfg.performance.stuck_order_timeout_minutes = timeout_minutes;
        let registry = Arc::new(ConfigRegistry::new(cfg, "config/trading.ini"));
        let broker = Arc::new(CountingBroker { cancel_ok, cancels: AtomicU32::new(0) });
        let executor = Arc::new(OrderExecutor::new(broker, store.clone(), registry.clone()));
        let manager = OrderRecoveryManager::new(store.clone(), executor, registry);

        store.add_selected_stock(
            "000660",
            "SK하이닉스",
            &DailyBar { open: 119_000.0, high: 121_000.0, low: 118_500.0, close: 120_000.0, volume: 900_000, trading_value: 0.0 },
            70.0,
            None,
        );
        Fixture { store, manager }
    }

    fn age_buy_order(store: &StockStore, code: &str, minutes: i64) {
        store.change_status(
            code,
            TradingStatus::BuyOrdered,
            "test",
            TradeUpdates {
                buy_quantity: Some(20),
                ordered_qty: Some(Some(20)),
                filled_qty: Some(0),
                remaining_qty: Some(Some(20)),
                ..TradeUpdates::default()
            }
            .with_buy_order(
                OrderRef {
                    order_id: "0000117057".into(),
                    orgno: "91252".into(),
                    order_time_api: "091201".into(),
                },
                now_kst() - Duration::minutes(minutes),
            ),
        );
    }

    #[tokio::test]
    async fn fresh_orders_are_left_alone() {
        let f = fixture(true, 3);
        age_buy_order(&f.store, "000660", 1);
        assert_eq!(f.manager.recover_stuck_orders().await, 0);
        assert_eq!(f.store.status_of("000660"), Some(TradingStatus::BuyOrdered));
    }

    #[tokio::test]
    async fn timed_out_buy_recovers_to_watching() {
        let f = fixture(true, 3);
        age_buy_order(&f.store, "000660", 5);
        assert_eq!(f.manager.recover_stuck_orders().await, 1);
        assert_eq!(f.store.status_of("000660"), Some(TradingStatus::Watching));
        let info = f.store.trade_info("000660").unwrap();
        assert!(info.buy_order.is_none());
        assert!(info.order_time.is_none());

        let stats = f.manager.stats();
        assert_eq!(stats.total_recoveries, 1);
        assert_eq!(stats.successful_api_cancels, 1);
    }

    #[tokio::test]
    async fn timed_out_partial_buy_keeps_fills_as_position() {
        let f = fixture(true, 3);
        age_buy_order(&f.store, "000660", 5);
        // Seven shares filled at 120,000 before the order stalled.
        f.store.transition_with("000660", "fill", |_, info| {
            info.filled_qty = 7;
            info.remaining_qty = Some(13);
            info.avg_exec_price = Some(120_000.0);
            info.buy_price = Some(120_000.0);
            (Some(TradingStatus::PartialBought), ())
        });

        assert_eq!(f.manager.recover_stuck_orders().await, 1);
        // The §8 partial-timeout scenario: filled shares survive as BOUGHT
        // with the order size reconciled down to the fills.
        assert_eq!(f.store.status_of("000660"), Some(TradingStatus::Bought));
        let info = f.store.trade_info("000660").unwrap();
        assert_eq!(info.buy_quantity, Some(7));
        assert_eq!(info.ordered_qty, Some(7));
        assert_eq!(info.remaining_qty, Some(0));
        assert!((info.buy_price.unwrap() - 120_000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cancel_failure_still_restores_status() {
        let f = fixture(false, 3);
        age_buy_order(&f.store, "000660", 10);
        assert_eq!(f.manager.recover_stuck_orders().await, 1);
        assert_eq!(f.store.status_of("000660"), Some(TradingStatus::Watching));
        let stats = f.manager.stats();
        assert_eq!(stats.failed_api_cancels, 1);
        assert_eq!(stats.successful_api_cancels, 0);
    }

    #[tokio::test]
    async fn zero_timeout_means_never() {
        let f = fixture(true, 0);
        age_buy_order(&f.store, "000660", 600);
        assert_eq!(f.manager.recover_stuck_orders().await, 0);
        assert_eq!(f.store.status_of("000660"), Some(TradingStatus::BuyOrdered));
        assert!(f.manager.validate_transitions().is_empty());
    }

    #[tokio::test]
    async fn timed_out_sell_recovers_to_bought() {
        let f = fixture(true, 3);
        f.store.change_status("000660", TradingStatus::BuyOrdered, "t", TradeUpdates::default());
        f.store.change_status(
            "000660",
            TradingStatus::Bought,
            "t",
            TradeUpdates { buy_price: Some(120_000.0), buy_quantity: Some(7), ..TradeUpdates::default() },
        );
        f.store.change_status(
            "000660",
            TradingStatus::SellOrdered,
            "t",
            TradeUpdates::default().with_sell_order(
                OrderRef {
                    order_id: "0000117099".into(),
                    orgno: "91252".into(),
                    order_time_api: "101201".into(),
                },
                now_kst() - Duration::minutes(6),
            ),
        );

        assert_eq!(f.manager.recover_stuck_orders().await, 1);
        assert_eq!(f.store.status_of("000660"), Some(TradingStatus::Bought));
        let info = f.store.trade_info("000660").unwrap();
        assert!(info.sell_order.is_none());
        // The position itself survives the cancel.
        assert_eq!(info.buy_quantity, Some(7));
    }

    #[tokio::test]
    async fn validate_reports_but_does_not_mutate() {
        let f = fixture(true, 3);
        age_buy_order(&f.store, "000660", 8);
        let issues = f.manager.validate_transitions();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("000660"));
        assert_eq!(f.store.status_of("000660"), Some(TradingStatus::BuyOrdered));
    }

    #[tokio::test]
    async fn force_cancel_sweeps_everything() {
        let f = fixture(true, 3);
        age_buy_order(&f.store, "000660", 1); // fresh, but force path ignores age
        assert_eq!(f.manager.force_cancel_all_pending_orders().await, 1);
        assert_eq!(f.store.status_of("000660"), Some(TradingStatus::Watching));
    }
}
