// =============================================================================
// Stock Store — thread-safe per-symbol state shared by the gateway ingest
// path and the decision loop
// =============================================================================
//
// Three sub-stores behind three locks, always acquired in the fixed order
//   reference → realtime → status
// by any code path that needs more than one. The snapshot cache has its own
// lock which is never held while the three are taken. Status mutations go
// through the single `change_status` gate, which validates the transition
// graph.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use super::cache::SnapshotCache;
use super::model::{
    DailyBar, RealtimeData, ReferenceData, Snapshot, StockMeta, TradeInfo, TradeUpdates,
};
use crate::types::{now_kst, TradingStatus};
use crate::ws::parser::{ContractTick, OrderbookTick};

struct RefEntry {
    meta: StockMeta,
    reference: ReferenceData,
}

struct StatusEntry {
    status: TradingStatus,
    info: TradeInfo,
}

/// Seed data for a symbol added by the intraday scanner, when the rank
/// endpoints supplied more than a price.
#[derive(Debug, Clone, Default)]
pub struct IntradaySeed {
    pub yesterday_close: Option<f64>,
    pub avg_daily_volume: Option<u64>,
    pub avg_trading_value: Option<f64>,
    pub volume: Option<u64>,
    pub contract_strength: Option<f64>,
    pub buy_ratio: Option<f64>,
    pub volume_spike_ratio: Option<f64>,
    pub price_change_rate: Option<f64>,
}

/// Aggregate view for reporting.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreSummary {
    pub total_selected: usize,
    pub premarket_selected: usize,
    pub intraday_added: usize,
    pub max_premarket: usize,
    pub max_intraday: usize,
    pub status_counts: HashMap<String, usize>,
}

/// Breakdown of the intraday-added pool.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IntradaySummary {
    pub total_count: usize,
    pub average_score: f64,
    pub reasons_distribution: HashMap<String, usize>,
    pub status_counts: HashMap<String, usize>,
}

pub struct StockStore {
    max_premarket: usize,
    max_intraday: usize,
    max_holding_days: u32,

    // Lock order: reference → realtime → status.
    reference: Mutex<HashMap<String, RefEntry>>,
    realtime: Mutex<HashMap<String, RealtimeData>>,
    status: Mutex<HashMap<String, StatusEntry>>,

    cache: SnapshotCache,
    liquidity: Mutex<HashMap<String, f64>>,

    update_seq: Mutex<u64>,
    update_cv: Condvar,
}

impl StockStore {
    pub fn new(
        max_premarket: usize,
        max_intraday: usize,
        max_holding_days: u32,
        cache_ttl_seconds: f64,
        cache_debug: bool,
    ) -> Self {
        info!(
            max_premarket,
            max_intraday,
            cache_ttl_seconds,
            "stock store initialised"
        );
        Self {
            max_premarket,
            max_intraday,
            max_holding_days,
            reference: Mutex::new(HashMap::new()),
            realtime: Mutex::new(HashMap::new()),
            status: Mutex::new(HashMap::new()),
            cache: SnapshotCache::new(cache_ttl_seconds, cache_debug),
            liquidity: Mutex::new(HashMap::new()),
            update_seq: Mutex::new(0),
            update_cv: Condvar::new(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register a pre-market selection. Fails on duplicates and when the
    /// pre-market pool is full.
    pub fn add_selected_stock(
        &self,
        code: &str,
        name: &str,
        day0: &DailyBar,
        selection_score: f64,
        reference: Option<ReferenceData>,
    ) -> bool {
        {
            let mut refs = self.reference.lock();
            if refs.contains_key(code) {
                warn!(code, "already selected, skipping add");
                return false;
            }
            let premarket = refs.values().filter(|e| !e.meta.is_intraday_added).count();
            if premarket >= self.max_premarket {
                warn!(code, premarket, max = self.max_premarket, "pre-market pool full");
                return false;
            }

            let mut reference = reference.unwrap_or_else(|| ReferenceData {
                yesterday_close: day0.close,
                yesterday_volume: day0.volume,
                yesterday_high: day0.high,
                yesterday_low: day0.low,
                ..ReferenceData::default()
            });
            reference.pattern_score = selection_score;

            refs.insert(
                code.to_string(),
                RefEntry {
                    meta: StockMeta {
                        code: code.to_string(),
                        name: name.to_string(),
                        created_at: now_kst(),
                        max_holding_days: self.max_holding_days,
                        is_intraday_added: false,
                        intraday_reasons: String::new(),
                        intraday_score: 0.0,
                    },
                    reference,
                },
            );
        }

        self.realtime.lock().insert(
            code.to_string(),
            RealtimeData {
                current_price: day0.close,
                today_volume: day0.volume,
                today_high: day0.high,
                today_low: day0.low,
                ..RealtimeData::default()
            },
        );

        self.status.lock().insert(
            code.to_string(),
            StatusEntry {
                status: TradingStatus::Watching,
                info: TradeInfo {
                    detected_time: Some(now_kst()),
                    ..TradeInfo::default()
                },
            },
        );

        self.cache.invalidate(code);
        info!(code, name, score = selection_score, "selected stock added");
        true
    }

    /// Register a symbol found by the intraday scanner. Uses the separate
    /// intraday capacity pool and tags the record.
    pub fn add_intraday_stock(
        &self,
        code: &str,
        name: &str,
        current_price: f64,
        selection_score: f64,
        reasons: &str,
        seed: Option<IntradaySeed>,
    ) -> bool {
        let seed = seed.unwrap_or_default();
        {
            let mut refs = self.reference.lock();
            if refs.contains_key(code) {
                warn!(code, "already managed, skipping intraday add");
                return false;
            }
            if refs.len() >= self.max_premarket + self.max_intraday {
                warn!(
                    code,
                    total = refs.len(),
                    max = self.max_premarket + self.max_intraday,
                    "intraday pool full"
                );
                return false;
            }

            let volume = seed.volume.unwrap_or(0);
            refs.insert(
                code.to_string(),
                RefEntry {
                    meta: StockMeta {
                        code: code.to_string(),
                        name: name.to_string(),
                        created_at: now_kst(),
                        max_holding_days: self.max_holding_days,
                        is_intraday_added: true,
                        intraday_reasons: reasons.to_string(),
                        intraday_score: selection_score,
                    },
                    reference: ReferenceData {
                        pattern_score: selection_score,
                        yesterday_close: seed.yesterday_close.unwrap_or(current_price),
                        yesterday_volume: volume,
                        yesterday_high: current_price,
                        yesterday_low: current_price,
                        sma_20: current_price,
                        bb_upper: current_price * 1.02,
                        bb_middle: current_price,
                        bb_lower: current_price * 0.98,
                        avg_daily_volume: seed.avg_daily_volume.unwrap_or(volume),
                        avg_trading_value: seed
                            .avg_trading_value
                            .unwrap_or(volume as f64 * current_price),
                        ..ReferenceData::default()
                    },
                },
            );
        }

        self.realtime.lock().insert(
            code.to_string(),
            RealtimeData {
                current_price,
                today_volume: seed.volume.unwrap_or(0),
                today_high: current_price,
                today_low: current_price,
                contract_strength: seed.contract_strength.unwrap_or(100.0),
                buy_ratio: seed.buy_ratio.unwrap_or(50.0),
                volume_spike_ratio: seed.volume_spike_ratio.unwrap_or(1.0),
                price_change_rate: seed.price_change_rate.unwrap_or(0.0),
                ..RealtimeData::default()
            },
        );

        self.status.lock().insert(
            code.to_string(),
            StatusEntry {
                status: TradingStatus::Watching,
                info: TradeInfo {
                    detected_time: Some(now_kst()),
                    ..TradeInfo::default()
                },
            },
        );

        self.cache.invalidate(code);
        info!(code, name, score = selection_score, reasons, "intraday stock added");
        true
    }

    /// Remove a symbol entirely: metadata, reference, realtime, status,
    /// trade info, and cache entry.
    pub fn remove_selected_stock(&self, code: &str) -> bool {
        let removed = self.reference.lock().remove(code).is_some();
        if !removed {
            return false;
        }
        self.realtime.lock().remove(code);
        self.status.lock().remove(code);
        self.liquidity.lock().remove(code);
        self.cache.invalidate(code);
        info!(code, "selected stock removed");
        true
    }

    pub fn clear_all(&self) {
        let count = {
            let mut refs = self.reference.lock();
            let n = refs.len();
            refs.clear();
            n
        };
        self.realtime.lock().clear();
        self.status.lock().clear();
        self.liquidity.lock().clear();
        self.cache.clear();
        info!(count, "all selected stocks cleared");
    }

    // =========================================================================
    // Realtime updates (gateway-driven)
    // =========================================================================

    /// Price-only update. Unknown codes fail silently.
    pub fn update_price(&self, code: &str, price: f64, volume: Option<u64>, change_rate: Option<f64>) {
        if price <= 0.0 {
            return;
        }
        let (yesterday_close, avg_daily_volume) = match self.reference_fields(code) {
            Some(v) => v,
            None => return,
        };

        {
            let mut realtime = self.realtime.lock();
            let rt = match realtime.get_mut(code) {
                Some(rt) => rt,
                None => return,
            };
            rt.current_price = price;
            if let Some(v) = volume {
                rt.today_volume = v;
            }
            match change_rate {
                Some(r) => rt.price_change_rate = r,
                None => {
                    if yesterday_close > 0.0 {
                        rt.price_change_rate =
                            (price - yesterday_close) / yesterday_close * 100.0;
                    }
                }
            }
            Self::recompute_volume_metrics(rt, avg_daily_volume);
            rt.touch();

            // Unrealized P&L rides in the same critical section, under the
            // status lock taken after the realtime lock (fixed order).
            let mut status = self.status.lock();
            if let Some(entry) = status.get_mut(code) {
                Self::refresh_unrealized(entry, price);
            }
        }

        self.cache.invalidate(code);
        self.notify_update();
    }

    /// Apply a full contract tick from the gateway.
    pub fn apply_contract_tick(&self, code: &str, tick: &ContractTick) {
        if tick.current_price <= 0.0 {
            return;
        }
        let (yesterday_close, avg_daily_volume) = match self.reference_fields(code) {
            Some(v) => v,
            None => return,
        };

        {
            let mut realtime = self.realtime.lock();
            let rt = match realtime.get_mut(code) {
                Some(rt) => rt,
                None => return,
            };

            rt.current_price = tick.current_price;
            rt.today_volume = tick.acc_volume;
            rt.contract_volume = tick.contract_volume;
            if tick.high_price > 0.0 {
                rt.today_high = rt.today_high.max(tick.high_price);
            }
            if tick.low_price > 0.0 {
                rt.today_low = if rt.today_low > 0.0 {
                    rt.today_low.min(tick.low_price)
                } else {
                    tick.low_price
                };
            }

            rt.contract_strength = tick.contract_strength;
            rt.buy_ratio = tick.buy_ratio;
            rt.market_pressure = tick.market_pressure;
            rt.vi_standard_price = tick.vi_standard_price;
            rt.trading_halt = tick.trading_halt;

            rt.change_sign = tick.change_sign.clone();
            rt.change_amount = tick.change_amount;
            rt.change_rate = tick.change_rate;
            rt.weighted_avg_price = tick.weighted_avg_price;
            rt.sell_contract_count = tick.sell_contract_count;
            rt.buy_contract_count = tick.buy_contract_count;
            rt.net_buy_contract_count = tick.net_buy_contract_count;
            rt.total_ask_qty = tick.total_ask_qty;
            rt.total_bid_qty = tick.total_bid_qty;
            rt.volume_turnover_rate = tick.volume_turnover_rate;
            rt.prev_same_time_volume = tick.prev_same_time_volume;
            rt.prev_same_time_volume_rate = tick.prev_same_time_volume_rate;
            rt.hour_cls_code = tick.hour_cls_code.clone();
            rt.market_operation_code = tick.market_operation_code.clone();

            if tick.ask_price1 > 0.0 {
                rt.ask_price = tick.ask_price1;
            }
            if tick.bid_price1 > 0.0 {
                rt.bid_price = tick.bid_price1;
            }

            if yesterday_close > 0.0 {
                rt.price_change_rate =
                    (tick.current_price - yesterday_close) / yesterday_close * 100.0;
            }
            Self::recompute_volume_metrics(rt, avg_daily_volume);
            rt.touch();

            let mut status = self.status.lock();
            if let Some(entry) = status.get_mut(code) {
                Self::refresh_unrealized(entry, tick.current_price);
            }
        }

        self.cache.invalidate(code);
        self.notify_update();
    }

    /// Replace the bid/ask depth atomically (top 5 of the 10 broker levels).
    pub fn apply_orderbook(&self, code: &str, tick: &OrderbookTick) {
        {
            let mut realtime = self.realtime.lock();
            let rt = match realtime.get_mut(code) {
                Some(rt) => rt,
                None => return,
            };
            for i in 0..5 {
                rt.ask_prices[i] = tick.ask_prices[i];
                rt.bid_prices[i] = tick.bid_prices[i];
                rt.ask_volumes[i] = tick.ask_qtys[i];
                rt.bid_volumes[i] = tick.bid_qtys[i];
            }
            if tick.ask_prices[0] > 0.0 {
                rt.ask_price = tick.ask_prices[0];
            }
            if tick.bid_prices[0] > 0.0 {
                rt.bid_price = tick.bid_prices[0];
            }
            rt.total_ask_qty = tick.total_ask_qty;
            rt.total_bid_qty = tick.total_bid_qty;
            rt.touch();
        }
        self.cache.invalidate(code);
        self.notify_update();
    }

    fn recompute_volume_metrics(rt: &mut RealtimeData, avg_daily_volume: u64) {
        if avg_daily_volume > 0 {
            rt.volume_spike_ratio = rt.today_volume as f64 / avg_daily_volume as f64;
        }
        if rt.today_high > 0.0 && rt.today_low > 0.0 {
            rt.volatility = (rt.today_high - rt.today_low) / rt.today_low * 100.0;
        }
    }

    fn refresh_unrealized(entry: &mut StatusEntry, price: f64) {
        if entry.status != TradingStatus::Bought {
            return;
        }
        if let (Some(buy_price), Some(qty)) = (entry.info.buy_price, entry.info.buy_quantity) {
            if buy_price > 0.0 && qty > 0 {
                entry.info.unrealized_pnl = Some((price - buy_price) * qty as f64);
                entry.info.unrealized_pnl_rate = Some((price - buy_price) / buy_price * 100.0);
                entry.info.updated_at = Some(now_kst());
            }
        }
    }

    fn reference_fields(&self, code: &str) -> Option<(f64, u64)> {
        let refs = self.reference.lock();
        refs.get(code)
            .map(|e| (e.reference.yesterday_close, e.reference.avg_daily_volume))
    }

    // =========================================================================
    // Status gate
    // =========================================================================

    /// The single mutation gate for `TradingStatus`. Rejects unknown codes
    /// and transitions outside the allowed graph; same-status calls apply the
    /// trade updates without a transition.
    pub fn change_status(
        &self,
        code: &str,
        new_status: TradingStatus,
        reason: &str,
        updates: TradeUpdates,
    ) -> bool {
        let old_status = {
            let mut status = self.status.lock();
            let entry = match status.get_mut(code) {
                Some(e) => e,
                None => {
                    warn!(code, "status change for unknown code rejected");
                    return false;
                }
            };
            let old = entry.status;
            if old != new_status && !old.can_transition_to(new_status) {
                warn!(code, %old, new = %new_status, reason, "illegal status transition rejected");
                return false;
            }
            entry.status = new_status;
            updates.apply(&mut entry.info);
            old
        };

        self.cache.invalidate(code);
        info!(code, old = %old_status, new = %new_status, reason, "status changed");
        true
    }

    /// Read-modify under the status lock in one critical section. The closure
    /// may mutate the trade info and request a transition by returning
    /// `Some(next)`; the transition is validated by the same rules as
    /// `change_status`, and an illegal request rolls the info mutations back
    /// so the whole notice applies all-or-nothing. Used by the
    /// execution-notice processor to keep fill aggregation and the resulting
    /// transition atomic.
    pub fn transition_with<R>(
        &self,
        code: &str,
        reason: &str,
        f: impl FnOnce(TradingStatus, &mut TradeInfo) -> (Option<TradingStatus>, R),
    ) -> Option<R> {
        let (result, old, new) = {
            let mut status = self.status.lock();
            let entry = status.get_mut(code)?;
            let old = entry.status;
            let rollback = entry.info.clone();
            let (next, result) = f(old, &mut entry.info);
            entry.info.updated_at = Some(now_kst());
            match next {
                Some(next) if next != old => {
                    if !old.can_transition_to(next) {
                        warn!(code, %old, new = %next, reason, "illegal status transition rejected");
                        entry.info = rollback;
                        return None;
                    }
                    entry.status = next;
                    (result, old, Some(next))
                }
                _ => (result, old, None),
            }
        };

        self.cache.invalidate(code);
        if let Some(new) = new {
            info!(code, old = %old, new = %new, reason, "status changed");
        }
        Some(result)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Atomic snapshot under the triple lock in fixed order. Unknown code →
    /// None; never partial state.
    pub fn snapshot(&self, code: &str) -> Option<Snapshot> {
        if let Some(cached) = self.cache.get(code) {
            return Some(cached);
        }
        let snap = self.build_snapshot(code)?;
        self.cache.put(code, snap.clone());
        Some(snap)
    }

    fn build_snapshot(&self, code: &str) -> Option<Snapshot> {
        let liquidity_score = self.liquidity.lock().get(code).copied().unwrap_or(0.0);

        // Fixed order: reference → realtime → status, all held together so
        // the cross-section is consistent.
        let refs = self.reference.lock();
        let entry = refs.get(code)?;
        let realtime = self.realtime.lock();
        let rt = realtime.get(code)?;
        let status = self.status.lock();
        let st = status.get(code)?;

        Some(Snapshot {
            code: entry.meta.code.clone(),
            name: entry.meta.name.clone(),
            current_price: rt.current_price,
            bid_price: rt.bid_price,
            ask_price: rt.ask_price,
            bid_prices: rt.bid_prices,
            ask_prices: rt.ask_prices,
            today_volume: rt.today_volume,
            today_high: rt.today_high,
            today_low: rt.today_low,
            price_change_rate: rt.price_change_rate,
            volume_spike_ratio: rt.volume_spike_ratio,
            volatility: rt.volatility,
            contract_strength: rt.contract_strength,
            buy_ratio: rt.buy_ratio,
            market_pressure: rt.market_pressure,
            sell_contract_count: rt.sell_contract_count,
            buy_contract_count: rt.buy_contract_count,
            total_ask_qty: rt.total_ask_qty,
            total_bid_qty: rt.total_bid_qty,
            volume_turnover_rate: rt.volume_turnover_rate,
            prev_same_time_volume_rate: rt.prev_same_time_volume_rate,
            trading_halt: rt.trading_halt,
            vi_active: rt.is_vi_active(),
            vi_standard_price: rt.vi_standard_price,
            last_updated: rt.last_updated,
            yesterday_close: entry.reference.yesterday_close,
            sma_20: entry.reference.sma_20,
            pattern_score: entry.reference.pattern_score,
            avg_daily_volume: entry.reference.avg_daily_volume,
            status: st.status,
            buy_price: st.info.buy_price,
            buy_quantity: st.info.buy_quantity,
            target_price: st.info.target_price,
            stop_loss_price: st.info.stop_loss_price,
            order_time: st.info.order_time,
            sell_order_time: st.info.sell_order_time,
            execution_time: st.info.execution_time,
            unrealized_pnl: st.info.unrealized_pnl,
            unrealized_pnl_rate: st.info.unrealized_pnl_rate,
            dynamic_peak_price: st.info.dynamic_peak_price,
            dynamic_target_price: st.info.dynamic_target_price,
            is_intraday_added: entry.meta.is_intraday_added,
            max_holding_days: entry.meta.max_holding_days,
            liquidity_score,
            snapshot_time: now_kst(),
        })
    }

    /// Snapshots of every symbol currently in the given status. Codes are
    /// collected under one status-lock acquisition, then snapshotted.
    pub fn by_status(&self, wanted: TradingStatus) -> Vec<Snapshot> {
        let codes: Vec<String> = {
            let status = self.status.lock();
            status
                .iter()
                .filter(|(_, e)| e.status == wanted)
                .map(|(code, _)| code.clone())
                .collect()
        };
        codes.iter().filter_map(|c| self.snapshot(c)).collect()
    }

    /// Batched status query under a single status-lock acquisition.
    pub fn by_status_batch(&self, wanted: &[TradingStatus]) -> HashMap<TradingStatus, Vec<Snapshot>> {
        let mut grouped: HashMap<TradingStatus, Vec<String>> = HashMap::new();
        {
            let status = self.status.lock();
            for (code, entry) in status.iter() {
                if wanted.contains(&entry.status) {
                    grouped.entry(entry.status).or_default().push(code.clone());
                }
            }
        }
        let mut result: HashMap<TradingStatus, Vec<Snapshot>> =
            wanted.iter().map(|s| (*s, Vec::new())).collect();
        for (status, codes) in grouped {
            let snaps = codes.iter().filter_map(|c| self.snapshot(c)).collect();
            result.insert(status, snaps);
        }
        result
    }

    pub fn status_of(&self, code: &str) -> Option<TradingStatus> {
        self.status.lock().get(code).map(|e| e.status)
    }

    pub fn meta(&self, code: &str) -> Option<StockMeta> {
        self.reference.lock().get(code).map(|e| e.meta.clone())
    }

    pub fn reference_of(&self, code: &str) -> Option<ReferenceData> {
        self.reference.lock().get(code).map(|e| e.reference.clone())
    }

    pub fn trade_info(&self, code: &str) -> Option<TradeInfo> {
        self.status.lock().get(code).map(|e| e.info.clone())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.reference.lock().contains_key(code)
    }

    pub fn codes(&self) -> Vec<String> {
        self.reference.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.reference.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.lock().is_empty()
    }

    pub fn intraday_codes(&self) -> Vec<String> {
        self.reference
            .lock()
            .values()
            .filter(|e| e.meta.is_intraday_added)
            .map(|e| e.meta.code.clone())
            .collect()
    }

    /// Breakdown of the intraday-added pool: count, average entry score,
    /// reasons, and current statuses.
    pub fn intraday_summary(&self) -> IntradaySummary {
        let (codes, scores, reasons_distribution) = {
            let refs = self.reference.lock();
            let mut codes = Vec::new();
            let mut scores = Vec::new();
            let mut reasons: HashMap<String, usize> = HashMap::new();
            for entry in refs.values().filter(|e| e.meta.is_intraday_added) {
                codes.push(entry.meta.code.clone());
                scores.push(entry.meta.intraday_score);
                *reasons.entry(entry.meta.intraday_reasons.clone()).or_insert(0) += 1;
            }
            (codes, scores, reasons)
        };

        let mut status_counts: HashMap<String, usize> = HashMap::new();
        {
            let status = self.status.lock();
            for code in &codes {
                if let Some(entry) = status.get(code) {
                    *status_counts.entry(entry.status.to_string()).or_insert(0) += 1;
                }
            }
        }

        IntradaySummary {
            total_count: codes.len(),
            average_score: if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            },
            reasons_distribution,
            status_counts,
        }
    }

    pub fn summary(&self) -> StoreSummary {
        let (total, premarket, intraday) = {
            let refs = self.reference.lock();
            let intraday = refs.values().filter(|e| e.meta.is_intraday_added).count();
            (refs.len(), refs.len() - intraday, intraday)
        };
        let mut status_counts = HashMap::new();
        {
            let status = self.status.lock();
            for entry in status.values() {
                *status_counts.entry(entry.status.to_string()).or_insert(0) += 1;
            }
        }
        StoreSummary {
            total_selected: total,
            premarket_selected: premarket,
            intraday_added: intraday,
            max_premarket: self.max_premarket,
            max_intraday: self.max_intraday,
            status_counts,
        }
    }

    // =========================================================================
    // Liquidity scores
    // =========================================================================

    pub fn set_liquidity_score(&self, code: &str, score: f64) {
        self.liquidity.lock().insert(code.to_string(), score.clamp(0.0, 10.0));
    }

    pub fn liquidity_score(&self, code: &str) -> f64 {
        self.liquidity.lock().get(code).copied().unwrap_or(0.0)
    }

    // =========================================================================
    // Data-updated signal
    // =========================================================================

    fn notify_update(&self) {
        let mut seq = self.update_seq.lock();
        *seq = seq.wrapping_add(1);
        self.update_cv.notify_all();
    }

    /// Block until any realtime update arrives or the timeout elapses.
    /// Returns true when an update was observed.
    pub fn wait_for_update(&self, timeout: Duration) -> bool {
        let mut seq = self.update_seq.lock();
        let before = *seq;
        if self.update_cv.wait_for(&mut seq, timeout).timed_out() {
            *seq != before
        } else {
            true
        }
    }

    pub fn cache_stats(&self) -> super::cache::CacheStats {
        self.cache.stats()
    }

    #[cfg(test)]
    pub(crate) fn cache_contains(&self, code: &str) -> bool {
        self.cache.contains(code)
    }
}
