// =============================================================================
// Snapshot cache — read-through, per-symbol, TTL-bounded
// =============================================================================
//
// The cache has its own lock, which is never held while the store's
// reference/realtime/status locks are acquired (and never acquired inside
// them); writers invalidate after releasing the sub-store locks.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::model::Snapshot;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

pub struct SnapshotCache {
    ttl: Duration,
    debug_enabled: bool,
    entries: Mutex<HashMap<String, (Snapshot, Instant)>>,
    stats: Mutex<CacheStats>,
}

impl SnapshotCache {
    pub fn new(ttl_seconds: f64, debug_enabled: bool) -> Self {
        Self {
            ttl: Duration::from_secs_f64(ttl_seconds.max(0.0)),
            debug_enabled,
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Valid entry for `code`, or None on miss/expiry (expired entries are
    /// evicted on the way out).
    pub fn get(&self, code: &str) -> Option<Snapshot> {
        let mut entries = self.entries.lock();
        match entries.get(code) {
            Some((snap, stored_at)) if stored_at.elapsed() < self.ttl => {
                self.stats.lock().hits += 1;
                if self.debug_enabled {
                    debug!(code, age_ms = stored_at.elapsed().as_millis() as u64, "snapshot cache hit");
                }
                Some(snap.clone())
            }
            Some(_) => {
                entries.remove(code);
                self.stats.lock().misses += 1;
                None
            }
            None => {
                self.stats.lock().misses += 1;
                None
            }
        }
    }

    pub fn put(&self, code: &str, snapshot: Snapshot) {
        self.entries.lock().insert(code.to_string(), (snapshot, Instant::now()));
    }

    pub fn invalidate(&self, code: &str) {
        if self.entries.lock().remove(code).is_some() {
            self.stats.lock().invalidations += 1;
            if self.debug_enabled {
                debug!(code, "snapshot cache invalidated");
            }
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.lock().contains_key(code)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::model::Snapshot;
    use crate::types::{now_kst, MarketPressure, TradingStatus};

    fn snapshot(code: &str) -> Snapshot {
        Snapshot {
            code: code.into(),
            name: String::new(),
            current_price: 1_000.0,
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
            yesterday_close: 0.0,
            sma_20: 0.0,
            pattern_score: 0.0,
            avg_daily_volume: 0,
            status: TradingStatus::Watching,
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
    fn hit_within_ttl_then_expire() {
        let cache = SnapshotCache::new(0.05, false);
        cache.put("005930", snapshot("005930"));
        assert!(cache.get("005930").is_some());
        std::thread::sleep(Duration::from_millis(70));
        assert!(cache.get("005930").is_none());
        assert!(!cache.contains("005930"));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = SnapshotCache::new(60.0, false);
        cache.put("000660", snapshot("000660"));
        cache.invalidate("000660");
        assert!(cache.get("000660").is_none());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = SnapshotCache::new(60.0, false);
        assert!(cache.get("none").is_none());
        cache.put("005930", snapshot("005930"));
        assert!(cache.get("005930").is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
