// =============================================================================
// Buy condition analysis — momentum-first scoring over a symbol snapshot
// =============================================================================
//
// Pure: inputs are the snapshot, the market phase, the config, and the clock.
// The pipeline is ordered for speed: hard rejects, then cheap pre-filters,
// then the momentum floor, then the additive components.
// =============================================================================

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use tracing::debug;

use crate::config::TradingConfig;
use crate::stock::Snapshot;
use crate::types::MarketPhase;

/// Composite buy decision. True when the phase-dependent score threshold is
/// met after all gates pass.
pub fn analyze(snap: &Snapshot, phase: MarketPhase, cfg: &TradingConfig, now: DateTime<Tz>) -> bool {
    if !basic_eligibility(snap, cfg) {
        return false;
    }
    if !pre_filters(snap, cfg) {
        return false;
    }

    let momentum = momentum_score(snap, phase);
    if momentum < cfg.min_momentum(phase) {
        debug!(
            code = %snap.code,
            momentum,
            floor = cfg.min_momentum(phase),
            "momentum below phase floor"
        );
        return false;
    }

    let mut total = momentum;
    total += divergence_score(snap, phase);
    total += time_sensitivity_score(snap, phase, now);
    total += orderbook_strength_score(snap);
    total += contract_balance_score(snap);
    total += volume_quality_score(snap, phase);
    total += buy_ratio_bonus(snap, phase, cfg);
    total += pattern_bonus(snap, phase, cfg);
    let total = total.min(100);

    let required = cfg.buy_score_threshold(phase);
    let signal = total >= required;
    debug!(code = %snap.code, total, required, phase = %phase, signal, "buy analysis");
    signal
}

// =============================================================================
// Gates
// =============================================================================

/// Immediate disqualifiers: halt, VI, missing price, stale realtime data,
/// crash in progress, or an illiquid book.
fn basic_eligibility(snap: &Snapshot, cfg: &TradingConfig) -> bool {
    if snap.trading_halt || snap.vi_active {
        debug!(code = %snap.code, halt = snap.trading_halt, vi = snap.vi_active, "excluded");
        return false;
    }
    if snap.current_price <= 0.0 {
        return false;
    }

    // Require at least N of the three realtime data kinds before trusting
    // any score built on them.
    let has_orderbook = snap.total_ask_qty > 0 && snap.total_bid_qty > 0;
    let has_volume = snap.volume_turnover_rate > 0.0;
    let has_contracts = snap.buy_contract_count > 0 || snap.sell_contract_count > 0;
    let kinds = has_orderbook as u32 + has_volume as u32 + has_contracts as u32;
    if kinds < cfg.trading_strategy.min_realtime_data_types {
        debug!(code = %snap.code, kinds, "insufficient realtime data");
        return false;
    }

    if effective_change_rate(snap) <= -5.0 {
        return false;
    }

    if has_orderbook {
        if let Some(spread) = snap.spread_rate() {
            if spread > cfg.trading_strategy.max_spread_threshold {
                debug!(code = %snap.code, spread, "spread too wide");
                return false;
            }
        }
    }

    true
}

/// Cheap threshold filters ahead of the scoring pipeline.
fn pre_filters(snap: &Snapshot, cfg: &TradingConfig) -> bool {
    let p = &cfg.performance;

    if snap.total_ask_qty > 0 {
        let bid_ask_ratio = snap.total_bid_qty as f64 / snap.total_ask_qty as f64;
        if bid_ask_ratio < p.min_bid_ask_ratio_for_buy {
            return false;
        }
    }
    if snap.buy_ratio < p.min_buy_ratio_for_buy {
        return false;
    }
    if snap.contract_strength < p.min_contract_strength_for_buy {
        return false;
    }
    if effective_change_rate(snap) >= p.max_price_change_rate_for_buy {
        return false;
    }
    if snap.liquidity_score < p.min_liquidity_score_for_buy {
        return false;
    }
    true
}

fn effective_change_rate(snap: &Snapshot) -> f64 {
    if snap.price_change_rate != 0.0 {
        snap.price_change_rate
    } else if snap.yesterday_close > 0.0 {
        (snap.current_price - snap.yesterday_close) / snap.yesterday_close * 100.0
    } else {
        0.0
    }
}

// =============================================================================
// Components
// =============================================================================

/// Momentum 0–40: price change + volume spike + contract strength, with a
/// small phase multiplier.
pub fn momentum_score(snap: &Snapshot, phase: MarketPhase) -> i32 {
    let mut score = 0i32;

    let change = effective_change_rate(snap);
    score += if change >= 3.0 {
        15
    } else if change >= 2.0 {
        12
    } else if change >= 1.0 {
        8
    } else if change >= 0.5 {
        5
    } else if change >= 0.0 {
        2
    } else {
        0
    };

    let spike = snap.volume_spike_ratio;
    score += if spike >= 5.0 {
        15
    } else if spike >= 3.0 {
        12
    } else if spike >= 2.0 {
        8
    } else if spike >= 1.5 {
        5
    } else if spike >= 1.2 {
        2
    } else {
        0
    };

    let strength = snap.contract_strength;
    score += if strength >= 150.0 {
        10
    } else if strength >= 130.0 {
        8
    } else if strength >= 110.0 {
        5
    } else if strength >= 100.0 {
        3
    } else if strength >= 90.0 {
        1
    } else {
        0
    };

    let adjusted = match phase {
        MarketPhase::Opening => (score as f64 * 1.1) as i32,
        MarketPhase::PreClose => (score as f64 * 0.9) as i32,
        _ => score,
    };
    adjusted.min(40)
}

/// Divergence from SMA20 plus position in today's range, 0–25.
pub fn divergence_score(snap: &Snapshot, phase: MarketPhase) -> i32 {
    if snap.current_price <= 0.0 || snap.sma_20 <= 0.0 {
        return 12; // neutral when reference data is missing
    }
    let div = (snap.current_price - snap.sma_20) / snap.sma_20 * 100.0;
    let daily_pos = snap.daily_range_position();

    let base = if div <= -5.0 {
        18
    } else if div <= -3.0 {
        15
    } else if div <= -1.5 {
        12
    } else if div <= 0.0 {
        10
    } else if div <= 1.5 {
        7
    } else if div <= 3.0 {
        5
    } else if div <= 5.0 {
        2
    } else {
        0
    };

    let position_bonus = if daily_pos <= 15.0 {
        5
    } else if daily_pos <= 30.0 {
        3
    } else if daily_pos <= 50.0 {
        1
    } else if daily_pos >= 85.0 {
        -3
    } else if daily_pos >= 70.0 {
        -1
    } else {
        0
    };

    let phase_adjust = match phase {
        MarketPhase::Opening if div <= -2.0 => 2,
        MarketPhase::PreClose if div >= 2.0 => -2,
        _ => 0,
    };

    (base + position_bonus + phase_adjust).clamp(0, 25)
}

/// Phase, minute-of-hour, and recent activity, 0–15.
pub fn time_sensitivity_score(snap: &Snapshot, phase: MarketPhase, now: DateTime<Tz>) -> i32 {
    let mut score = match phase {
        MarketPhase::Opening => 6,
        MarketPhase::Active => 8,
        MarketPhase::PreClose => 3,
        MarketPhase::Closing => 1,
        _ => 0,
    };

    let minute = now.minute();
    match phase {
        MarketPhase::Opening => {
            // The first ten minutes carry the day's strongest follow-through.
            if minute <= 10 {
                score += 4;
            } else if minute <= 20 {
                score += 2;
            } else if minute <= 30 {
                score += 1;
            }
        }
        MarketPhase::Active => {
            if matches!(minute, 0 | 15 | 30 | 45) {
                score += 3;
            } else if minute >= 55 || minute < 5 {
                score += 2;
            }
        }
        _ => {}
    }

    score += if snap.volume_spike_ratio >= 3.0 {
        3
    } else if snap.volume_spike_ratio >= 2.0 {
        2
    } else if snap.volume_spike_ratio >= 1.5 {
        1
    } else if snap.avg_daily_volume == 0 {
        1
    } else {
        0
    };

    score.min(15)
}

/// Bid/ask imbalance, 0–10.
pub fn orderbook_strength_score(snap: &Snapshot) -> i32 {
    if snap.total_ask_qty == 0 || snap.total_bid_qty == 0 {
        return 0;
    }
    let ratio = snap.total_bid_qty as f64 / snap.total_ask_qty as f64;
    if ratio >= 2.0 {
        10
    } else if ratio >= 1.5 {
        8
    } else if ratio >= 1.2 {
        6
    } else if ratio >= 1.0 {
        4
    } else if ratio >= 0.8 {
        2
    } else {
        0
    }
}

/// Buy-versus-sell contract counts, 0–8.
pub fn contract_balance_score(snap: &Snapshot) -> i32 {
    let total = snap.buy_contract_count + snap.sell_contract_count;
    if total == 0 {
        return 0;
    }
    let buy_share = snap.buy_contract_count as f64 / total as f64 * 100.0;
    if buy_share >= 70.0 {
        8
    } else if buy_share >= 60.0 {
        6
    } else if buy_share >= 55.0 {
        4
    } else if buy_share >= 45.0 {
        2
    } else {
        0
    }
}

/// Turnover + prior-day same-time comparison, 0–7.
pub fn volume_quality_score(snap: &Snapshot, phase: MarketPhase) -> i32 {
    if snap.volume_turnover_rate <= 0.0 {
        return 0;
    }
    let mut score = if snap.volume_turnover_rate >= 2.0 {
        4
    } else if snap.volume_turnover_rate >= 1.0 {
        3
    } else if snap.volume_turnover_rate >= 0.5 {
        2
    } else if snap.volume_turnover_rate >= 0.2 {
        1
    } else {
        0
    };

    if snap.prev_same_time_volume_rate > 0.0 {
        score += if snap.prev_same_time_volume_rate >= 200.0 {
            3
        } else if snap.prev_same_time_volume_rate >= 150.0 {
            2
        } else if snap.prev_same_time_volume_rate >= 120.0 {
            1
        } else {
            0
        };
    }

    if phase == MarketPhase::Opening && score >= 5 {
        score = (score + 1).min(7);
    }
    score.min(7)
}

/// Buy-ratio achievement against the phase floor, 0–10.
pub fn buy_ratio_bonus(snap: &Snapshot, phase: MarketPhase, cfg: &TradingConfig) -> i32 {
    let floor = cfg.buy_ratio_floor(phase);
    if snap.buy_ratio >= floor {
        (((snap.buy_ratio - floor) / 10.0) as i32 + 7).min(10)
    } else if snap.buy_ratio >= floor * 0.8 {
        5
    } else {
        0
    }
}

/// Pattern-score achievement against the phase floor, 0–10.
pub fn pattern_bonus(snap: &Snapshot, phase: MarketPhase, cfg: &TradingConfig) -> i32 {
    let floor = cfg.pattern_score_floor(phase);
    if snap.pattern_score >= floor {
        (((snap.pattern_score - floor) / 10.0) as i32 + 7).min(10)
    } else if snap.pattern_score >= floor * 0.8 {
        5
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_kst, MarketPressure, TradingStatus};

    /// The §8 happy-path tick: 005930 at 09:12, strong momentum everywhere.
    fn hot_snapshot() -> Snapshot {
        Snapshot {
            code: "005930".into(),
            name: "삼성전자".into(),
            current_price: 75_300.0,
            bid_price: 75_290.0,
            ask_price: 75_310.0,
            bid_prices: [0.0; 5],
            ask_prices: [0.0; 5],
            today_volume: 1_920_000,
            today_high: 75_400.0,
            today_low: 74_600.0,
            price_change_rate: 2.1,
            volume_spike_ratio: 1.6,
            volatility: 1.1,
            contract_strength: 128.0,
            buy_ratio: 62.0,
            market_pressure: MarketPressure::Buy,
            sell_contract_count: 800,
            buy_contract_count: 1_900,
            total_ask_qty: 40_000,
            total_bid_qty: 85_000,
            volume_turnover_rate: 2.2,
            prev_same_time_volume_rate: 210.0,
            trading_halt: false,
            vi_active: false,
            vi_standard_price: 0.0,
            last_updated: now_kst(),
            yesterday_close: 73_750.0,
            sma_20: 76_900.0,
            pattern_score: 78.5,
            avg_daily_volume: 1_200_000,
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
            liquidity_score: 6.0,
            snapshot_time: now_kst(),
        }
    }

    fn cfg() -> TradingConfig {
        TradingConfig::default()
    }

    #[test]
    fn strong_momentum_symbol_signals_buy() {
        let snap = hot_snapshot();
        assert!(analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));
    }

    #[test]
    fn trading_halt_and_vi_block_entry() {
        let mut snap = hot_snapshot();
        snap.trading_halt = true;
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));

        let mut snap = hot_snapshot();
        snap.trading_halt = false;
        snap.vi_active = true;
        snap.vi_standard_price = 74_000.0;
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));
    }

    #[test]
    fn crash_in_progress_blocks_entry() {
        let mut snap = hot_snapshot();
        snap.price_change_rate = -5.5;
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));
    }

    #[test]
    fn insufficient_realtime_data_blocks_entry() {
        let mut snap = hot_snapshot();
        snap.total_ask_qty = 0;
        snap.total_bid_qty = 0;
        snap.volume_turnover_rate = 0.0;
        // Only contract data remains → 1 of 3 kinds.
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));
    }

    #[test]
    fn wide_spread_blocks_entry() {
        let mut snap = hot_snapshot();
        snap.bid_price = 70_000.0;
        snap.ask_price = 75_000.0; // > 5% spread
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));
    }

    #[test]
    fn pre_filters_enforce_floors() {
        let mut snap = hot_snapshot();
        snap.contract_strength = 95.0; // below min_contract_strength_for_buy
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));

        let mut snap = hot_snapshot();
        snap.buy_ratio = 40.0;
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));

        let mut snap = hot_snapshot();
        snap.price_change_rate = 9.5; // chasing a near-limit move
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));
    }

    #[test]
    fn momentum_floor_rejects_quiet_tape() {
        let mut snap = hot_snapshot();
        snap.price_change_rate = 0.1;
        snap.volume_spike_ratio = 1.0;
        snap.contract_strength = 100.0;
        // Momentum = 2 + 0 + 3 = 5, below every phase floor.
        assert!(momentum_score(&snap, MarketPhase::Active) < 15);
        assert!(!analyze(&snap, MarketPhase::Active, &cfg(), now_kst()));
    }

    #[test]
    fn momentum_tiers_and_phase_multiplier() {
        let snap = hot_snapshot();
        // change 2.1 → 12, spike 1.6 → 5, strength 128 → 5 ⇒ 22.
        assert_eq!(momentum_score(&snap, MarketPhase::Active), 22);
        // Opening multiplies by 1.1 → 24.
        assert_eq!(momentum_score(&snap, MarketPhase::Opening), 24);
        // Pre-close dampens → 19.
        assert_eq!(momentum_score(&snap, MarketPhase::PreClose), 19);
    }

    #[test]
    fn divergence_prefers_oversold_low_in_range() {
        let mut snap = hot_snapshot();
        snap.sma_20 = 79_300.0; // ≈ −5% divergence
        snap.current_price = 74_650.0;
        snap.today_low = 74_600.0;
        snap.today_high = 75_400.0;
        let score = divergence_score(&snap, MarketPhase::Active);
        assert!(score >= 20, "score = {score}");

        // Overheated far above the average scores at the bottom.
        snap.sma_20 = 70_000.0;
        snap.current_price = 75_300.0;
        assert!(divergence_score(&snap, MarketPhase::Active) <= 5);
    }

    #[test]
    fn component_ranges_are_bounded() {
        let snap = hot_snapshot();
        for phase in [MarketPhase::Opening, MarketPhase::Active, MarketPhase::PreClose] {
            assert!(momentum_score(&snap, phase) <= 40);
            assert!((0..=25).contains(&divergence_score(&snap, phase)));
            assert!((0..=15).contains(&time_sensitivity_score(&snap, phase, now_kst())));
            assert!((0..=7).contains(&volume_quality_score(&snap, phase)));
        }
        assert!((0..=10).contains(&orderbook_strength_score(&snap)));
        assert!((0..=8).contains(&contract_balance_score(&snap)));
    }

    #[test]
    fn bonuses_track_floors() {
        let c = cfg();
        let mut snap = hot_snapshot();
        snap.buy_ratio = 75.0;
        assert!(buy_ratio_bonus(&snap, MarketPhase::Active, &c) >= 7);
        snap.buy_ratio = 50.0; // ≥ 0.8 × 60
        assert_eq!(buy_ratio_bonus(&snap, MarketPhase::Active, &c), 5);
        snap.buy_ratio = 10.0;
        assert_eq!(buy_ratio_bonus(&snap, MarketPhase::Active, &c), 0);

        snap.pattern_score = 90.0;
        assert!(pattern_bonus(&snap, MarketPhase::Active, &c) >= 7);
        snap.pattern_score = 30.0;
        assert_eq!(pattern_bonus(&snap, MarketPhase::Active, &c), 0);
    }
}
