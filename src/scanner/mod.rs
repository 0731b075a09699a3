// =============================================================================
// Market Scanner — pre-open universe ranking + intraday rank-endpoint scan
// =============================================================================

pub mod advanced;
pub mod indicators;
pub mod patterns;
pub mod scoring;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Timelike;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::broker::client::{KisClient, PriceQuote, RankRow};
use crate::config::ConfigRegistry;
use crate::db::{IntradayScanRow, PreMarketScanRow, TradeDatabase};
use crate::stock::{DailyBar, IntradaySeed, ReferenceData, StockStore};
use crate::symbols::SymbolDirectory;
use crate::types::{now_kst, TradingStatus};
use crate::ws::WsGateway;

use indicators::Fundamentals;
use patterns::PatternAnalysis;
use scoring::{DayTradingWeights, DivergenceSignal, PreopenInput, PreopenOutcome};

/// A symbol the intraday scan proposes for addition.
#[derive(Debug, Clone)]
pub struct IntradayCandidate {
    pub code: String,
    pub name: String,
    pub score: f64,
    pub reasons: String,
    pub trading_value: f64,
    pub change_rate: f64,
}

/// Everything the pre-open evaluation learned about one symbol.
pub struct SymbolEvaluation {
    pub score: f64,
    pub day0: DailyBar,
    pub reference: ReferenceData,
    pub fundamentals: Fundamentals,
    pub patterns: PatternAnalysis,
}

pub struct MarketScanner {
    store: Arc<StockStore>,
    client: Arc<KisClient>,
    symbols: Arc<SymbolDirectory>,
    config: Arc<ConfigRegistry>,
    gateway: Arc<WsGateway>,
    db: Option<Arc<TradeDatabase>>,
    weights: DayTradingWeights,
}

impl MarketScanner {
    pub fn new(
        store: Arc<StockStore>,
        client: Arc<KisClient>,
        symbols: Arc<SymbolDirectory>,
        config: Arc<ConfigRegistry>,
        gateway: Arc<WsGateway>,
        db: Option<Arc<TradeDatabase>>,
    ) -> Self {
        Self {
            store,
            client,
            symbols,
            config,
            gateway,
            db,
            weights: DayTradingWeights::default(),
        }
    }

    // =========================================================================
    // Pre-open scan
    // =========================================================================

    /// Clear the store, rank the filtered universe, register the top N, and
    /// request gateway subscriptions for them.
    pub async fn run_pre_market_scan(&self) -> bool {
        info!("pre-market scan starting");
        let cfg = self.config.current();
        self.store.clear_all();

        let threshold = cfg.trading_strategy.opening_pattern_score_threshold;
        let mut scored: Vec<(String, SymbolEvaluation)> = Vec::new();

        for code in self.symbols.universe() {
            match self.evaluate_symbol(code).await {
                Ok(Some(eval)) if eval.score >= threshold => {
                    debug!(code, score = eval.score, "pre-open candidate");
                    scored.push((code.clone(), eval));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(code, error = %e, "symbol evaluation failed");
                }
            }
        }

        scored.sort_by(|a, b| b.1.score.partial_cmp(&a.1.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(cfg.performance.max_premarket_selected_stocks);

        if scored.is_empty() {
            warn!("pre-market scan produced no candidates");
            return false;
        }

        let mut registered = 0usize;
        for (rank, (code, eval)) in scored.into_iter().enumerate() {
            let name = self.symbols.name_of(&code).unwrap_or("").to_string();
            info!(rank = rank + 1, code = %code, name = %name, score = eval.score, "selected");

            if !self.store.add_selected_stock(&code, &name, &eval.day0, eval.score, Some(eval.reference.clone())) {
                continue;
            }
            registered += 1;

            if let Some(db) = &self.db {
                let row = PreMarketScanRow {
                    stock_code: code.clone(),
                    stock_name: name.clone(),
                    selection_score: eval.score,
                    selection_criteria: json!({
                        "scan_type": "pre_market",
                        "comprehensive_score": eval.score,
                        "volume_increase_rate": eval.fundamentals.volume_increase_rate,
                    }),
                    pattern_score: eval.patterns.pattern_score,
                    pattern_names: eval.patterns.detected.clone(),
                    rsi: eval.fundamentals.rsi,
                    macd: eval.fundamentals.macd,
                    sma_20: eval.fundamentals.sma_20,
                    yesterday_close: eval.reference.yesterday_close,
                    yesterday_volume: eval.reference.yesterday_volume,
                    market_cap: 0.0,
                };
                if let Err(e) = db.save_pre_market_scan(&row) {
                    error!(code, error = %e, "pre-market scan persist failed");
                }
            }

            if !self.gateway.subscribe(&code).await {
                warn!(code = %code, "pre-market subscription failed");
            }
        }

        info!(registered, "pre-market scan complete");
        registered > 0
    }

    /// Pullback-pattern variant of the pre-open scan, selected by
    /// `use_advanced_scanner`. Same contract as `run_pre_market_scan`.
    pub async fn run_advanced_pre_market_scan(&self) -> bool {
        info!("advanced pre-market scan starting (pullback variant)");
        let cfg = self.config.current();
        self.store.clear_all();

        let threshold = cfg.trading_strategy.opening_pattern_score_threshold;
        let mut scored: Vec<(String, f64, DailyBar, ReferenceData)> = Vec::new();

        for code in self.symbols.universe() {
            let bars = match self.client.daily_bars(code, 200).await {
                Ok(bars) if bars.len() >= 20 => bars,
                Ok(_) => continue,
                Err(e) => {
                    debug!(code, error = %e, "daily bars unavailable");
                    continue;
                }
            };
            let fundamentals = match indicators::fundamentals(&bars) {
                Some(f) => f,
                None => continue,
            };
            if fundamentals.avg_daily_trading_value < cfg.performance.min_trading_value {
                continue;
            }
            let analysis = match advanced::analyze(&bars) {
                Some(a) if a.total >= threshold => a,
                _ => continue,
            };

            let day0 = bars[0].clone();
            let reference = ReferenceData {
                yesterday_close: day0.close,
                yesterday_volume: day0.volume,
                yesterday_high: day0.high,
                yesterday_low: day0.low,
                sma_20: fundamentals.sma_20,
                rsi: fundamentals.rsi,
                macd: fundamentals.macd,
                macd_signal: fundamentals.macd_signal,
                bb_upper: fundamentals.bb_upper,
                bb_middle: fundamentals.bb_middle,
                bb_lower: fundamentals.bb_lower,
                pattern_score: analysis.total,
                pattern_names: vec!["pullback".to_string()],
                avg_daily_volume: fundamentals.avg_daily_volume,
                avg_trading_value: fundamentals.avg_daily_trading_value,
            };
            scored.push((code.clone(), analysis.total, day0, reference));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(cfg.performance.max_premarket_selected_stocks);

        let mut registered = 0usize;
        for (code, score, day0, reference) in scored {
            let name = self.symbols.name_of(&code).unwrap_or("").to_string();
            if self.store.add_selected_stock(&code, &name, &day0, score, Some(reference)) {
                registered += 1;
                if !self.gateway.subscribe(&code).await {
                    warn!(code = %code, "advanced-scan subscription failed");
                }
            }
        }
        info!(registered, "advanced pre-market scan complete");
        registered > 0
    }

    /// KOSPI daily-range proxy: the average of (high − low)/close over the
    /// last five index bars, in percent. Feeds the executor's dynamic rates.
    pub async fn market_volatility(&self) -> f64 {
        match self.client.daily_bars("0001", 5).await {
            Ok(bars) if !bars.is_empty() => {
                let ranges: Vec<f64> = bars
                    .iter()
                    .filter(|b| b.close > 0.0)
                    .map(|b| (b.high - b.low) / b.close * 100.0)
                    .collect();
                if ranges.is_empty() {
                    1.0
                } else {
                    ranges.iter().sum::<f64>() / ranges.len() as f64
                }
            }
            Ok(_) => 1.0,
            Err(e) => {
                debug!(error = %e, "index bars unavailable, neutral volatility");
                1.0
            }
        }
    }

    /// Fetch bars + the overnight session and compute the composite score.
    /// Liquidity gate and hard rejects return Ok(None).
    async fn evaluate_symbol(&self, code: &str) -> Result<Option<SymbolEvaluation>> {
        let cfg = self.config.current();
        let bars = self.client.daily_bars(code, 30).await?;
        if bars.len() < 20 {
            return Ok(None);
        }

        let fundamentals = match indicators::fundamentals(&bars) {
            Some(f) => f,
            None => return Ok(None),
        };

        // Liquidity gate on the regular session.
        if fundamentals.avg_daily_trading_value < cfg.performance.min_trading_value {
            return Ok(None);
        }

        let patterns = match patterns::analyze(&bars) {
            Some(p) => p,
            None => return Ok(None),
        };
        let divergence: Option<DivergenceSignal> = scoring::divergence_signal(&bars);

        let preopen = match self.client.overtime_price(code).await {
            Ok(ot) => scoring::preopen_score(
                &PreopenInput {
                    price: ot.price,
                    volume: ot.volume,
                    trading_halt: ot.trading_halt,
                    yesterday_close: bars[0].close,
                },
                cfg.performance.preopen_min_trading_value,
                fundamentals.avg_daily_trading_value,
            ),
            Err(e) => {
                debug!(code, error = %e, "overtime price unavailable");
                PreopenOutcome::Unavailable
            }
        };
        if matches!(preopen, PreopenOutcome::Reject(_)) {
            return Ok(None);
        }

        let liquidity = self.store.liquidity_score(code);
        let score = scoring::composite_score(
            &fundamentals,
            &patterns,
            divergence.as_ref(),
            &preopen,
            liquidity,
            &self.weights,
        );

        let day0 = bars[0].clone();
        let reference = ReferenceData {
            yesterday_close: day0.close,
            yesterday_volume: day0.volume,
            yesterday_high: day0.high,
            yesterday_low: day0.low,
            sma_20: fundamentals.sma_20,
            rsi: fundamentals.rsi,
            macd: fundamentals.macd,
            macd_signal: fundamentals.macd_signal,
            bb_upper: fundamentals.bb_upper,
            bb_middle: fundamentals.bb_middle,
            bb_lower: fundamentals.bb_lower,
            pattern_score: score,
            pattern_names: patterns.detected.clone(),
            avg_daily_volume: fundamentals.avg_daily_volume,
            avg_trading_value: fundamentals.avg_daily_trading_value,
        };

        Ok(Some(SymbolEvaluation {
            score,
            day0,
            reference,
            fundamentals,
            patterns,
        }))
    }

    // =========================================================================
    // Intraday scan
    // =========================================================================

    /// Rank-endpoint scan for additional symbols. Produces candidates in
    /// descending score order; the monitor decides inclusion.
    pub async fn intraday_scan_additional_stocks(&self, max_stocks: usize) -> Vec<IntradayCandidate> {
        let cfg = self.config.current();
        info!(max_stocks, "intraday scan starting");

        let disparity = self.client.disparity_rank().await.unwrap_or_else(|e| {
            warn!(error = %e, "disparity rank unavailable");
            Vec::new()
        });
        let fluctuation = self.client.fluctuation_rank().await.unwrap_or_else(|e| {
            warn!(error = %e, "fluctuation rank unavailable");
            Vec::new()
        });
        let volume = self.client.volume_rank().await.unwrap_or_else(|e| {
            warn!(error = %e, "volume rank unavailable");
            Vec::new()
        });
        let bulk = self.client.bulk_trans_rank().await.unwrap_or_else(|e| {
            warn!(error = %e, "bulk-trans rank unavailable");
            Vec::new()
        });

        let managed: Vec<String> = self.store.codes();
        let mut merged = merge_rank_candidates(
            &disparity,
            &fluctuation,
            &volume,
            &bulk,
            cfg.performance.intraday_rank_head_limit,
            |code| {
                if !self.symbols.contains(code) {
                    return false;
                }
                if managed.iter().any(|c| c.as_str() == code) {
                    // A symbol already sold today may be re-included.
                    return cfg.performance.intraday_reinclude_sold
                        && self.store.status_of(code) == Some(TradingStatus::Sold);
                }
                true
            },
        );

        // Micro-structure enrichment for candidates above the base floor.
        for (code, acc) in merged.iter_mut() {
            if acc.score < 8.0 {
                continue;
            }
            match self.client.inquire_price(code).await {
                Ok(quote) => {
                    let (ob_score, ob_reason) = orderbook_micro_score(&quote);
                    acc.score += ob_score;
                    if !ob_reason.is_empty() {
                        acc.reasons.push(ob_reason);
                    }
                }
                Err(e) => debug!(code, error = %e, "orderbook micro-analysis unavailable"),
            }
            let now = now_kst();
            let (t_score, t_reason) = timing_score(now.hour(), now.minute());
            acc.score += t_score;
            if !t_reason.is_empty() {
                acc.reasons.push(t_reason.to_string());
            }
            acc.score += self.store.liquidity_score(code) * cfg.performance.liquidity_weight;
        }

        // Final filters: relaxed trading value (50%) and relaxed score (60%).
        let min_value = cfg.performance.intraday_min_trading_value * 0.5;
        let min_score = cfg.performance.intraday_min_total_score * 0.6;
        let mut finalists: Vec<IntradayCandidate> = merged
            .into_iter()
            .filter(|(_, acc)| !(acc.trading_value > 0.0 && acc.trading_value < min_value))
            .filter(|(_, acc)| acc.score >= min_score)
            .map(|(code, acc)| IntradayCandidate {
                name: self.symbols.name_of(&code).unwrap_or("").to_string(),
                code,
                score: acc.score,
                reasons: acc.reasons.join(", "),
                trading_value: acc.trading_value,
                change_rate: acc.change_rate,
            })
            .collect();

        finalists.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        finalists.truncate(max_stocks);

        info!(count = finalists.len(), "intraday scan complete");
        for (i, c) in finalists.iter().enumerate() {
            info!(rank = i + 1, code = %c.code, name = %c.name, score = c.score, reasons = %c.reasons, "intraday candidate");
        }
        finalists
    }

    /// Register one intraday candidate into the store and persist the scan
    /// row. Subscription is left to the caller's pending queue.
    pub async fn register_intraday_candidate(&self, candidate: &IntradayCandidate) -> bool {
        let quote = match self.client.inquire_price(&candidate.code).await {
            Ok(q) if q.current_price > 0.0 => q,
            Ok(_) => {
                warn!(code = %candidate.code, "intraday candidate has no price, skipping");
                return false;
            }
            Err(e) => {
                warn!(code = %candidate.code, error = %e, "intraday candidate quote failed");
                return false;
            }
        };

        let seed = IntradaySeed {
            yesterday_close: Some(quote.yesterday_close).filter(|v| *v > 0.0),
            volume: Some(quote.acc_volume),
            price_change_rate: Some(if quote.change_rate != 0.0 {
                quote.change_rate
            } else {
                candidate.change_rate
            }),
            ..IntradaySeed::default()
        };
        let added = self.store.add_intraday_stock(
            &candidate.code,
            &candidate.name,
            quote.current_price,
            candidate.score,
            &candidate.reasons,
            Some(seed),
        );
        if added {
            if let Some(db) = &self.db {
                let row = IntradayScanRow {
                    stock_code: candidate.code.clone(),
                    stock_name: candidate.name.clone(),
                    selection_score: candidate.score,
                    selection_criteria: json!({"scan_type": "intraday"}),
                    scan_reason: candidate.reasons.clone(),
                    current_price: quote.current_price,
                    volume_spike_ratio: 0.0,
                    price_change_rate: candidate.change_rate,
                    contract_strength: 0.0,
                    buy_ratio: 0.0,
                };
                if let Err(e) = db.save_intraday_scan(&row) {
                    error!(code = %candidate.code, error = %e, "intraday scan persist failed");
                }
            }
        }
        added
    }
}

// =============================================================================
// Pure helpers (testable without the broker)
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct RankCandidate {
    pub score: f64,
    pub reasons: Vec<String>,
    pub trading_value: f64,
    pub change_rate: f64,
}

/// Merge the four rank feeds into per-code candidates, applying the
/// per-endpoint thresholds.
pub fn merge_rank_candidates(
    disparity: &[RankRow],
    fluctuation: &[RankRow],
    volume: &[RankRow],
    bulk: &[RankRow],
    head_limit: usize,
    mut include: impl FnMut(&str) -> bool,
) -> HashMap<String, RankCandidate> {
    let mut out: HashMap<String, RankCandidate> = HashMap::new();

    let mut upsert = |row: &RankRow, score: f64, reason: String, out: &mut HashMap<String, RankCandidate>| {
        let entry = out.entry(row.code.clone()).or_default();
        entry.score += score;
        entry.reasons.push(reason);
        if row.trading_value > entry.trading_value {
            entry.trading_value = row.trading_value;
        }
        if row.change_rate != 0.0 {
            entry.change_rate = row.change_rate;
        }
    };

    // Oversold disparity: −1.5% or deeper, up to 15 points.
    for row in disparity.iter().take(head_limit) {
        if !include(&row.code) {
            continue;
        }
        if row.disparity_rate <= -1.5 {
            let score = (row.disparity_rate.abs() * 1.5).min(15.0);
            upsert(row, score, format!("oversold_disparity({:.1}%)", row.disparity_rate), &mut out);
        }
    }

    // Rising momentum: 0.2–10%, rate×2 capped at 12.
    for row in fluctuation.iter().take(head_limit) {
        if !include(&row.code) {
            continue;
        }
        if (0.2..=10.0).contains(&row.change_rate) {
            let score = (row.change_rate * 2.0).min(12.0);
            upsert(row, score, format!("rising_momentum({:.1}%)", row.change_rate), &mut out);
        }
    }

    // Volume surge: ≥150%, tiered 6/8/10.
    for row in volume.iter().take(head_limit) {
        if !include(&row.code) {
            continue;
        }
        if row.volume_increase_rate >= 150.0 {
            let score = if row.volume_increase_rate >= 400.0 {
                10.0
            } else if row.volume_increase_rate >= 250.0 {
                8.0
            } else {
                6.0
            };
            upsert(row, score, format!("volume_surge({:.0}%)", row.volume_increase_rate), &mut out);
        }
    }

    // Buy-side contract intensity: rank entry alone is worth a flat score.
    for row in bulk.iter().take(head_limit) {
        if !include(&row.code) {
            continue;
        }
        upsert(row, 6.0, "buy_intensity_rank".to_string(), &mut out);
    }

    out
}

/// Spread tiering plus bid/ask skew from a current-price quote.
pub fn orderbook_micro_score(quote: &PriceQuote) -> (f64, String) {
    let mut score = 0.0;
    let mut reasons: Vec<String> = Vec::new();

    if quote.ask_price1 > 0.0 && quote.bid_price1 > 0.0 {
        let spread_pct = (quote.ask_price1 - quote.bid_price1) / quote.bid_price1 * 100.0;
        if spread_pct <= 1.0 {
            score += 5.0;
            reasons.push(format!("tight_spread({spread_pct:.2}%)"));
        } else if spread_pct <= 2.0 {
            score += 3.0;
            reasons.push(format!("fair_spread({spread_pct:.2}%)"));
        } else if spread_pct <= 4.0 {
            score += 1.0;
            reasons.push(format!("wide_spread({spread_pct:.2}%)"));
        } else {
            return (0.0, format!("excessive_spread({spread_pct:.2}%)"));
        }
    }

    if quote.ask_qty1 > 0 && quote.bid_qty1 > 0 {
        let bid_share = quote.bid_qty1 as f64 / (quote.ask_qty1 + quote.bid_qty1) as f64;
        if bid_share >= 0.55 {
            score += 3.0;
            reasons.push(format!("bid_dominant({:.0}%)", bid_share * 100.0));
        } else if bid_share >= 0.35 {
            score += 1.0;
            reasons.push(format!("balanced_book({:.0}%)", bid_share * 100.0));
        } else {
            reasons.push(format!("ask_dominant({:.0}%)", bid_share * 100.0));
        }
    }

    (score, reasons.join("+"))
}

/// Time-of-day weight for intraday additions.
pub fn timing_score(hour: u32, minute: u32) -> (f64, &'static str) {
    match hour {
        9 if minute <= 30 => (5.0, "open_volatility"),
        9 => (3.0, "late_open"),
        10 => (6.0, "morning_stable"),
        11 => (4.0, "late_morning"),
        13 => (5.0, "post_lunch"),
        14 => (6.0, "afternoon_stable"),
        15 if minute <= 20 => (3.0, "near_close"),
        _ => (0.0, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(code: &str) -> RankRow {
        RankRow {
            code: code.into(),
            name: String::new(),
            trading_value: 5.0e9,
            ..RankRow::default()
        }
    }

    #[test]
    fn merge_applies_per_endpoint_thresholds() {
        let mut d = rank("051910");
        d.disparity_rate = -4.0;
        let mut f = rank("051910");
        f.change_rate = 3.0;
        let mut v = rank("005380");
        v.volume_increase_rate = 300.0;
        let mut shallow = rank("000660");
        shallow.disparity_rate = -0.5; // above the −1.5 threshold

        let merged = merge_rank_candidates(&[d, shallow], &[f], &[v], &[], 50, |_| true);
        assert_eq!(merged.len(), 2);

        let lg = &merged["051910"];
        // disparity 4.0*1.5=6.0, momentum 3.0*2=6.0.
        assert!((lg.score - 12.0).abs() < 1e-9);
        assert_eq!(lg.reasons.len(), 2);
        assert!((merged["005380"].score - 8.0).abs() < 1e-9);
        assert!(!merged.contains_key("000660"));
    }

    #[test]
    fn merge_respects_exclusion() {
        let mut d = rank("051910");
        d.disparity_rate = -4.0;
        let merged = merge_rank_candidates(&[d], &[], &[], &[], 50, |code| code != "051910");
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_caps_scores() {
        let mut d = rank("051910");
        d.disparity_rate = -50.0;
        let mut f = rank("051910");
        f.change_rate = 9.9;
        let merged = merge_rank_candidates(&[d], &[f], &[], &[], 50, |_| true);
        let c = &merged["051910"];
        // 15 (cap) + 12 (cap, 9.9*2 clamped)
        assert!((c.score - (15.0 + 12.0)).abs() < 1e-9);
    }

    #[test]
    fn orderbook_micro_score_tiers() {
        let mut quote = PriceQuote {
            ask_price1: 10_050.0,
            bid_price1: 10_000.0,
            ask_qty1: 1_000,
            bid_qty1: 2_000,
            ..PriceQuote::default()
        };
        // Spread 0.5% → 5, bid share 66% → 3.
        let (score, reason) = orderbook_micro_score(&quote);
        assert!((score - 8.0).abs() < 1e-9);
        assert!(reason.contains("tight_spread"));
        assert!(reason.contains("bid_dominant"));

        // Excessive spread zeroes everything out.
        quote.ask_price1 = 11_000.0;
        let (score, reason) = orderbook_micro_score(&quote);
        assert_eq!(score, 0.0);
        assert!(reason.contains("excessive_spread"));
    }

    #[test]
    fn timing_scores_by_session_hour() {
        assert_eq!(timing_score(9, 15).0, 5.0);
        assert_eq!(timing_score(9, 45).0, 3.0);
        assert_eq!(timing_score(10, 0).0, 6.0);
        assert_eq!(timing_score(12, 30).0, 0.0);
        assert_eq!(timing_score(14, 10).0, 6.0);
        assert_eq!(timing_score(16, 0).0, 0.0);
    }
}
