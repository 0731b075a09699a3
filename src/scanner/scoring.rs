// =============================================================================
// Pre-open composite scoring — fundamentals, divergence, overnight session
// =============================================================================

use serde::{Deserialize, Serialize};

use super::indicators::{divergence_rate, sma, Fundamentals};
use super::patterns::PatternAnalysis;
use crate::stock::DailyBar;

/// Divergence verdict from the SMA(5,10,20) trio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DivergenceVerdict {
    Buy,
    Momentum,
    Overheated,
    Hold,
}

#[derive(Debug, Clone, Serialize)]
pub struct DivergenceSignal {
    pub verdict: DivergenceVerdict,
    pub score: f64,
    pub sma_5_div: f64,
    pub sma_10_div: f64,
    pub sma_20_div: f64,
}

/// Classify the latest close against its short moving averages.
pub fn divergence_signal(bars: &[DailyBar]) -> Option<DivergenceSignal> {
    if bars.len() < 20 {
        return None;
    }
    let price = bars[0].close;
    if price <= 0.0 {
        return None;
    }
    let sma_5_div = divergence_rate(price, sma(bars, 5));
    let sma_10_div = divergence_rate(price, sma(bars, 10));
    let sma_20_div = divergence_rate(price, sma(bars, 20));

    let (verdict, score) = if sma_20_div <= -5.0 || (sma_10_div <= -3.0 && sma_5_div <= -2.0) {
        let depth = sma_20_div.min(sma_10_div).min(sma_5_div).abs();
        (DivergenceVerdict::Buy, 15.0 + depth * 0.5)
    } else if (1.0..=3.0).contains(&sma_5_div)
        && (0.0..=2.0).contains(&sma_10_div)
        && (-1.0..=1.0).contains(&sma_20_div)
    {
        (DivergenceVerdict::Momentum, 10.0)
    } else if sma_20_div >= 10.0 || sma_10_div >= 7.0 || sma_5_div >= 5.0 {
        (DivergenceVerdict::Overheated, -5.0)
    } else {
        (DivergenceVerdict::Hold, 0.0)
    };

    Some(DivergenceSignal {
        verdict,
        score,
        sma_5_div,
        sma_10_div,
        sma_20_div,
    })
}

/// Overnight single-price contribution to the pre-open score.
#[derive(Debug, Clone, Default)]
pub struct PreopenInput {
    pub price: f64,
    pub volume: u64,
    pub trading_halt: bool,
    pub yesterday_close: f64,
}

/// Outcome of pre-open gating: either a score contribution or a hard reject.
#[derive(Debug, Clone, PartialEq)]
pub enum PreopenOutcome {
    Score { gap_rate: f64, score: f64 },
    Reject(&'static str),
    /// No overnight data; neutral.
    Unavailable,
}

/// Gap/value scoring of the overnight session. `min_pre_value` is the floor
/// for the overnight trading value, `avg_daily_trading_value` rescues thinly
/// traded overnight books.
pub fn preopen_score(
    input: &PreopenInput,
    min_pre_value: f64,
    avg_daily_trading_value: f64,
) -> PreopenOutcome {
    if input.price <= 0.0 {
        return PreopenOutcome::Unavailable;
    }
    if input.trading_halt {
        return PreopenOutcome::Reject("trading_halt");
    }

    let trading_value = input.price * input.volume as f64;

    let value_score = if trading_value < 10_000_000.0 {
        // Thin overnight book: fall back to the regular-session average.
        if avg_daily_trading_value >= min_pre_value * 2.0 {
            if avg_daily_trading_value >= 1_000_000_000.0 {
                3.0
            } else if avg_daily_trading_value >= 500_000_000.0 {
                1.0
            } else {
                0.0
            }
        } else {
            return PreopenOutcome::Reject("insufficient_trading_value");
        }
    } else if trading_value < min_pre_value {
        return PreopenOutcome::Reject("insufficient_trading_value");
    } else if trading_value >= 500_000_000.0 {
        10.0
    } else if trading_value >= 100_000_000.0 {
        5.0
    } else if trading_value >= 50_000_000.0 {
        0.0
    } else {
        -5.0
    };

    let gap_rate = if input.yesterday_close > 0.0 {
        (input.price - input.yesterday_close) / input.yesterday_close * 100.0
    } else {
        0.0
    };
    let gap_score = if gap_rate >= 5.0 {
        10.0
    } else if gap_rate >= 3.0 {
        7.0
    } else if gap_rate >= 1.0 {
        4.0
    } else if gap_rate <= -3.0 {
        -5.0
    } else if gap_rate <= -1.0 {
        -2.0
    } else {
        0.0
    };

    PreopenOutcome::Score {
        gap_rate,
        score: gap_score + value_score,
    }
}

/// Weights of the composite day-trading score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayTradingWeights {
    pub volume: f64,
    pub momentum: f64,
    pub technical: f64,
    pub pattern: f64,
    pub divergence: f64,
    pub preopen: f64,
    pub liquidity: f64,
}

impl Default for DayTradingWeights {
    fn default() -> Self {
        Self {
            volume: 1.0,
            momentum: 1.0,
            technical: 1.0,
            pattern: 1.0,
            divergence: 1.0,
            preopen: 1.0,
            liquidity: 1.0,
        }
    }
}

/// Weighted composite of all pre-open components, capped at 100.
pub fn composite_score(
    fundamentals: &Fundamentals,
    patterns: &PatternAnalysis,
    divergence: Option<&DivergenceSignal>,
    preopen: &PreopenOutcome,
    liquidity_score: f64,
    weights: &DayTradingWeights,
) -> f64 {
    // Volume build-up (0–20).
    let volume_score = if fundamentals.volume_increase_rate >= 3.0 {
        20.0
    } else if fundamentals.volume_increase_rate >= 2.0 {
        15.0
    } else if fundamentals.volume_increase_rate >= 1.5 {
        10.0
    } else if fundamentals.volume_increase_rate >= 1.2 {
        5.0
    } else {
        0.0
    };

    // Price momentum into the close (0–15).
    let change_pct = fundamentals.price_change_rate * 100.0;
    let momentum_score = if change_pct >= 5.0 {
        15.0
    } else if change_pct >= 3.0 {
        12.0
    } else if change_pct >= 1.0 {
        8.0
    } else if change_pct >= 0.0 {
        4.0
    } else if change_pct >= -2.0 {
        1.0
    } else {
        0.0
    };

    // Technical positioning (0–20): RSI band, MACD cross, MA alignment.
    let mut technical_score = 0.0;
    if (30.0..=70.0).contains(&fundamentals.rsi) {
        technical_score += 6.0;
    } else if fundamentals.rsi < 30.0 {
        technical_score += 8.0; // oversold bounce setup
    }
    if fundamentals.macd_hist > 0.0 {
        technical_score += 6.0;
    }
    if fundamentals.ma_alignment {
        technical_score += 6.0;
    }

    let divergence_score = divergence.map(|d| d.score).unwrap_or(0.0);
    let preopen_score = match preopen {
        PreopenOutcome::Score { score, .. } => *score,
        _ => 0.0,
    };

    let total = volume_score * weights.volume
        + momentum_score * weights.momentum
        + technical_score * weights.technical
        + patterns.pattern_score * weights.pattern
        + divergence_score * weights.divergence
        + preopen_score * weights.preopen
        + liquidity_score * weights.liquidity;

    total.clamp(0.0, 100.0)
}
