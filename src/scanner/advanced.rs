// =============================================================================
// Advanced pre-market scanner — pullback pattern variant
// =============================================================================
//
// An optional replacement for the composite pre-open ranking. Symbols are
// scored on three axes over their daily bars:
//   * volume-Bollinger: where today's volume sits against its 20-day bands,
//   * envelope(10,10) position with 200-day-high context,
//   * pullback structure: midpoint support, uptrend dominance, and volume
//     drying up through the pullback.
// The output normalizes into the same (code, score) tuples as the default
// scanner.
// =============================================================================

use crate::stock::DailyBar;

use super::indicators::sma;

/// Per-axis breakdown of one symbol's pullback analysis.
#[derive(Debug, Clone, Default)]
pub struct PullbackAnalysis {
    pub volume_band_score: f64,
    pub envelope_score: f64,
    pub pullback_score: f64,
    /// 0–100 composite.
    pub total: f64,
}

/// Volume against its 20-day Bollinger bands (0–30).
///
/// Expanding volume above the upper band reads as accumulation; volume dead
/// on the lower band reads as exhaustion and scores nothing.
pub fn volume_band_score(bars: &[DailyBar]) -> f64 {
    if bars.len() < 20 {
        return 0.0;
    }
    let volumes: Vec<f64> = bars[..20].iter().map(|b| b.volume as f64).collect();
    let mean = volumes.iter().sum::<f64>() / 20.0;
    let variance = volumes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 20.0;
    let std = variance.sqrt();
    if mean <= 0.0 {
        return 0.0;
    }

    let today = volumes[0];
    let upper = mean + 2.0 * std;
    let lower = (mean - 2.0 * std).max(0.0);

    if today >= upper {
        30.0
    } else if today >= mean + std {
        22.0
    } else if today >= mean {
        14.0
    } else if today > lower {
        6.0
    } else {
        0.0
    }
}

/// Envelope(10,10) position with 200-day-high context (0–35).
///
/// Best setups sit near the lower envelope while the price remains within
/// striking distance of the long-range high.
pub fn envelope_score(bars: &[DailyBar]) -> f64 {
    if bars.len() < 10 {
        return 0.0;
    }
    let price = bars[0].close;
    let mid = sma(bars, 10);
    if mid <= 0.0 || price <= 0.0 {
        return 0.0;
    }
    let upper = mid * 1.10;
    let lower = mid * 0.90;

    // Position inside the envelope, 0 at the lower band, 1 at the upper.
    let span = upper - lower;
    let position = ((price - lower) / span).clamp(0.0, 1.0);
    let mut score: f64 = if position <= 0.25 {
        20.0
    } else if position <= 0.45 {
        14.0
    } else if position <= 0.70 {
        8.0
    } else {
        2.0
    };

    // Long-range high proximity bonus: within 15% of the 200-day high the
    // pullback still belongs to an active trend.
    let window = bars.len().min(200);
    let high_200 = bars[..window].iter().map(|b| b.high).fold(0.0_f64, f64::max);
    if high_200 > 0.0 {
        let off_high = (high_200 - price) / high_200;
        if off_high <= 0.05 {
            score += 15.0;
        } else if off_high <= 0.15 {
            score += 10.0;
        } else if off_high <= 0.30 {
            score += 4.0;
        }
    }

    score.min(35.0)
}

/// Pullback structure (0–35): midpoint support + uptrend dominance + volume
/// momentum through the retracement.
pub fn pullback_score(bars: &[DailyBar]) -> f64 {
    if bars.len() < 20 {
        return 0.0;
    }
    let price = bars[0].close;
    let mut score: f64 = 0.0;

    // Midpoint support: holding above the 20-day range midpoint.
    let high = bars[..20].iter().map(|b| b.high).fold(0.0_f64, f64::max);
    let low = bars[..20].iter().map(|b| b.low).fold(f64::MAX, f64::min);
    if high > low {
        let midpoint = (high + low) / 2.0;
        if price >= midpoint {
            score += 12.0;
        } else if price >= midpoint * 0.97 {
            score += 6.0;
        }
    }

    // Uptrend dominance: up-days over the last 10 sessions.
    let up_days = bars[..10]
        .iter()
        .filter(|b| b.close > b.open)
        .count();
    score += match up_days {
        8..=10 => 12.0,
        6..=7 => 9.0,
        5 => 5.0,
        _ => 0.0,
    };

    // Volume momentum: the last three sessions shrinking versus the prior
    // week marks an orderly pullback rather than distribution.
    let recent: f64 = bars[..3].iter().map(|b| b.volume as f64).sum::<f64>() / 3.0;
    let prior: f64 = bars[3..10].iter().map(|b| b.volume as f64).sum::<f64>() / 7.0;
    if prior > 0.0 {
        let ratio = recent / prior;
        if ratio <= 0.6 {
            score += 11.0;
        } else if ratio <= 0.85 {
            score += 7.0;
        } else if ratio <= 1.1 {
            score += 3.0;
        }
    }

    score.min(35.0)
}

/// Full analysis; None when fewer than 20 bars exist.
pub fn analyze(bars: &[DailyBar]) -> Option<PullbackAnalysis> {
    if bars.len() < 20 {
        return None;
    }
    let volume_band = volume_band_score(bars);
    let envelope = envelope_score(bars);
    let pullback = pullback_score(bars);
    Some(PullbackAnalysis {
        volume_band_score: volume_band,
        envelope_score: envelope,
        pullback_score: pullback,
        total: (volume_band + envelope + pullback).min(100.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, close: f64, volume: u64) -> DailyBar {
        DailyBar {
            open,
            high: open.max(close) * 1.01,
            low: open.min(close) * 0.99,
            close,
            volume,
            trading_value: 0.0,
        }
    }

    /// A textbook pullback: long uptrend, recent shallow dip on shrinking
    /// volume, still near the range high.
    fn pullback_bars() -> Vec<DailyBar> {
        let mut bars = Vec::new();
        // Newest three: small red candles, light volume.
        for i in 0..3 {
            let p = 11_600.0 - i as f64 * 50.0;
            bars.push(bar(p + 40.0, p, 400_000));
        }
        // Prior sessions: green advance on heavier volume.
        for i in 0..27 {
            let p = 11_500.0 - i as f64 * 120.0;
            bars.push(bar(p - 100.0, p, 1_000_000));
        }
        bars
    }

    #[test]
    fn volume_band_rewards_expansion() {
        let mut bars = pullback_bars();
        // Blow today's volume through the upper band.
        bars[0].volume = 10_000_000;
        assert!((volume_band_score(&bars) - 30.0).abs() < f64::EPSILON);

        bars[0].volume = 1; // collapsed volume
        assert!(volume_band_score(&bars) <= 6.0);
    }

    #[test]
    fn envelope_rewards_lower_band_near_high() {
        let bars = pullback_bars();
        let score = envelope_score(&bars);
        assert!(score > 0.0);
        assert!(score <= 35.0);
        assert_eq!(envelope_score(&bars[..5]), 0.0);
    }

    #[test]
    fn pullback_structure_scores_orderly_dip() {
        let bars = pullback_bars();
        let score = pullback_score(&bars);
        // Midpoint support + uptrend dominance + drying volume all present.
        assert!(score >= 25.0, "score = {score}");
    }

    #[test]
    fn analyze_composes_and_caps() {
        let bars = pullback_bars();
        let analysis = analyze(&bars).unwrap();
        let sum = analysis.volume_band_score + analysis.envelope_score + analysis.pullback_score;
        assert!((analysis.total - sum.min(100.0)).abs() < f64::EPSILON);
        assert!(analysis.total <= 100.0);
        assert!(analyze(&bars[..10]).is_none());
    }
}
