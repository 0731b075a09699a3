// =============================================================================
// Candle pattern detection over the last five daily bars
// =============================================================================

use std::collections::HashMap;

use crate::stock::DailyBar;

/// Composite pattern score is capped so stacked patterns cannot dominate the
/// pre-open ranking.
const PATTERN_SCORE_CAP: f64 = 18.0;

#[derive(Debug, Clone, Default)]
pub struct PatternAnalysis {
    pub detected: Vec<String>,
    pub scores: HashMap<String, f64>,
    pub total: f64,
    pub reliability: f64,
    /// min(total × 18, 18) — the value that feeds the composite score.
    pub pattern_score: f64,
}

/// Patterns in a single candle with their reliability weights.
pub fn detect_single(bar: &DailyBar) -> Vec<(&'static str, f64)> {
    let mut found = Vec::new();
    let body = (bar.close - bar.open).abs();
    let range = bar.high - bar.low;
    if range <= 0.0 {
        return found;
    }
    let upper_shadow = bar.high - bar.open.max(bar.close);
    let lower_shadow = bar.open.min(bar.close) - bar.low;

    let body_ratio = body / range;
    let upper_ratio = upper_shadow / range;
    let lower_ratio = lower_shadow / range;

    // Hammer: long lower shadow, little upper shadow, small body.
    if lower_ratio > 0.5 && upper_ratio < 0.1 && body_ratio < 0.3 {
        found.push(("hammer", 0.8));
    }
    // Bullish engulfing proxy: strong green body.
    if bar.close > bar.open && body_ratio > 0.6 {
        found.push(("bullish_engulfing", 0.9));
    }
    // Doji family: vanishing body.
    if body_ratio < 0.1 {
        if lower_ratio > 0.3 {
            found.push(("dragonfly_doji", 0.7));
        } else {
            found.push(("doji", 0.5));
        }
    }
    // Inverted hammer: long upper shadow, little lower shadow, small body.
    if upper_ratio > 0.5 && lower_ratio < 0.1 && body_ratio < 0.3 {
        found.push(("inverted_hammer", 0.65));
    }

    found
}

/// Pattern analysis over the newest five bars. A pattern repeating across
/// days averages its score rather than stacking.
pub fn analyze(bars: &[DailyBar]) -> Option<PatternAnalysis> {
    if bars.len() < 5 {
        return None;
    }

    let mut detected: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for bar in &bars[..5] {
        for (name, score) in detect_single(bar) {
            match scores.get_mut(name) {
                Some(existing) => *existing = (*existing + score) / 2.0,
                None => {
                    detected.push(name.to_string());
                    scores.insert(name.to_string(), score);
                }
            }
        }
    }

    let total: f64 = scores.values().sum();
    let reliability = if detected.is_empty() {
        0.0
    } else {
        (total / detected.len() as f64).min(1.0)
    };

    Some(PatternAnalysis {
        detected,
        scores,
        total,
        reliability,
        pattern_score: (total * PATTERN_SCORE_CAP).min(PATTERN_SCORE_CAP),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hammer() -> DailyBar {
        // range 100, lower shadow 70, body 20, upper shadow 10.
        DailyBar { open: 1_070.0, high: 1_100.0, low: 1_000.0, close: 1_090.0, volume: 1, trading_value: 0.0 }
    }

    fn strong_green() -> DailyBar {
        DailyBar { open: 1_010.0, high: 1_100.0, low: 1_000.0, close: 1_095.0, volume: 1, trading_value: 0.0 }
    }

    fn doji() -> DailyBar {
        DailyBar { open: 1_050.0, high: 1_100.0, low: 1_000.0, close: 1_052.0, volume: 1, trading_value: 0.0 }
    }

    fn flat() -> DailyBar {
        DailyBar { open: 1_000.0, high: 1_000.0, low: 1_000.0, close: 1_000.0, volume: 1, trading_value: 0.0 }
    }

    #[test]
    fn hammer_detected() {
        let found = detect_single(&hammer());
        assert!(found.iter().any(|(n, s)| *n == "hammer" && (*s - 0.8).abs() < f64::EPSILON));
    }

    #[test]
    fn engulfing_needs_dominant_body() {
        let found = detect_single(&strong_green());
        assert!(found.iter().any(|(n, _)| *n == "bullish_engulfing"));
        assert!(detect_single(&doji()).iter().all(|(n, _)| *n != "bullish_engulfing"));
    }

    #[test]
    fn doji_split_by_lower_shadow() {
        let found = detect_single(&doji());
        // Lower shadow ~50%, so dragonfly wins over plain doji.
        assert!(found.iter().any(|(n, _)| *n == "dragonfly_doji"));
    }

    #[test]
    fn zero_range_bar_yields_nothing() {
        assert!(detect_single(&flat()).is_empty());
    }

    #[test]
    fn composite_score_capped_at_18() {
        let bars = vec![strong_green(), hammer(), strong_green(), hammer(), strong_green()];
        let analysis = analyze(&bars).unwrap();
        assert!(analysis.pattern_score <= 18.0);
        assert!(analysis.pattern_score > 0.0);
        assert!(analysis.reliability <= 1.0);
    }

    #[test]
    fn repeated_pattern_averages_score() {
        let bars = vec![hammer(), hammer(), flat(), flat(), flat()];
        let analysis = analyze(&bars).unwrap();
        // Two hammers average to 0.8, not 1.6.
        assert!((analysis.scores["hammer"] - 0.8).abs() < f64::EPSILON);
        assert_eq!(analysis.detected.iter().filter(|n| *n == "hammer").count(), 1);
    }

    #[test]
    fn needs_five_bars() {
        assert!(analyze(&[hammer(), flat()]).is_none());
    }
}
