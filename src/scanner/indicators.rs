// =============================================================================
// Technical indicators over daily bars
// =============================================================================
//
// All functions take bars in broker API order (newest first) and return only
// the latest values — enough for the scoring pipeline.
// =============================================================================

use crate::stock::DailyBar;

/// Summary of the daily-bar analysis feeding the pre-open score.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Fundamentals {
    /// Recent 5-day average volume over the previous 5-day average.
    pub volume_increase_rate: f64,
    pub yesterday_volume: u64,
    /// 10-day average volume.
    pub avg_daily_volume: u64,
    /// 10-day average volume × latest close, in won.
    pub avg_daily_trading_value: f64,
    /// Latest close versus the prior close, as a fraction.
    pub price_change_rate: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    /// Latest volume over the 20-day average.
    pub volume_spike_ratio: f64,
    pub ma_alignment: bool,
    pub support_level: f64,
    pub resistance_level: f64,
    pub sma_20: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
}

/// Simple moving average of the newest `period` closes.
pub fn sma(bars: &[DailyBar], period: usize) -> f64 {
    if bars.len() < period || period == 0 {
        return 0.0;
    }
    bars[..period].iter().map(|b| b.close).sum::<f64>() / period as f64
}

/// RSI(14) via Wilder-less simple averaging over the available window.
pub fn rsi_14(bars: &[DailyBar]) -> f64 {
    if bars.len() < 15 {
        return 50.0;
    }
    // Chronological closes, oldest first.
    let closes: Vec<f64> = bars.iter().rev().map(|b| b.close).collect();
    let mut gains = 0.0;
    let mut losses = 0.0;
    let mut count = 0u32;
    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses += -change;
        }
        count += 1;
    }
    if count == 0 {
        return 50.0;
    }
    let avg_gain = gains / count as f64;
    let avg_loss = losses / count as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[0];
    for &v in values {
        ema = v * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

/// MACD(12,26,9): (macd, signal, histogram) for the latest bar.
pub fn macd(bars: &[DailyBar]) -> (f64, f64, f64) {
    if bars.len() < 26 {
        return (0.0, 0.0, 0.0);
    }
    let closes: Vec<f64> = bars.iter().rev().map(|b| b.close).collect();
    let fast = ema_series(&closes, 12);
    let slow = ema_series(&closes, 26);
    let macd_line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema_series(&macd_line, 9);
    let m = *macd_line.last().unwrap();
    let s = *signal.last().unwrap();
    (m, s, m - s)
}

/// Bollinger(20,2): (upper, middle, lower) for the latest bar.
pub fn bollinger(bars: &[DailyBar]) -> (f64, f64, f64) {
    if bars.len() < 20 {
        return (0.0, 0.0, 0.0);
    }
    let window: Vec<f64> = bars[..20].iter().map(|b| b.close).collect();
    let mean = window.iter().sum::<f64>() / 20.0;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / 20.0;
    let std = variance.sqrt();
    (mean + 2.0 * std, mean, mean - 2.0 * std)
}

/// Bullish alignment: latest close > SMA5 > SMA10 > SMA20.
pub fn ma_alignment(bars: &[DailyBar]) -> bool {
    if bars.len() < 20 {
        return false;
    }
    let price = bars[0].close;
    let ma5 = sma(bars, 5);
    let ma10 = sma(bars, 10);
    let ma20 = sma(bars, 20);
    price > ma5 && ma5 > ma10 && ma10 > ma20
}

/// Divergence of `price` from a moving average, in percent.
pub fn divergence_rate(price: f64, ma: f64) -> f64 {
    if price <= 0.0 || ma <= 0.0 {
        return 0.0;
    }
    (price - ma) / ma * 100.0
}

/// Full daily-bar analysis. Returns None when fewer than 20 bars exist.
pub fn fundamentals(bars: &[DailyBar]) -> Option<Fundamentals> {
    if bars.len() < 20 {
        return None;
    }

    let recent: Vec<u64> = bars[..5].iter().map(|b| b.volume).collect();
    let previous: Vec<u64> = bars[5..10].iter().map(|b| b.volume).collect();
    let recent_avg = recent.iter().sum::<u64>() as f64 / recent.len() as f64;
    let prev_avg = previous.iter().sum::<u64>() as f64 / previous.len() as f64;
    let volume_increase_rate = if prev_avg > 0.0 { recent_avg / prev_avg } else { 1.0 };

    let avg_10d = bars[..10].iter().map(|b| b.volume).sum::<u64>() / 10;
    let avg_daily_trading_value = avg_10d as f64 * bars[0].close;

    let today_close = bars[0].close;
    let yesterday_close = bars.get(1).map(|b| b.close).unwrap_or(today_close);
    let price_change_rate = if yesterday_close > 0.0 {
        (today_close - yesterday_close) / yesterday_close
    } else {
        0.0
    };

    let (macd_v, macd_sig, macd_hist) = macd(bars);
    let (bb_upper, bb_middle, bb_lower) = bollinger(bars);

    let vol_20_avg = bars[..20].iter().map(|b| b.volume).sum::<u64>() as f64 / 20.0;
    let volume_spike_ratio = if vol_20_avg > 0.0 {
        bars[0].volume as f64 / vol_20_avg
    } else {
        1.0
    };

    Some(Fundamentals {
        volume_increase_rate,
        yesterday_volume: bars.get(1).map(|b| b.volume).unwrap_or(0),
        avg_daily_volume: avg_10d,
        avg_daily_trading_value,
        price_change_rate,
        rsi: rsi_14(bars),
        macd: macd_v,
        macd_signal: macd_sig,
        macd_hist,
        volume_spike_ratio,
        ma_alignment: ma_alignment(bars),
        support_level: bars[..10].iter().map(|b| b.low).fold(f64::MAX, f64::min),
        resistance_level: bars[..10].iter().map(|b| b.high).fold(0.0, f64::max),
        sma_20: sma(bars, 20),
        bb_upper,
        bb_middle,
        bb_lower,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64, volume: u64) -> DailyBar {
        DailyBar {
            open: close * 0.99,
            high: close * 1.01,
            low: close * 0.98,
            close,
            volume,
            trading_value: close * volume as f64,
        }
    }

    /// 30 bars, newest first, gently rising into the present.
    fn rising_bars() -> Vec<DailyBar> {
        (0..30).map(|i| bar(10_000.0 - i as f64 * 50.0, 1_000_000)).collect()
    }

    #[test]
    fn sma_uses_newest_window() {
        let bars = rising_bars();
        let ma5 = sma(&bars, 5);
        let expected = (0..5).map(|i| 10_000.0 - i as f64 * 50.0).sum::<f64>() / 5.0;
        assert!((ma5 - expected).abs() < 1e-9);
        assert_eq!(sma(&bars[..3], 5), 0.0);
    }

    #[test]
    fn rsi_extremes() {
        // Strictly rising closes → RSI 100.
        let bars = rising_bars();
        assert!((rsi_14(&bars) - 100.0).abs() < 1e-9);

        // Strictly falling closes → RSI 0.
        let falling: Vec<DailyBar> = (0..30).map(|i| bar(10_000.0 + i as f64 * 50.0, 1_000_000)).collect();
        assert!(rsi_14(&falling) < 1.0);

        // Not enough data → neutral 50.
        assert!((rsi_14(&bars[..10]) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let bars = rising_bars();
        let (m, _s, _h) = macd(&bars);
        assert!(m > 0.0);
        assert_eq!(macd(&bars[..20]), (0.0, 0.0, 0.0));
    }

    #[test]
    fn bollinger_bands_bracket_mean() {
        let bars = rising_bars();
        let (upper, middle, lower) = bollinger(&bars);
        assert!(upper > middle && middle > lower);
        let expected_mid = sma(&bars, 20);
        assert!((middle - expected_mid).abs() < 1e-9);
    }

    #[test]
    fn ma_alignment_in_uptrend() {
        assert!(ma_alignment(&rising_bars()));
        let flat: Vec<DailyBar> = (0..30).map(|_| bar(10_000.0, 1_000_000)).collect();
        assert!(!ma_alignment(&flat));
    }

    #[test]
    fn fundamentals_volume_ratios() {
        let mut bars = rising_bars();
        // Spike recent volume 2× against the previous block.
        for b in bars[..5].iter_mut() {
            b.volume = 2_000_000;
        }
        let f = fundamentals(&bars).unwrap();
        assert!((f.volume_increase_rate - 2.0).abs() < 1e-9);
        assert!(f.avg_daily_trading_value > 0.0);
        assert!(f.price_change_rate > 0.0);
        assert!(f.support_level < f.resistance_level);

        assert!(fundamentals(&bars[..10]).is_none());
    }
}
