// =============================================================================
// Trading Configuration — INI sections mapped to typed structs
// =============================================================================
//
// Every tunable parameter of the engine lives in config/trading.ini, split
// into the four sections the strategy, risk, schedule, and performance code
// read from. All fields carry serde defaults so a partial file still loads.
// The registry is read-mostly: `reload` swaps the whole config atomically.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn d_true() -> bool {
    true
}

fn d_trading_mode() -> String {
    "day".to_string()
}

fn d_exit_time() -> String {
    "15:00".to_string()
}

fn d_open_time() -> String {
    "09:00".to_string()
}

fn d_close_time() -> String {
    "15:30".to_string()
}

fn d_scan_time() -> String {
    "08:30".to_string()
}

fn d_max_holding_days() -> u32 {
    1
}

fn d_max_spread_threshold() -> f64 {
    5.0
}

fn d_min_realtime_data_types() -> u32 {
    2
}

fn d_limit_up_profit_rate() -> f64 {
    29.0
}

fn d_emergency_stop_loss_rate() -> f64 {
    -5.0
}

fn d_emergency_volatility_threshold() -> f64 {
    3.0
}

fn d_rapid_decline_from_buy() -> f64 {
    2.5
}

fn d_high_volatility_for_decline() -> f64 {
    4.0
}

fn d_trailing_stop_ratio() -> f64 {
    1.0
}

fn d_preclose_profit_threshold() -> f64 {
    0.5
}

fn d_long_hold_minutes() -> f64 {
    180.0
}

fn d_long_hold_profit_threshold() -> f64 {
    0.3
}

fn d_min_holding_minutes_before_sell() -> f64 {
    1.0
}

fn d_weak_contract_strength() -> f64 {
    80.0
}

fn d_low_buy_ratio() -> f64 {
    30.0
}

fn d_market_pressure_sell_loss() -> f64 {
    -1.0
}

fn d_high_volatility_threshold() -> f64 {
    5.0
}

fn d_price_decline_from_high() -> f64 {
    0.03
}

fn d_max_holding_minutes() -> f64 {
    240.0
}

fn d_opportunity_cost_min_loss() -> f64 {
    -2.0
}

fn d_opportunity_cost_max_profit() -> f64 {
    1.0
}

fn d_time_stop_30min() -> f64 {
    1.0
}

fn d_time_stop_2hour() -> f64 {
    0.8
}

fn d_time_stop_4hour() -> f64 {
    0.6
}

fn d_time_stop_over4hour() -> f64 {
    0.4
}

fn d_high_ask_pressure() -> f64 {
    3.0
}

fn d_max_profit_for_ask_sell() -> f64 {
    1.5
}

fn d_low_bid_interest() -> f64 {
    0.3
}

fn d_min_loss_for_bid_sell() -> f64 {
    -0.5
}

fn d_wide_spread() -> f64 {
    0.03
}

fn d_min_holding_for_orderbook() -> f64 {
    1.0
}

fn d_volume_drying() -> f64 {
    0.4
}

fn d_min_holding_for_volume_check() -> f64 {
    15.0
}

fn d_low_turnover() -> f64 {
    0.5
}

fn d_min_holding_for_turnover() -> f64 {
    30.0
}

fn d_expected_min_volume_ratio() -> f64 {
    0.8
}

fn d_min_holding_for_pattern() -> f64 {
    45.0
}

fn d_sell_dominance() -> f64 {
    0.7
}

fn d_min_holding_for_contract() -> f64 {
    20.0
}

fn d_weak_strength_enhanced() -> f64 {
    70.0
}

fn d_strength_time() -> f64 {
    30.0
}

fn d_very_weak_strength() -> f64 {
    60.0
}

fn d_immediate_strength_check() -> f64 {
    10.0
}

fn d_combined_sell_pressure() -> f64 {
    2.0
}

fn d_max_profit_for_weak_strength() -> f64 {
    0.8
}

fn d_opening_buy_ratio_multiplier() -> f64 {
    1.1
}

fn d_preclose_buy_ratio_multiplier() -> f64 {
    1.2
}

fn d_opening_pattern_score() -> f64 {
    75.0
}

fn d_normal_pattern_score() -> f64 {
    70.0
}

fn d_stop_loss_rate() -> f64 {
    -0.02
}

fn d_take_profit_rate() -> f64 {
    0.03
}

fn d_base_investment_amount() -> f64 {
    1_000_000.0
}

fn d_position_size_ratio() -> f64 {
    0.1
}

fn d_max_positions() -> u32 {
    5
}

fn d_max_daily_loss() -> f64 {
    -100_000.0
}

fn d_max_daily_trades() -> u32 {
    20
}

fn d_max_position_size() -> f64 {
    1_000_000.0
}

fn d_opening_reduction_ratio() -> f64 {
    0.5
}

fn d_preclose_reduction_ratio() -> f64 {
    0.3
}

fn d_conservative_ratio() -> f64 {
    0.7
}

fn d_cache_ttl_seconds() -> f64 {
    2.0
}

fn d_fast_interval() -> u64 {
    3
}

fn d_normal_interval() -> u64 {
    10
}

fn d_ws_max_connections() -> u32 {
    41
}

fn d_connections_per_stock() -> u32 {
    2
}

fn d_system_connections() -> u32 {
    1
}

fn d_subscription_batch_size() -> usize {
    3
}

fn d_max_premarket() -> usize {
    10
}

fn d_max_intraday() -> usize {
    10
}

fn d_max_total_observable() -> usize {
    20
}

fn d_intraday_scan_interval() -> u64 {
    30
}

fn d_contract_strength_threshold() -> f64 {
    120.0
}

fn d_buy_ratio_threshold() -> f64 {
    60.0
}

fn d_min_momentum_opening() -> i32 {
    20
}

fn d_min_momentum_normal() -> i32 {
    15
}

fn d_min_momentum_preclose() -> i32 {
    25
}

fn d_buy_score_opening() -> i32 {
    70
}

fn d_buy_score_normal() -> i32 {
    60
}

fn d_buy_score_preclose() -> i32 {
    75
}

fn d_min_bid_ask_ratio_for_buy() -> f64 {
    1.0
}

fn d_min_buy_ratio_for_buy() -> f64 {
    48.0
}

fn d_min_contract_strength_for_buy() -> f64 {
    100.0
}

fn d_max_price_change_rate_for_buy() -> f64 {
    8.0
}

fn d_min_liquidity_score_for_buy() -> f64 {
    0.0
}

fn d_market_volatility_threshold() -> f64 {
    0.02
}

fn d_high_volatility_position_ratio() -> f64 {
    0.3
}

fn d_rank_head_limit() -> usize {
    50
}

fn d_intraday_min_total_score() -> f64 {
    20.0
}

fn d_intraday_min_trading_value() -> f64 {
    2_000_000_000.0
}

fn d_intraday_max_spread_percent() -> f64 {
    2.0
}

fn d_liquidity_weight() -> f64 {
    1.0
}

fn d_min_trading_value() -> f64 {
    500_000_000.0
}

fn d_preopen_min_trading_value() -> f64 {
    50_000_000.0
}

fn d_stuck_order_timeout_minutes() -> i64 {
    3
}

// =============================================================================
// Sections
// =============================================================================

/// `[trading_strategy]` — mode, schedule cutoffs, and analyzer thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// "day" disables the time-of-day take-profit adjustments.
    #[serde(default = "d_trading_mode")]
    pub trading_mode: String,
    #[serde(default = "d_exit_time")]
    pub day_trading_exit_time: String,
    /// Forces `is_market_hours` true on weekdays (development convenience).
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "d_true")]
    pub next_day_force_sell: bool,
    #[serde(default = "d_max_holding_days")]
    pub max_holding_days: u32,

    // --- buy-side gates ------------------------------------------------------
    #[serde(default = "d_max_spread_threshold")]
    pub max_spread_threshold: f64,
    #[serde(default = "d_min_realtime_data_types")]
    pub min_realtime_data_types: u32,
    #[serde(default = "d_opening_buy_ratio_multiplier")]
    pub opening_buy_ratio_multiplier: f64,
    #[serde(default = "d_preclose_buy_ratio_multiplier")]
    pub preclose_buy_ratio_multiplier: f64,
    #[serde(default = "d_opening_pattern_score")]
    pub opening_pattern_score_threshold: f64,
    #[serde(default = "d_normal_pattern_score")]
    pub normal_pattern_score_threshold: f64,

    // --- immediate sell ------------------------------------------------------
    #[serde(default = "d_limit_up_profit_rate")]
    pub limit_up_profit_rate: f64,
    #[serde(default = "d_emergency_stop_loss_rate")]
    pub emergency_stop_loss_rate: f64,
    #[serde(default = "d_emergency_volatility_threshold")]
    pub emergency_volatility_threshold: f64,

    // --- stop loss -----------------------------------------------------------
    #[serde(default = "d_rapid_decline_from_buy")]
    pub rapid_decline_from_buy_threshold: f64,
    #[serde(default = "d_high_volatility_for_decline")]
    pub high_volatility_for_decline: f64,
    #[serde(default = "d_time_stop_30min")]
    pub time_stop_30min_multiplier: f64,
    #[serde(default = "d_time_stop_2hour")]
    pub time_stop_2hour_multiplier: f64,
    #[serde(default = "d_time_stop_4hour")]
    pub time_stop_4hour_multiplier: f64,
    #[serde(default = "d_time_stop_over4hour")]
    pub time_stop_over4hour_multiplier: f64,

    // --- take profit ---------------------------------------------------------
    #[serde(default = "d_true")]
    pub trailing_stop_enabled: bool,
    #[serde(default = "d_trailing_stop_ratio")]
    pub trailing_stop_ratio: f64,
    #[serde(default = "d_preclose_profit_threshold")]
    pub preclose_profit_threshold: f64,
    #[serde(default = "d_long_hold_minutes")]
    pub long_hold_minutes: f64,
    #[serde(default = "d_long_hold_profit_threshold")]
    pub long_hold_profit_threshold: f64,

    // --- technical sells -----------------------------------------------------
    #[serde(default = "d_min_holding_minutes_before_sell")]
    pub min_holding_minutes_before_sell: f64,
    #[serde(default = "d_weak_contract_strength")]
    pub weak_contract_strength_threshold: f64,
    #[serde(default = "d_low_buy_ratio")]
    pub low_buy_ratio_threshold: f64,
    #[serde(default = "d_market_pressure_sell_loss")]
    pub market_pressure_sell_loss_threshold: f64,

    // --- orderbook sells -----------------------------------------------------
    #[serde(default = "d_high_ask_pressure")]
    pub high_ask_pressure_threshold: f64,
    #[serde(default = "d_max_profit_for_ask_sell")]
    pub max_profit_for_ask_sell: f64,
    #[serde(default = "d_low_bid_interest")]
    pub low_bid_interest_threshold: f64,
    #[serde(default = "d_min_loss_for_bid_sell")]
    pub min_loss_for_bid_sell: f64,
    #[serde(default = "d_wide_spread")]
    pub wide_spread_threshold: f64,
    #[serde(default = "d_min_holding_for_orderbook")]
    pub min_holding_for_orderbook: f64,

    // --- volume-pattern sells ------------------------------------------------
    #[serde(default = "d_volume_drying")]
    pub volume_drying_threshold: f64,
    #[serde(default = "d_min_holding_for_volume_check")]
    pub min_holding_for_volume_check: f64,
    #[serde(default = "d_low_turnover")]
    pub low_turnover_threshold: f64,
    #[serde(default = "d_min_holding_for_turnover")]
    pub min_holding_for_turnover: f64,
    #[serde(default = "d_expected_min_volume_ratio")]
    pub expected_min_volume_ratio: f64,
    #[serde(default = "d_min_holding_for_pattern")]
    pub min_holding_for_pattern: f64,

    // --- enhanced contract sells ---------------------------------------------
    #[serde(default = "d_sell_dominance")]
    pub sell_dominance_threshold: f64,
    #[serde(default = "d_min_holding_for_contract")]
    pub min_holding_for_contract: f64,
    #[serde(default = "d_weak_strength_enhanced")]
    pub weak_strength_enhanced_threshold: f64,
    #[serde(default = "d_strength_time")]
    pub strength_time_threshold: f64,
    #[serde(default = "d_very_weak_strength")]
    pub very_weak_strength_threshold: f64,
    #[serde(default = "d_immediate_strength_check")]
    pub immediate_strength_check: f64,
    #[serde(default = "d_combined_sell_pressure")]
    pub combined_sell_pressure_threshold: f64,
    #[serde(default = "d_max_profit_for_weak_strength")]
    pub max_profit_for_weak_strength: f64,

    // --- volatility / time sells ---------------------------------------------
    #[serde(default = "d_high_volatility_threshold")]
    pub high_volatility_threshold: f64,
    #[serde(default = "d_price_decline_from_high")]
    pub price_decline_from_high_threshold: f64,
    #[serde(default = "d_max_holding_minutes")]
    pub max_holding_minutes: f64,
    #[serde(default = "d_opportunity_cost_min_loss")]
    pub opportunity_cost_min_loss: f64,
    #[serde(default = "d_opportunity_cost_max_profit")]
    pub opportunity_cost_max_profit: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("all fields carry defaults")
    }
}

/// `[risk_management]` — sizing and hard caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "d_stop_loss_rate")]
    pub stop_loss_rate: f64,
    #[serde(default = "d_take_profit_rate")]
    pub take_profit_rate: f64,
    #[serde(default = "d_base_investment_amount")]
    pub base_investment_amount: f64,
    #[serde(default = "d_position_size_ratio")]
    pub position_size_ratio: f64,
    #[serde(default)]
    pub use_account_ratio: bool,
    #[serde(default = "d_max_positions")]
    pub max_positions: u32,
    #[serde(default = "d_max_daily_loss")]
    pub max_daily_loss: f64,
    #[serde(default = "d_max_daily_trades")]
    pub max_daily_trades: u32,
    #[serde(default = "d_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "d_opening_reduction_ratio")]
    pub opening_reduction_ratio: f64,
    #[serde(default = "d_preclose_reduction_ratio")]
    pub preclose_reduction_ratio: f64,
    #[serde(default = "d_conservative_ratio")]
    pub conservative_ratio: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("all fields carry defaults")
    }
}

/// `[market_schedule]` — session boundaries used for phase derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "d_open_time")]
    pub market_open_time: String,
    #[serde(default = "d_close_time")]
    pub market_close_time: String,
    #[serde(default = "d_exit_time")]
    pub day_trading_exit_time: String,
    #[serde(default = "d_scan_time")]
    pub pre_market_scan_time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("all fields carry defaults")
    }
}

/// `[performance]` — cadence, capacity, cache, and scoring thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "d_cache_ttl_seconds")]
    pub cache_ttl_seconds: f64,
    #[serde(default)]
    pub enable_cache_debug: bool,
    #[serde(default = "d_fast_interval")]
    pub fast_monitoring_interval: u64,
    #[serde(default = "d_normal_interval")]
    pub normal_monitoring_interval: u64,

    // --- websocket capacity --------------------------------------------------
    #[serde(default = "d_ws_max_connections")]
    pub websocket_max_connections: u32,
    #[serde(default = "d_connections_per_stock")]
    pub connections_per_stock: u32,
    #[serde(default = "d_system_connections")]
    pub system_connections: u32,
    #[serde(default = "d_subscription_batch_size")]
    pub websocket_subscription_batch_size: usize,

    // --- observable-set capacity ---------------------------------------------
    #[serde(default = "d_max_premarket")]
    pub max_premarket_selected_stocks: usize,
    #[serde(default = "d_max_intraday")]
    pub max_intraday_selected_stocks: usize,
    #[serde(default = "d_max_total_observable")]
    pub max_total_observable_stocks: usize,
    #[serde(default = "d_intraday_scan_interval")]
    pub intraday_scan_interval_minutes: u64,

    // --- buy analyzer thresholds ---------------------------------------------
    #[serde(default = "d_contract_strength_threshold")]
    pub contract_strength_threshold: f64,
    #[serde(default = "d_buy_ratio_threshold")]
    pub buy_ratio_threshold: f64,
    #[serde(default = "d_min_momentum_opening")]
    pub min_momentum_opening: i32,
    #[serde(default = "d_min_momentum_normal")]
    pub min_momentum_normal: i32,
    #[serde(default = "d_min_momentum_preclose")]
    pub min_momentum_preclose: i32,
    #[serde(default = "d_buy_score_opening")]
    pub buy_score_opening_threshold: i32,
    #[serde(default = "d_buy_score_normal")]
    pub buy_score_normal_threshold: i32,
    #[serde(default = "d_buy_score_preclose")]
    pub buy_score_preclose_threshold: i32,
    #[serde(default = "d_min_bid_ask_ratio_for_buy")]
    pub min_bid_ask_ratio_for_buy: f64,
    #[serde(default = "d_min_buy_ratio_for_buy")]
    pub min_buy_ratio_for_buy: f64,
    #[serde(default = "d_min_contract_strength_for_buy")]
    pub min_contract_strength_for_buy: f64,
    #[serde(default = "d_max_price_change_rate_for_buy")]
    pub max_price_change_rate_for_buy: f64,
    #[serde(default = "d_min_liquidity_score_for_buy")]
    pub min_liquidity_score_for_buy: f64,

    // --- monitor volatility --------------------------------------------------
    #[serde(default = "d_market_volatility_threshold")]
    pub market_volatility_threshold: f64,
    #[serde(default = "d_high_volatility_position_ratio")]
    pub high_volatility_position_ratio: f64,

    // --- scanners ------------------------------------------------------------
    #[serde(default = "d_rank_head_limit")]
    pub intraday_rank_head_limit: usize,
    #[serde(default = "d_intraday_min_total_score")]
    pub intraday_min_total_score: f64,
    /// Won. Intraday candidates below half of this are dropped.
    #[serde(default = "d_intraday_min_trading_value")]
    pub intraday_min_trading_value: f64,
    #[serde(default = "d_intraday_max_spread_percent")]
    pub intraday_max_spread_percent: f64,
    #[serde(default = "d_true")]
    pub intraday_reinclude_sold: bool,
    #[serde(default = "d_liquidity_weight")]
    pub liquidity_weight: f64,
    /// Won. Liquidity gate for the pre-open scan.
    #[serde(default = "d_min_trading_value")]
    pub min_trading_value: f64,
    /// Won. Overnight single-price session trading-value floor.
    #[serde(default = "d_preopen_min_trading_value")]
    pub preopen_min_trading_value: f64,

    // --- recovery ------------------------------------------------------------
    /// Minutes before an unfilled order is recovered. 0 means never.
    #[serde(default = "d_stuck_order_timeout_minutes")]
    pub stuck_order_timeout_minutes: i64,

    /// Replace the composite pre-open ranking with the pullback-pattern
    /// scanner.
    #[serde(default)]
    pub use_advanced_scanner: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("all fields carry defaults")
    }
}

// =============================================================================
// TradingConfig
// =============================================================================

/// Top-level configuration: one struct per INI section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub trading_strategy: StrategyConfig,
    #[serde(default)]
    pub risk_management: RiskConfig,
    #[serde(default)]
    pub market_schedule: ScheduleConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl TradingConfig {
    /// Load from an INI file. Missing file falls back to full defaults with a
    /// warning so the engine can still start in a development environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Ini))
            .build()
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let cfg: TradingConfig = raw
            .try_deserialize()
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            trading_mode = %cfg.trading_strategy.trading_mode,
            max_positions = cfg.risk_management.max_positions,
            "trading config loaded"
        );
        Ok(cfg)
    }

    /// Buy score threshold for the given market phase.
    pub fn buy_score_threshold(&self, phase: crate::types::MarketPhase) -> i32 {
        use crate::types::MarketPhase::*;
        match phase {
            Opening => self.performance.buy_score_opening_threshold,
            PreClose => self.performance.buy_score_preclose_threshold,
            _ => self.performance.buy_score_normal_threshold,
        }
    }

    /// Minimum momentum score for the given market phase.
    pub fn min_momentum(&self, phase: crate::types::MarketPhase) -> i32 {
        use crate::types::MarketPhase::*;
        match phase {
            Opening => self.performance.min_momentum_opening,
            PreClose => self.performance.min_momentum_preclose,
            _ => self.performance.min_momentum_normal,
        }
    }

    /// Phase-adjusted buy-ratio floor.
    pub fn buy_ratio_floor(&self, phase: crate::types::MarketPhase) -> f64 {
        use crate::types::MarketPhase::*;
        let base = self.performance.buy_ratio_threshold;
        match phase {
            Opening => base * self.trading_strategy.opening_buy_ratio_multiplier,
            PreClose => base * self.trading_strategy.preclose_buy_ratio_multiplier,
            _ => base,
        }
    }

    /// Phase-adjusted pattern-score floor.
    pub fn pattern_score_floor(&self, phase: crate::types::MarketPhase) -> f64 {
        use crate::types::MarketPhase::*;
        match phase {
            Opening | PreClose => self.trading_strategy.opening_pattern_score_threshold,
            _ => self.trading_strategy.normal_pattern_score_threshold,
        }
    }

    /// True when the configured mode is a day-trading mode.
    pub fn is_day_trading(&self) -> bool {
        matches!(
            self.trading_strategy.trading_mode.to_lowercase().as_str(),
            "day" | "daytrade" | "day_trading"
        )
    }

    /// Symbols the websocket session can carry beyond the system streams.
    pub fn websocket_symbol_capacity(&self) -> usize {
        let p = &self.performance;
        let usable = p.websocket_max_connections.saturating_sub(p.system_connections);
        (usable / p.connections_per_stock.max(1)) as usize
    }
}

/// Shared handle to the configuration. `reload` replaces the whole config in
/// one write-lock acquisition; readers clone the `Arc` out.
pub struct ConfigRegistry {
    inner: parking_lot::RwLock<std::sync::Arc<TradingConfig>>,
    path: std::path::PathBuf,
}

impl ConfigRegistry {
    pub fn new(cfg: TradingConfig, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            inner: parking_lot::RwLock::new(std::sync::Arc::new(cfg)),
            path: path.into(),
        }
    }

    pub fn current(&self) -> std::sync::Arc<TradingConfig> {
        self.inner.read().clone()
    }

    pub fn reload(&self) -> Result<()> {
        let fresh = TradingConfig::load(&self.path)?;
        *self.inner.write() = std::sync::Arc::new(fresh);
        info!(path = %self.path.display(), "trading config reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketPhase;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = TradingConfig::default();
        assert_eq!(cfg.trading_strategy.trading_mode, "day");
        assert!((cfg.risk_management.stop_loss_rate + 0.02).abs() < f64::EPSILON);
        assert!((cfg.risk_management.take_profit_rate - 0.03).abs() < f64::EPSILON);
        assert_eq!(cfg.risk_management.max_positions, 5);
        assert_eq!(cfg.performance.websocket_max_connections, 41);
        assert_eq!(cfg.performance.connections_per_stock, 2);
        assert_eq!(cfg.performance.system_connections, 1);
        assert!((cfg.performance.cache_ttl_seconds - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.performance.stuck_order_timeout_minutes, 3);
        assert!(cfg.trading_strategy.next_day_force_sell);
    }

    #[test]
    fn symbol_capacity_from_connection_budget() {
        let cfg = TradingConfig::default();
        // (41 - 1) / 2 = 20 symbols.
        assert_eq!(cfg.websocket_symbol_capacity(), 20);

        let mut tight = TradingConfig::default();
        tight.performance.websocket_max_connections = 40;
        tight.performance.system_connections = 2;
        assert_eq!(tight.websocket_symbol_capacity(), 19);
    }

    #[test]
    fn phase_dependent_thresholds() {
        let cfg = TradingConfig::default();
        assert_eq!(cfg.buy_score_threshold(MarketPhase::Opening), 70);
        assert_eq!(cfg.buy_score_threshold(MarketPhase::Active), 60);
        assert_eq!(cfg.buy_score_threshold(MarketPhase::PreClose), 75);
        assert_eq!(cfg.min_momentum(MarketPhase::Opening), 20);
        assert_eq!(cfg.min_momentum(MarketPhase::Lunch), 15);
        assert!(cfg.buy_ratio_floor(MarketPhase::Opening) > cfg.buy_ratio_floor(MarketPhase::Active));
    }

    #[test]
    fn partial_json_section_fills_defaults() {
        let json = r#"{ "risk_management": { "max_positions": 3 } }"#;
        let cfg: TradingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.risk_management.max_positions, 3);
        assert!((cfg.risk_management.take_profit_rate - 0.03).abs() < f64::EPSILON);
        assert_eq!(cfg.performance.max_premarket_selected_stocks, 10);
    }

    #[test]
    fn registry_reload_keeps_handle_semantics() {
        let cfg = TradingConfig::default();
        let registry = ConfigRegistry::new(cfg, "config/trading.ini");
        let before = registry.current();
        assert_eq!(before.risk_management.max_positions, 5);
        // Missing file reload falls back to defaults without error.
        registry.reload().unwrap();
        assert_eq!(registry.current().risk_management.max_positions, 5);
    }

    #[test]
    fn day_trading_mode_detection() {
        let mut cfg = TradingConfig::default();
        assert!(cfg.is_day_trading());
        cfg.trading_strategy.trading_mode = "swing".into();
        assert!(!cfg.is_day_trading());
    }
}
