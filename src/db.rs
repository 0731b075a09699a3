// =============================================================================
// Trade Database — SQLite persistence for scans, orders, and daily metrics
// =============================================================================
//
// Writes never abort the trading pipeline: callers log and continue on
// failure. JSON columns are serialized with serde_json.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::info;

use crate::types::now_kst;

pub struct TradeDatabase {
    db_path: String,
}

/// Pre-market scan row.
#[derive(Debug, Clone, Default)]
pub struct PreMarketScanRow {
    pub stock_code: String,
    pub stock_name: String,
    pub selection_score: f64,
    pub selection_criteria: serde_json::Value,
    pub pattern_score: f64,
    pub pattern_names: Vec<String>,
    pub rsi: f64,
    pub macd: f64,
    pub sma_20: f64,
    pub yesterday_close: f64,
    pub yesterday_volume: u64,
    pub market_cap: f64,
}

/// Intraday scan row.
#[derive(Debug, Clone, Default)]
pub struct IntradayScanRow {
    pub stock_code: String,
    pub stock_name: String,
    pub selection_score: f64,
    pub selection_criteria: serde_json::Value,
    pub scan_reason: String,
    pub current_price: f64,
    pub volume_spike_ratio: f64,
    pub price_change_rate: f64,
    pub contract_strength: f64,
    pub buy_ratio: f64,
}

/// Buy-side execution row.
#[derive(Debug, Clone, Default)]
pub struct BuyOrderRow {
    pub stock_code: String,
    pub stock_name: String,
    pub order_id: String,
    pub order_orgno: String,
    pub order_status: String,
    pub order_price: f64,
    pub execution_price: f64,
    pub quantity: u32,
    pub total_amount: f64,
    pub target_profit_rate: f64,
    pub stop_loss_rate: f64,
    pub selection_source: String,
    pub selection_criteria: serde_json::Value,
    pub market_phase: String,
}

/// Sell-side execution row.
#[derive(Debug, Clone, Default)]
pub struct SellOrderRow {
    pub stock_code: String,
    pub stock_name: String,
    pub order_id: String,
    pub order_orgno: String,
    pub order_status: String,
    pub order_price: f64,
    pub execution_price: f64,
    pub quantity: u32,
    pub total_amount: f64,
    pub profit_loss: f64,
    pub profit_loss_rate: f64,
    pub holding_minutes: f64,
    pub sell_reason: String,
    pub market_phase: String,
}

/// Daily summary row, upserted by trade_date.
#[derive(Debug, Clone, Default)]
pub struct DailySummaryRow {
    pub pre_market_scanned_count: u32,
    pub intraday_scanned_count: u32,
    pub total_buy_orders: u32,
    pub total_sell_orders: u32,
    pub executed_buy_orders: u32,
    pub executed_sell_orders: u32,
    pub total_profit_loss: f64,
    pub win_count: u32,
    pub loss_count: u32,
    pub win_rate: f64,
    pub total_investment: f64,
    pub max_position_count: u32,
    pub avg_holding_minutes: f64,
}

/// Parameter-tuning metrics row, keyed by trade_date.
#[derive(Debug, Clone, Default)]
pub struct DailyMetricsRow {
    pub trades: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub max_drawdown: f64,
    pub params_json: serde_json::Value,
}

impl TradeDatabase {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let db = Self {
            db_path: db_path.to_string_lossy().into_owned(),
        };
        db.init_schema()?;
        info!(path = %db.db_path, "trade database initialised");
        Ok(db)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .with_context(|| format!("failed to open database {}", self.db_path))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pre_market_scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_date DATE NOT NULL,
                scan_time DATETIME NOT NULL,
                stock_code VARCHAR(10) NOT NULL,
                stock_name VARCHAR(100) NOT NULL,
                selection_score DECIMAL(5,2),
                selection_criteria TEXT,
                pattern_score DECIMAL(5,2),
                pattern_names TEXT,
                rsi DECIMAL(5,2),
                macd DECIMAL(8,4),
                sma_20 DECIMAL(10,2),
                yesterday_close DECIMAL(10,2),
                yesterday_volume BIGINT,
                market_cap BIGINT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS intraday_scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_date DATE NOT NULL,
                scan_time DATETIME NOT NULL,
                stock_code VARCHAR(10) NOT NULL,
                stock_name VARCHAR(100) NOT NULL,
                selection_score DECIMAL(5,2),
                selection_criteria TEXT,
                scan_reason VARCHAR(50),
                current_price DECIMAL(10,2),
                volume_spike_ratio DECIMAL(5,2),
                price_change_rate DECIMAL(5,2),
                contract_strength DECIMAL(5,2),
                buy_ratio DECIMAL(5,2),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS buy_orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_date DATE NOT NULL,
                order_time DATETIME NOT NULL,
                execution_time DATETIME,
                stock_code VARCHAR(10) NOT NULL,
                stock_name VARCHAR(100) NOT NULL,
                order_id VARCHAR(50),
                order_orgno VARCHAR(10),
                order_status VARCHAR(20),
                order_price DECIMAL(10,2),
                execution_price DECIMAL(10,2),
                quantity INTEGER,
                total_amount DECIMAL(15,2),
                target_profit_rate DECIMAL(5,2),
                stop_loss_rate DECIMAL(5,2),
                selection_source VARCHAR(20),
                selection_criteria TEXT,
                market_phase VARCHAR(20),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sell_orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_date DATE NOT NULL,
                order_time DATETIME NOT NULL,
                execution_time DATETIME,
                stock_code VARCHAR(10) NOT NULL,
                stock_name VARCHAR(100) NOT NULL,
                buy_order_id INTEGER,
                order_id VARCHAR(50),
                order_orgno VARCHAR(10),
                order_status VARCHAR(20),
                order_price DECIMAL(10,2),
                execution_price DECIMAL(10,2),
                quantity INTEGER,
                total_amount DECIMAL(15,2),
                profit_loss DECIMAL(15,2),
                profit_loss_rate DECIMAL(5,2),
                holding_minutes INTEGER,
                sell_reason VARCHAR(50),
                sell_criteria TEXT,
                market_phase VARCHAR(20),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (buy_order_id) REFERENCES buy_orders(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS daily_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_date DATE NOT NULL UNIQUE,
                pre_market_scanned_count INTEGER DEFAULT 0,
                intraday_scanned_count INTEGER DEFAULT 0,
                total_buy_orders INTEGER DEFAULT 0,
                total_sell_orders INTEGER DEFAULT 0,
                executed_buy_orders INTEGER DEFAULT 0,
                executed_sell_orders INTEGER DEFAULT 0,
                total_profit_loss DECIMAL(15,2) DEFAULT 0,
                win_count INTEGER DEFAULT 0,
                loss_count INTEGER DEFAULT 0,
                win_rate DECIMAL(5,2) DEFAULT 0,
                total_investment DECIMAL(15,2) DEFAULT 0,
                max_position_count INTEGER DEFAULT 0,
                avg_holding_minutes DECIMAL(8,2) DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metrics_daily (
                trade_date DATE PRIMARY KEY,
                trades INTEGER,
                win_rate REAL,
                total_pnl REAL,
                avg_pnl REAL,
                max_drawdown REAL DEFAULT 0,
                params_json TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_pre_market_date ON pre_market_scans(scan_date)",
            "CREATE INDEX IF NOT EXISTS idx_pre_market_stock ON pre_market_scans(stock_code)",
            "CREATE INDEX IF NOT EXISTS idx_intraday_date ON intraday_scans(scan_date)",
            "CREATE INDEX IF NOT EXISTS idx_intraday_stock ON intraday_scans(stock_code)",
            "CREATE INDEX IF NOT EXISTS idx_buy_orders_date ON buy_orders(order_date)",
            "CREATE INDEX IF NOT EXISTS idx_buy_orders_stock ON buy_orders(stock_code)",
            "CREATE INDEX IF NOT EXISTS idx_sell_orders_date ON sell_orders(order_date)",
            "CREATE INDEX IF NOT EXISTS idx_sell_orders_stock ON sell_orders(stock_code)",
            "CREATE INDEX IF NOT EXISTS idx_metrics_date ON metrics_daily(trade_date)",
        ] {
            conn.execute(stmt, [])?;
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Scans
    // -------------------------------------------------------------------------

    pub fn save_pre_market_scan(&self, row: &PreMarketScanRow) -> Result<i64> {
        let conn = self.open()?;
        let now = now_kst();
        conn.execute(
            "INSERT INTO pre_market_scans (
                scan_date, scan_time, stock_code, stock_name,
                selection_score, selection_criteria,
                pattern_score, pattern_names, rsi, macd, sma_20,
                yesterday_close, yesterday_volume, market_cap
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                now.format("%Y-%m-%d").to_string(),
                now.to_rfc3339(),
                row.stock_code,
                row.stock_name,
                row.selection_score,
                row.selection_criteria.to_string(),
                row.pattern_score,
                serde_json::to_string(&row.pattern_names).unwrap_or_default(),
                row.rsi,
                row.macd,
                row.sma_20,
                row.yesterday_close,
                row.yesterday_volume as i64,
                row.market_cap,
            ],
        )
        .context("failed to insert pre-market scan")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn save_intraday_scan(&self, row: &IntradayScanRow) -> Result<i64> {
        let conn = self.open()?;
        let now = now_kst();
        conn.execute(
            "INSERT INTO intraday_scans (
                scan_date, scan_time, stock_code, stock_name,
                selection_score, selection_criteria, scan_reason,
                current_price, volume_spike_ratio, price_change_rate,
                contract_strength, buy_ratio
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                now.format("%Y-%m-%d").to_string(),
                now.to_rfc3339(),
                row.stock_code,
                row.stock_name,
                row.selection_score,
                row.selection_criteria.to_string(),
                row.scan_reason,
                row.current_price,
                row.volume_spike_ratio,
                row.price_change_rate,
                row.contract_strength,
                row.buy_ratio,
            ],
        )
        .context("failed to insert intraday scan")?;
        Ok(conn.last_insert_rowid())
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    pub fn save_buy_execution(&self, row: &BuyOrderRow) -> Result<i64> {
        let conn = self.open()?;
        let now = now_kst();
        conn.execute(
            "INSERT INTO buy_orders (
                order_date, order_time, execution_time,
                stock_code, stock_name,
                order_id, order_orgno, order_status,
                order_price, execution_price, quantity, total_amount,
                target_profit_rate, stop_loss_rate,
                selection_source, selection_criteria, market_phase
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                now.format("%Y-%m-%d").to_string(),
                now.to_rfc3339(),
                now.to_rfc3339(),
                row.stock_code,
                row.stock_name,
                row.order_id,
                row.order_orgno,
                row.order_status,
                row.order_price,
                row.execution_price,
                row.quantity,
                row.total_amount,
                row.target_profit_rate,
                row.stop_loss_rate,
                row.selection_source,
                row.selection_criteria.to_string(),
                row.market_phase,
            ],
        )
        .context("failed to insert buy execution")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn save_sell_execution(&self, row: &SellOrderRow) -> Result<i64> {
        let conn = self.open()?;
        let now = now_kst();
        conn.execute(
            "INSERT INTO sell_orders (
                order_date, order_time, execution_time,
                stock_code, stock_name,
                order_id, order_orgno, order_status,
                order_price, execution_price, quantity, total_amount,
                profit_loss, profit_loss_rate, holding_minutes,
                sell_reason, market_phase
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                now.format("%Y-%m-%d").to_string(),
                now.to_rfc3339(),
                now.to_rfc3339(),
                row.stock_code,
                row.stock_name,
                row.order_id,
                row.order_orgno,
                row.order_status,
                row.order_price,
                row.execution_price,
                row.quantity,
                row.total_amount,
                row.profit_loss,
                row.profit_loss_rate,
                row.holding_minutes as i64,
                row.sell_reason,
                row.market_phase,
            ],
        )
        .context("failed to insert sell execution")?;
        Ok(conn.last_insert_rowid())
    }

    // -------------------------------------------------------------------------
    // Daily aggregates
    // -------------------------------------------------------------------------

    pub fn upsert_daily_summary(&self, row: &DailySummaryRow) -> Result<()> {
        let conn = self.open()?;
        let now = now_kst();
        conn.execute(
            "INSERT INTO daily_summaries (
                trade_date, pre_market_scanned_count, intraday_scanned_count,
                total_buy_orders, total_sell_orders,
                executed_buy_orders, executed_sell_orders,
                total_profit_loss, win_count, loss_count, win_rate,
                total_investment, max_position_count, avg_holding_minutes, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(trade_date) DO UPDATE SET
                pre_market_scanned_count = excluded.pre_market_scanned_count,
                intraday_scanned_count = excluded.intraday_scanned_count,
                total_buy_orders = excluded.total_buy_orders,
                total_sell_orders = excluded.total_sell_orders,
                executed_buy_orders = excluded.executed_buy_orders,
                executed_sell_orders = excluded.executed_sell_orders,
                total_profit_loss = excluded.total_profit_loss,
                win_count = excluded.win_count,
                loss_count = excluded.loss_count,
                win_rate = excluded.win_rate,
                total_investment = excluded.total_investment,
                max_position_count = excluded.max_position_count,
                avg_holding_minutes = excluded.avg_holding_minutes,
                updated_at = excluded.updated_at",
            params![
                now.format("%Y-%m-%d").to_string(),
                row.pre_market_scanned_count,
                row.intraday_scanned_count,
                row.total_buy_orders,
                row.total_sell_orders,
                row.executed_buy_orders,
                row.executed_sell_orders,
                row.total_profit_loss,
                row.win_count,
                row.loss_count,
                row.win_rate,
                row.total_investment,
                row.max_position_count,
                row.avg_holding_minutes,
                now.to_rfc3339(),
            ],
        )
        .context("failed to upsert daily summary")?;
        Ok(())
    }

    pub fn save_daily_metrics(&self, row: &DailyMetricsRow) -> Result<()> {
        let conn = self.open()?;
        let now = now_kst();
        conn.execute(
            "INSERT OR REPLACE INTO metrics_daily (
                trade_date, trades, win_rate, total_pnl, avg_pnl, max_drawdown, params_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                now.format("%Y-%m-%d").to_string(),
                row.trades,
                row.win_rate,
                row.total_pnl,
                row.avg_pnl,
                row.max_drawdown,
                row.params_json.to_string(),
            ],
        )
        .context("failed to save daily metrics")?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    pub fn count_pre_market_scans_today(&self) -> Result<u32> {
        self.count_today("pre_market_scans", "scan_date")
    }

    pub fn count_intraday_scans_today(&self) -> Result<u32> {
        self.count_today("intraday_scans", "scan_date")
    }

    fn count_today(&self, table: &str, column: &str) -> Result<u32> {
        let conn = self.open()?;
        let today = now_kst().format("%Y-%m-%d").to_string();
        let count: u32 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
                params![today],
                |row| row.get(0),
            )
            .context("count query failed")?;
        Ok(count)
    }
}
