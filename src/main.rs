// =============================================================================
// Haetae — KIS day-trading engine, main entry point
// =============================================================================
//
// Startup order: config + symbol master, the shared stock store, the broker
// REST client, the websocket gateway with its callbacks, the executor and
// notice processor, then the pre-market scan and the monitor loop. The
// engine trades only what the scan selected; credentials come from the
// environment and are never logged.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyzer;
mod broker;
mod config;
mod db;
mod execution_notice;
mod executor;
mod monitor;
mod recovery;
mod scanner;
mod stock;
mod symbols;
mod types;
mod ws;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::client::{KisClient, KisCredentials};
use crate::config::{ConfigRegistry, TradingConfig};
use crate::db::TradeDatabase;
use crate::execution_notice::NoticeProcessor;
use crate::executor::OrderExecutor;
use crate::monitor::RealtimeMonitor;
use crate::recovery::OrderRecoveryManager;
use crate::scanner::MarketScanner;
use crate::stock::StockStore;
use crate::symbols::SymbolDirectory;
use crate::ws::subscriptions::{GatewayEvent, TR_CONTRACT, TR_NOTICE, TR_ORDERBOOK};
use crate::ws::{connection::WsCredentials, WsGateway};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("haetae day-trading engine starting");

    let config_path = env_or("HAETAE_CONFIG", "config/trading.ini");
    let trading_config = TradingConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        TradingConfig::default()
    });
    let registry = Arc::new(ConfigRegistry::new(trading_config, &config_path));
    let cfg = registry.current();

    let symbol_path = env_or("HAETAE_SYMBOL_FILE", "data/kospi_symbols.json");
    let symbols = Arc::new(SymbolDirectory::load(&symbol_path)?);
    info!(universe = symbols.universe().len(), "symbol universe ready");

    // ── 2. Persistence ───────────────────────────────────────────────────
    let db = match TradeDatabase::new(env_or("HAETAE_DB", "data/trading.db")) {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            warn!(error = %e, "trade database unavailable, running without persistence");
            None
        }
    };

    // ── 3. Broker credentials ────────────────────────────────────────────
    let demo = env_or("KIS_DEMO", "true").eq_ignore_ascii_case("true");
    let rest_base = env_or("KIS_BASE_URL", "https://openapi.koreainvestment.com:9443");
    let app_key = env_or("KIS_APP_KEY", "");
    let app_secret = env_or("KIS_APP_SECRET", "");
    if app_key.is_empty() || app_secret.is_empty() {
        warn!("KIS_APP_KEY / KIS_APP_SECRET not set, broker calls will fail");
    }

    let client = Arc::new(KisClient::new(
        rest_base.clone(),
        demo,
        KisCredentials {
            app_key: app_key.clone(),
            app_secret: app_secret.clone(),
            access_token: env_or("KIS_ACCESS_TOKEN", ""),
            account_no: env_or("KIS_ACCOUNT_NO", ""),
            account_product: env_or("KIS_ACCOUNT_PRODUCT", "01"),
        },
    ));

    // ── 4. Shared stock store ────────────────────────────────────────────
    let store = Arc::new(StockStore::new(
        cfg.performance.max_premarket_selected_stocks,
        cfg.performance.max_intraday_selected_stocks,
        cfg.trading_strategy.max_holding_days,
        cfg.performance.cache_ttl_seconds,
        cfg.performance.enable_cache_debug,
    ));

    // ── 5. WebSocket gateway ─────────────────────────────────────────────
    let gateway = WsGateway::new(
        env_or("KIS_WS_URL", "ws://ops.koreainvestment.com:21000"),
        WsCredentials {
            rest_base,
            app_key,
            app_secret,
        },
        env_or("KIS_HTS_ID", ""),
        demo,
        cfg.performance.websocket_max_connections,
        cfg.performance.connections_per_stock,
        cfg.performance.system_connections,
    );

    // ── 6. Executor + notice processor ───────────────────────────────────
    let exec = Arc::new(OrderExecutor::new(client.clone(), store.clone(), registry.clone()));
    let (notice_processor, unsubscribe_rx) =
        NoticeProcessor::new(store.clone(), exec.clone(), db.clone());

    // Gateway callbacks feed the store; they run on the gateway task and
    // must stay brief.
    {
        let store_cb = store.clone();
        let exec_cb = exec.clone();
        gateway.on(
            TR_CONTRACT,
            Arc::new(move |event: &GatewayEvent| {
                if let GatewayEvent::Contract(tick) = event {
                    store_cb.apply_contract_tick(&tick.code, tick);
                    exec_cb.update_last_price(&tick.code, tick.current_price);
                }
            }),
        );

        let store_cb = store.clone();
        gateway.on(
            TR_ORDERBOOK,
            Arc::new(move |event: &GatewayEvent| {
                if let GatewayEvent::Orderbook(tick) = event {
                    store_cb.apply_orderbook(&tick.code, tick);
                }
            }),
        );

        let processor_cb = notice_processor.clone();
        gateway.on(
            TR_NOTICE,
            Arc::new(move |event: &GatewayEvent| {
                if let GatewayEvent::Notice(notice) = event {
                    processor_cb.handle(notice);
                }
            }),
        );
    }

    // ── 7. Scanner, recovery, monitor ────────────────────────────────────
    let scanner = Arc::new(MarketScanner::new(
        store.clone(),
        client.clone(),
        symbols.clone(),
        registry.clone(),
        gateway.clone(),
        db.clone(),
    ));
    let recovery = Arc::new(OrderRecoveryManager::new(
        store.clone(),
        exec.clone(),
        registry.clone(),
    ));
    let monitor = RealtimeMonitor::new(
        store.clone(),
        exec.clone(),
        recovery,
        scanner.clone(),
        gateway.clone(),
        registry.clone(),
        db,
        unsubscribe_rx,
    );

    // ── 8. Start the gateway loop ────────────────────────────────────────
    let gateway_task = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.run().await })
    };

    // Give the session a moment to come up before subscribing.
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    // ── 9. Pre-market scan ───────────────────────────────────────────────
    let scanned = if cfg.performance.use_advanced_scanner {
        scanner.run_advanced_pre_market_scan().await
    } else {
        scanner.run_pre_market_scan().await
    };
    if scanned {
        let summary = store.summary();
        info!(selected = summary.total_selected, "pre-market selection complete");
    } else {
        warn!("pre-market scan selected nothing, relying on intraday additions");
    }

    // ── 10. Monitor loop ─────────────────────────────────────────────────
    let monitor_task = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run().await })
    };

    info!("all subsystems running, ctrl-c to stop");

    // ── 11. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    monitor.stop();
    gateway.safe_cleanup().await;
    monitor_task.abort();
    gateway_task.abort();

    let stats = exec.statistics();
    let notices = notice_processor.counters();
    info!(
        trades = stats.total_trades,
        pnl = stats.total_pnl,
        max_drawdown = stats.max_drawdown,
        buy_fills = notices.buy_fills,
        sell_fills = notices.sell_fills,
        duplicate_notices = notices.duplicates,
        "final statistics"
    );
    info!("haetae shut down complete");
    Ok(())
}
