use std::sync::Arc;
use std::time::Duration;

use advisory_oracle::{CachedOracle, HttpOracle};
use anyhow::{Context, Result};
use chrono::Utc;
use exchange_client::{BinanceClient, ExchangePosition, PaperExchange};
use tokio::signal::unix::SignalKind;
use tokio::time;
use trading_core::TradingError;

mod candle_feed;
mod config;
mod dead_trade;
mod engine;
mod event_log;
mod gatekeeper;
mod metrics;
mod permissiveness;
mod position_manager;
mod recovery;
mod sessions;
mod signal_generator;
mod state_manager;

use candle_feed::RetryingCandleSource;
use config::AgentConfig;
use engine::{Collaborators, Engine};
use event_log::EventLog;
use recovery::RecoveryConfig;
use signal_generator::RsiEmaSignalGenerator;
use state_manager::StateManager;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var("RUST_LOG_FORMAT") {
        Ok(format) if format.eq_ignore_ascii_case("json") => builder.json().init(),
        _ => builder.init(),
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("SIGINT received");
        }
        _ = sigterm.recv() => tracing::info!("SIGTERM received"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting scalping agent");

    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Symbol: {} ({} mode)", config.symbol, config.trading_mode);
    tracing::info!(
        "  Timeframes: primary {}, higher {}",
        config.primary_timeframe,
        config.higher_timeframe
    );
    tracing::info!(
        "  Schedule: SL {}% / TP1 {}% / TP2 {}% / trail {}%",
        config.sl_pct,
        config.tp1_pct,
        config.tp2_pct,
        config.trailing_stop_pct
    );
    tracing::info!(
        "  Gatekeeper: level {} (file {}), MTF override {} above {}%",
        config.gatekeeper_level,
        config.permissiveness_file.display(),
        if config.mtf_override_enabled { "on" } else { "off" },
        config.mtf_override_threshold
    );
    tracing::info!("  Cycle interval: {}s", config.cycle_interval_seconds);

    if !config.trading_mode.eq_ignore_ascii_case("paper") {
        tracing::warn!(
            "TRADING_MODE={} but orders are only routed to the paper exchange",
            config.trading_mode
        );
    }

    sqlx::any::install_default_drivers();
    let db_pool = sqlx::AnyPool::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    sqlx::query("SELECT 1")
        .execute(&db_pool)
        .await
        .context("state store did not answer SELECT 1")?;
    let store = StateManager::new(db_pool);
    store.init_tables().await?;
    tracing::info!("State store ready");

    let binance = BinanceClient::new(
        config.symbol.clone(),
        Duration::from_secs(config.candle_timeout_seconds),
    )?
    .with_base_url(config.binance_base_url.clone())
    .with_api_key(config.binance_api_key.clone());
    let candles = Arc::new(RetryingCandleSource::new(
        binance,
        Duration::from_secs(config.candle_timeout_seconds),
        config.candle_max_retries,
    ));

    // The paper book lives in memory, so rebuild it from the last snapshot
    let exchange = match store.load_snapshot().await? {
        Some(snapshot) if !snapshot.unreconciled => {
            let p = snapshot.position;
            tracing::info!(side = %p.side, quantity = %p.remaining_quantity, "Seeding paper book from snapshot");
            Arc::new(PaperExchange::with_positions(vec![ExchangePosition {
                symbol: p.symbol.clone(),
                side: p.side,
                quantity: p.remaining_quantity,
                entry_price: p.entry_price,
                mark_price: p.entry_price,
            }]))
        }
        _ => Arc::new(PaperExchange::new()),
    };

    let http_oracle = HttpOracle::new(config.oracle_config())?;
    if http_oracle.is_configured() {
        tracing::info!("Advisory oracle: {}", config.oracle_model);
    } else {
        tracing::warn!("ORACLE_API_KEY not set, every entry will be rejected");
    }
    let oracle = CachedOracle::new(http_oracle);

    // Reconcile before the first cycle
    let now = Utc::now();
    let recovery_config = RecoveryConfig {
        symbol: config.symbol.clone(),
        timeout_seconds: config.recovery_timeout_seconds,
        max_failures: config.emergency_max_failures,
    };
    let outcome = recovery::recover(&store, exchange.as_ref(), &recovery_config, now).await?;
    tracing::info!("Startup recovery: {}", outcome.name());

    let events = EventLog::open(config.event_log_path()).await?;
    tracing::info!("Event log: {}", events.path().display());

    let collaborators = Collaborators {
        candles,
        exchange,
        generator: Box::new(RsiEmaSignalGenerator::new(config.schedule())),
        oracle: Box::new(oracle),
    };
    let mut engine = Engine::new(config.clone(), collaborators, store, events, now);
    engine.restore(&outcome, now).await?;

    tracing::info!(
        "Agent is now running. Cycling every {}s. Press Ctrl+C to stop.",
        config.cycle_interval_seconds
    );

    let mut ticker = time::interval(Duration::from_secs(config.cycle_interval_seconds));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.run_cycle(Utc::now()).await {
                    Ok(outcome) => tracing::debug!(?outcome, "Cycle finished"),
                    Err(e) => {
                        if e.downcast_ref::<TradingError>().is_some_and(|te| te.is_fatal()) {
                            tracing::error!("Fatal error, stopping: {}", e);
                            std::process::exit(1);
                        }
                        tracing::error!("Cycle {} failed: {}", engine.state.cycle, e);
                    }
                }
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::error!("Signal handler failed: {}", e);
                }
                tracing::info!("Stopping, flushing state");
                if let Err(e) = engine.shutdown(Utc::now()).await {
                    tracing::error!("Failed to persist state on shutdown: {}", e);
                }
                let stats = engine.gatekeeper().stats();
                tracing::info!(
                    "Gatekeeper: {} evaluated, {:.1}% approved, avg oracle confidence {:.2}",
                    stats.total,
                    stats.approval_rate(),
                    stats.average_confidence()
                );
                break;
            }
        }
    }

    tracing::info!("Scalping agent stopped");
    Ok(())
}
