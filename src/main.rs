//! Parity streak prediction bot
//!
//! Process wiring: configuration, logging, the engine executor, the Telegram update
//! loop, reset supervision and the health server.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

use parity_streak_bot::commands;
use parity_streak_bot::config::{self, DailyResetSchedule, TelegramConfig};
use parity_streak_bot::destinations::DestinationStore;
use parity_streak_bot::engine::{Engine, EngineConfig};
use parity_streak_bot::executor::{create_engine_channel, run_executor, Executor};
use parity_streak_bot::health::{self, HealthState};
use parity_streak_bot::logging::{self, LogConfig};
use parity_streak_bot::metrics::Metrics;
use parity_streak_bot::retry::RetryPolicy;
use parity_streak_bot::supervisor;
use parity_streak_bot::telegram::{self, TelegramClient};
use parity_streak_bot::transport::{Broadcaster, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    // .env before anything reads configuration
    dotenvy::dotenv().ok();

    let log_config = LogConfig::from_env();
    let _log_guard = logging::init_logging(&log_config);

    let tg_config = TelegramConfig::from_env()?;
    let engine_config = EngineConfig::from_env();
    let schedule = DailyResetSchedule::from_env();
    let retry_policy = RetryPolicy::from_env();

    let root_span = info_span!(
        "parity_bot",
        run_id = %log_config.run_id,
        version = env!("CARGO_PKG_VERSION"),
        source_channel = tg_config.source_channel_id,
        history_capacity = engine_config.history_capacity,
    );
    let _enter = root_span.enter();

    info!("🚀 Parity streak prediction bot v{}", env!("CARGO_PKG_VERSION"));
    info!("   Source channel: {}", tg_config.source_channel_id);
    info!(
        "   Admin: {}",
        if tg_config.admin_enabled() {
            tg_config.admin_id.to_string()
        } else {
            "open (ADMIN_ID=0)".to_string()
        }
    );
    info!(
        "   Prediction timeout: {} min | initial mode: {}",
        engine_config.prediction_timeout.num_minutes(),
        engine_config.initial_mode
    );

    let metrics = Metrics::new();

    let store = DestinationStore::new(config::destinations_file());
    let destinations = store.load_or(&config::destinations_from_env());
    if destinations.is_empty() {
        warn!("⚠️ No prediction destinations configured; use /addchannel to add one");
    } else {
        info!("📡 {} destination(s): {:?}", destinations.len(), destinations);
    }

    let client = Arc::new(TelegramClient::new(&tg_config).context("building HTTP client")?);
    if let Err(e) = telegram::verify_token(&client).await {
        warn!("Continuing despite getMe failure: {}", e);
    }

    let transport: Arc<dyn Transport> = client.clone();
    let broadcaster = Broadcaster::new(
        transport,
        metrics.clone(),
        tg_config.admin_enabled().then_some(tg_config.admin_id),
    );

    let engine = Engine::new(engine_config, destinations);
    let (handle, rx) = create_engine_channel();
    let executor = Executor::new(
        engine,
        broadcaster.clone(),
        metrics.clone(),
        Some(store),
        &handle,
    );
    let exec_handle = tokio::spawn(run_executor(rx, executor).in_current_span());

    let reset_handle = tokio::spawn(
        supervisor::run_daily_reset(handle.clone(), schedule).in_current_span(),
    );
    let timeout_handle = tokio::spawn(
        supervisor::run_timeout_poller(
            handle.clone(),
            Duration::from_secs(config::timeout_poll_secs()),
        )
        .in_current_span(),
    );

    let health_state = HealthState {
        metrics: metrics.clone(),
        engine: handle.clone(),
        degraded_after: config::transport_degraded_after(),
        started_at: Utc::now(),
    };
    let port = config::health_port();
    let health_handle = tokio::spawn(
        async move {
            if let Err(e) = health::serve(health_state, port).await {
                error!("Health server failed: {}", e);
            }
        }
        .in_current_span(),
    );

    let poll_handle = {
        let client = client.clone();
        let handle = handle.clone();
        let metrics = metrics.clone();
        let admin_id = tg_config.admin_id;
        let source = tg_config.source_channel_id;
        tokio::spawn(
            async move {
                telegram::run_update_loop(&client, source, retry_policy.clone(), metrics, |inbound| {
                    let replies = commands::handle_inbound(
                        inbound,
                        handle.clone(),
                        broadcaster.clone(),
                        admin_id,
                        retry_policy.clone(),
                    );
                    async move {
                        replies.await;
                    }
                })
                .await
            }
            .in_current_span(),
        )
    };

    info!("✅ All systems operational");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("🛑 Shutdown requested"),
        _ = poll_handle => error!("Update loop exited"),
        _ = exec_handle => error!("Executor exited"),
    }

    reset_handle.abort();
    timeout_handle.abort();
    health_handle.abort();
    metrics.log_summary();
    Ok(())
}
