use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use streak_guard::api::{start_api_server, ApiState};
use streak_guard::badge::{BadgePublisher, BadgeSink, ConsoleBadgeSink};
use streak_guard::clock::{Clock, SystemClock};
use streak_guard::config::Config;
use streak_guard::engine::RuleSynchronizer;
use streak_guard::init::{init_store, setup_logging};
use streak_guard::rule_engine::InMemoryRuleEngine;
use streak_guard::scheduler::TokioScheduler;
use streak_guard::server::{Dispatcher, EventHandler};
use streak_guard::stats::StatsCollector;
use streak_guard::store::Repository;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "streak-guard.toml".to_string());
    let config_exists = std::path::Path::new(&config_path).exists();
    let config = if config_exists {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting streak-guard...");
    if !config_exists {
        info!("Config file {} not found, using defaults.", config_path);
    }

    // 3. Stats
    let stats = StatsCollector::new();
    if config.stats.enable {
        stats.spawn_logger(config.stats.log_interval_seconds);
    }

    // 4. Store
    let store = init_store(&config)?;
    let repo = Repository::new(store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 5. Rule engine + synchronizer
    let rule_engine = Arc::new(InMemoryRuleEngine::new(config.enforcement.max_rules));
    let rules = Arc::new(RuleSynchronizer::new(
        repo.clone(),
        rule_engine.clone(),
        clock.clone(),
        stats.clone(),
        config.rule_policy(),
    ));

    // 6. Alarms
    let (alarm_tx, alarm_rx) = tokio::sync::mpsc::channel(config.channels.capacity);
    let scheduler = Arc::new(TokioScheduler::new(alarm_tx, clock.clone()));

    // 7. Handler + dispatcher
    let sinks: Vec<Arc<dyn BadgeSink>> = vec![Arc::new(ConsoleBadgeSink::new())];
    let handler = EventHandler::new(
        config.clone(),
        repo.clone(),
        clock.clone(),
        scheduler,
        rules,
        BadgePublisher::new(sinks),
        stats.clone(),
    );
    let (dispatcher, handle) = Dispatcher::new(handler, alarm_rx, config.channels.capacity);

    // 8. API server
    if config.api.enable {
        let api_state = Arc::new(ApiState {
            repo,
            dispatcher: handle,
            rule_engine,
            stats,
            clock,
            config: config.clone(),
        });
        tokio::spawn(async move {
            if let Err(e) = start_api_server(api_state).await {
                error!("API server failed: {:#}", e);
            }
        });
    }

    // 9. Run until Ctrl-C
    dispatcher
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received.");
        })
        .await;

    Ok(())
}
