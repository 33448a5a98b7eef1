use levelbot::api::bybit::BybitClient;
use levelbot::api::telegram::TelegramClient;
use levelbot::config::Settings;
use levelbot::db::{PostgresRecordStore, RecordStore};
use levelbot::engine::{AggregatorConfig, AlertAggregator};
use levelbot::models::{Alert, PriceTick, ScenarioSignal, TriggerLevels};
use levelbot::monitor::LevelMonitor;
use levelbot::trade::TradeConfirmationManager;
use levelbot::Result;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

const ALERT_CHANNEL_CAPACITY: usize = 256;

type Confirmations = TradeConfirmationManager<BybitClient, TelegramClient, PostgresRecordStore>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 LevelBot starting - Multi-Loop Architecture");

    let settings = Settings::from_env()?;

    let store = PostgresRecordStore::new(&settings.database_url).await?;
    let bybit = BybitClient::new(
        settings.bybit_api_key.clone(),
        settings.bybit_api_secret.clone(),
    );
    let telegram = TelegramClient::new(settings.telegram_token.clone(), settings.telegram_chat_id);

    // Load and validate the operator's trigger levels
    tracing::info!("📋 Loading trigger levels...");
    let levels = store.trigger_levels().await?;
    let levels = validate_symbols(&bybit, levels).await;
    if levels.is_empty() {
        return Err("No valid trigger levels configured! Cannot start bot.".into());
    }
    tracing::info!("✅ {} symbols with valid trigger levels", levels.len());

    let monitor = Arc::new(Mutex::new(LevelMonitor::new(levels)));
    let aggregator = Arc::new(Mutex::new(AlertAggregator::new(AggregatorConfig {
        alert_timeout: chrono::Duration::minutes(settings.alert_timeout_minutes),
        ..AggregatorConfig::default()
    })));
    let confirmations: Arc<Confirmations> = Arc::new(TradeConfirmationManager::new(
        bybit.clone(),
        telegram.clone(),
        store.clone(),
        settings.max_trades,
        chrono::Duration::hours(settings.ticket_ttl_hours),
    ));

    let (alert_tx, alert_rx) = mpsc::channel::<Alert>(ALERT_CHANNEL_CAPACITY);

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Alert timeout: {} min", settings.alert_timeout_minutes);
    tracing::info!("  Max concurrent trades: {}", settings.max_trades);
    tracing::info!("  Confirmation TTL: {} h", settings.ticket_ttl_hours);

    tracing::info!("\n🔄 Spawning independent loops...");

    // Loop 1: Price Poll (fetch prices, detect level crossings)
    let price_task = {
        let bybit = bybit.clone();
        let monitor = monitor.clone();
        let telegram = telegram.clone();
        let poll_secs = settings.price_poll_secs;
        tokio::spawn(async move {
            price_poll_loop(bybit, monitor, telegram, alert_tx, poll_secs).await;
        })
    };

    // Loop 2: Engine (aggregate alerts into entry/cancel signals)
    let engine_task = {
        let aggregator = aggregator.clone();
        let telegram = telegram.clone();
        let poll_secs = settings.engine_poll_secs;
        tokio::spawn(async move {
            engine_loop(alert_rx, aggregator, telegram, poll_secs).await;
        })
    };

    // Loop 3: Trade Poll (pick up armed trade requests, expire stale tickets)
    let trade_task = {
        let store = store.clone();
        let confirmations = confirmations.clone();
        let poll_secs = settings.trade_poll_secs;
        tokio::spawn(async move {
            trade_poll_loop(store, confirmations, poll_secs).await;
        })
    };

    // Loop 4: Replies (long-poll Telegram for operator decisions)
    let reply_task = {
        let telegram = telegram.clone();
        let confirmations = confirmations.clone();
        tokio::spawn(async move {
            reply_loop(telegram, confirmations).await;
        })
    };

    tracing::info!("✅ All loops spawned successfully");
    tracing::info!("  📈 Price poll: every {}s", settings.price_poll_secs);
    tracing::info!("  ⏱️  Engine: every {}s", settings.engine_poll_secs);
    tracing::info!("  💹 Trade poll: every {}s", settings.trade_poll_secs);
    tracing::info!("  💬 Replies: long-poll");
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = price_task => {
            tracing::error!("Price poll loop exited: {:?}", result);
        }
        result = engine_task => {
            tracing::error!("Engine loop exited: {:?}", result);
        }
        result = trade_task => {
            tracing::error!("Trade poll loop exited: {:?}", result);
        }
        result = reply_task => {
            tracing::error!("Reply loop exited: {:?}", result);
        }
    }

    tracing::info!("👋 LevelBot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("levelbot=info")
        .init();
}

/// Drop levels whose symbol the exchange does not recognize. A lookup
/// failure keeps the level; the exchange may just be unreachable right now.
async fn validate_symbols(bybit: &BybitClient, levels: Vec<TriggerLevels>) -> Vec<TriggerLevels> {
    let mut valid = Vec::new();
    for entry in levels {
        match bybit.symbol_exists(&entry.symbol).await {
            Ok(true) => valid.push(entry),
            Ok(false) => {
                tracing::warn!("  ✗ {} is not a known instrument, skipping", entry.symbol);
            }
            Err(e) => {
                tracing::warn!(
                    "  ? Could not validate {} ({}), keeping it anyway",
                    entry.symbol,
                    e
                );
                valid.push(entry);
            }
        }
    }
    valid
}

// ============================================================================
// Independent Loop Tasks
// ============================================================================

/// Loop 1: poll last-traded prices for every monitored symbol and push any
/// crossing alerts onto the engine channel.
async fn price_poll_loop(
    bybit: BybitClient,
    monitor: Arc<Mutex<LevelMonitor>>,
    telegram: TelegramClient,
    alert_tx: mpsc::Sender<Alert>,
    poll_secs: u64,
) {
    tracing::info!("📈 Price Poll Loop starting...");

    let symbols = monitor.lock().unwrap().symbols();

    let mut ticker = interval(Duration::from_secs(poll_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        for symbol in &symbols {
            let price = match bybit.last_price(symbol).await {
                Ok(price) => price,
                Err(e) => {
                    tracing::warn!("  ✗ Price fetch failed for {}: {}", symbol, e);
                    continue;
                }
            };

            let tick = PriceTick {
                symbol: symbol.clone(),
                price,
                observed_at: Utc::now(),
            };
            let alerts = monitor.lock().unwrap().on_tick(&tick);

            for alert in alerts {
                notify(&telegram, &crossing_message(&alert)).await;
                if alert_tx.send(alert).await.is_err() {
                    tracing::error!("Alert channel closed, stopping price poll loop");
                    return;
                }
            }
        }
    }
}

/// Loop 2: feed alerts into the aggregator as they arrive, and re-evaluate
/// the windows on a timer so time-based entries fire even in a quiet market.
async fn engine_loop(
    mut alert_rx: mpsc::Receiver<Alert>,
    aggregator: Arc<Mutex<AlertAggregator>>,
    telegram: TelegramClient,
    poll_secs: u64,
) {
    tracing::info!("⏱️  Engine Loop starting...");

    let mut ticker = interval(Duration::from_secs(poll_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe_alert = alert_rx.recv() => {
                let Some(alert) = maybe_alert else {
                    tracing::error!("Alert channel closed, stopping engine loop");
                    return;
                };
                let signal = aggregator.lock().unwrap().apply(&alert);
                if let Some(signal) = signal {
                    notify(&telegram, &signal_message(&signal)).await;
                }
            }
            _ = ticker.tick() => {
                let signals = aggregator.lock().unwrap().evaluate_at(Utc::now());
                for signal in signals {
                    notify(&telegram, &signal_message(&signal)).await;
                }
            }
        }
    }
}

/// Loop 3: pick up trade requests the operator has armed and hand them to
/// the confirmation manager; expire tickets that never got a reply.
async fn trade_poll_loop(
    store: PostgresRecordStore,
    confirmations: Arc<Confirmations>,
    poll_secs: u64,
) {
    tracing::info!("💹 Trade Poll Loop starting...");

    let mut ticker = interval(Duration::from_secs(poll_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        confirmations.expire_stale(Utc::now()).await;

        let trades = match store.pending_trade_requests().await {
            Ok(trades) => trades,
            Err(e) => {
                tracing::warn!("  ✗ Failed to read trade requests: {}", e);
                continue;
            }
        };

        for trade in trades {
            let coin = trade.coin.clone();
            if let Err(e) = confirmations.intake(trade).await {
                tracing::error!("  ✗ Failed to process trade request for {}: {}", coin, e);
            }
        }
    }
}

/// Loop 4: long-poll Telegram and route operator decisions to their tickets
async fn reply_loop(telegram: TelegramClient, confirmations: Arc<Confirmations>) {
    tracing::info!("💬 Reply Loop starting...");

    let mut offset = 0i64;

    loop {
        let replies = match telegram.poll_replies(&mut offset).await {
            Ok(replies) => replies,
            Err(e) => {
                tracing::warn!("  ✗ Telegram poll failed: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for reply in replies {
            if let Err(e) = confirmations.on_reply(reply.key, reply.decision).await {
                tracing::error!("  ✗ Failed to handle reply for {}: {}", reply.key, e);
            }
        }
    }
}

// ============================================================================
// Operator Messages
// ============================================================================

fn crossing_message(alert: &Alert) -> String {
    format!(
        "Level crossed: {} {} at {} (level {})",
        alert.symbol, alert.direction, alert.price, alert.level
    )
}

fn signal_message(signal: &ScenarioSignal) -> String {
    match signal {
        ScenarioSignal::Entry(direction) => format!(
            "Scenario entry: {} setup confirmed. Review armed trade requests.",
            direction
        ),
        ScenarioSignal::Cancel(direction) => format!(
            "Scenario cancelled: too many {} alerts inside the window.",
            direction
        ),
    }
}

async fn notify(telegram: &TelegramClient, text: &str) {
    if let Err(e) = telegram.send_message(text, false).await {
        tracing::warn!("  ✗ Failed to notify operator: {}", e);
    }
}
