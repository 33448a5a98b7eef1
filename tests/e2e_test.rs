use levelbot::api::{ExchangeClient, Notifier, OrderRequest};
use levelbot::db::RecordStore;
use levelbot::engine::{AggregatorConfig, AlertAggregator};
use levelbot::models::{
    ConfirmationDecision, ConversationKey, Direction, PendingTrade, PriceTick, ScenarioSignal,
    TradeSide, TradeStatus, TriggerLevels,
};
use levelbot::monitor::LevelMonitor;
use levelbot::trade::TradeConfirmationManager;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// In-memory collaborators
// ============================================================================

#[derive(Clone, Default)]
struct MemoryExchange {
    open_positions: Arc<Mutex<usize>>,
    orders: Arc<Mutex<Vec<OrderRequest>>>,
}

#[async_trait]
impl ExchangeClient for MemoryExchange {
    async fn open_position_count(&self) -> anyhow::Result<usize> {
        Ok(*self.open_positions.lock().unwrap())
    }

    async fn place_limit_order(&self, request: &OrderRequest) -> anyhow::Result<String> {
        let mut orders = self.orders.lock().unwrap();
        orders.push(request.clone());
        Ok(format!("order-{}", orders.len()))
    }
}

#[derive(Clone, Default)]
struct MemoryNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    next_key: Arc<AtomicI64>,
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, text: &str, _with_buttons: bool) -> anyhow::Result<ConversationKey> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(self.next_key.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[derive(Clone, Default)]
struct MemoryStore {
    statuses: Arc<Mutex<Vec<(i64, String)>>>,
    cleared: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn trigger_levels(&self) -> anyhow::Result<Vec<TriggerLevels>> {
        Ok(Vec::new())
    }

    async fn pending_trade_requests(&self) -> anyhow::Result<Vec<PendingTrade>> {
        Ok(Vec::new())
    }

    async fn write_status(&self, location: i64, status: &TradeStatus) -> anyhow::Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((location, status.as_str().to_string()));
        Ok(())
    }

    async fn clear_entry_flag(&self, location: i64) -> anyhow::Result<()> {
        self.cleared.lock().unwrap().push(location);
        Ok(())
    }
}

fn tick(symbol: &str, price: f64, at: DateTime<Utc>) -> PriceTick {
    PriceTick {
        symbol: symbol.to_string(),
        price,
        observed_at: at,
    }
}

#[tokio::test]
async fn test_e2e_pipeline() {
    let _ = tracing_subscriber::fmt::try_init();

    println!("=== Starting E2E Test ===\n");

    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

    // 1. Level crossing detection
    println!("1. Testing Level Crossing Detection...");
    let mut monitor = LevelMonitor::new(vec![
        TriggerLevels {
            symbol: "BTCUSDT".to_string(),
            long_level: Some(60000.0),
            short_level: None,
        },
        TriggerLevels {
            symbol: "ETHUSDT".to_string(),
            long_level: Some(3000.0),
            short_level: None,
        },
        TriggerLevels {
            symbol: "SOLUSDT".to_string(),
            long_level: Some(150.0),
            short_level: None,
        },
    ]);

    // First observation only seeds the previous price
    assert!(monitor.on_tick(&tick("BTCUSDT", 60500.0, t0)).is_empty());
    assert!(monitor.on_tick(&tick("ETHUSDT", 3050.0, t0)).is_empty());
    assert!(monitor.on_tick(&tick("SOLUSDT", 152.0, t0)).is_empty());

    let mut alerts = Vec::new();
    alerts.extend(monitor.on_tick(&tick("BTCUSDT", 59900.0, t0 + Duration::minutes(1))));
    alerts.extend(monitor.on_tick(&tick("ETHUSDT", 2990.0, t0 + Duration::minutes(2))));
    alerts.extend(monitor.on_tick(&tick("SOLUSDT", 149.0, t0 + Duration::minutes(3))));

    assert_eq!(alerts.len(), 3);
    assert!(alerts.iter().all(|a| a.direction == Direction::Long));
    println!("   ✓ 3 long crossings detected");

    // Re-crossing the same level stays silent
    monitor.on_tick(&tick("BTCUSDT", 60500.0, t0 + Duration::minutes(4)));
    assert!(monitor
        .on_tick(&tick("BTCUSDT", 59900.0, t0 + Duration::minutes(5)))
        .is_empty());
    println!("   ✓ Latched symbol stays quiet on re-crossing");

    // 2. Alert aggregation into an entry signal
    println!("\n2. Testing Alert Aggregation...");
    let mut aggregator = AlertAggregator::new(AggregatorConfig::default());

    for alert in &alerts {
        assert!(aggregator.apply(alert).is_none());
    }
    println!("   ✓ Window open, no signal before timeout");

    let opened_at = t0 + Duration::minutes(3);
    assert!(aggregator
        .evaluate_at(opened_at + Duration::minutes(59))
        .is_empty());

    let signals = aggregator.evaluate_at(opened_at + Duration::minutes(60));
    assert_eq!(signals, vec![ScenarioSignal::Entry(Direction::Long)]);
    println!("   ✓ Entry signal after 60 min window");

    // 3. Confirmed trade execution
    println!("\n3. Testing Trade Confirmation...");
    let exchange = MemoryExchange::default();
    let notifier = MemoryNotifier::default();
    let store = MemoryStore::default();
    let confirmations = TradeConfirmationManager::new(
        exchange.clone(),
        notifier.clone(),
        store.clone(),
        5,
        Duration::hours(12),
    );

    let trade = PendingTrade {
        location: 1,
        coin: "BTCUSDT".to_string(),
        side: TradeSide::Buy,
        entry_price: 59900.0,
        qty: 0.1,
        take_profit: Some(65000.0),
        stop_loss: Some(58000.0),
    };
    confirmations.intake(trade).await.unwrap();
    assert_eq!(confirmations.outstanding(), 1);
    println!("   ✓ Confirmation prompt dispatched");

    // The first message sent is the confirmation prompt; its key is 1
    confirmations
        .on_reply(1, ConfirmationDecision::Approve)
        .await
        .unwrap();

    let orders = exchange.orders.lock().unwrap().clone();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].symbol, "BTCUSDT");
    assert_eq!(orders[0].stop_loss, Some(58000.0));
    println!("   ✓ Approved trade placed on the exchange");

    let statuses = store.statuses.lock().unwrap().clone();
    assert_eq!(
        statuses.last().map(|(_, s)| s.as_str()),
        Some(TradeStatus::Executed.as_str())
    );
    // Executed rows keep their entry flag
    assert!(store.cleared.lock().unwrap().is_empty());
    println!("   ✓ Status written back: {}", TradeStatus::Executed);

    // 4. Position ceiling blocks further trades
    println!("\n4. Testing Trade Limit...");
    *exchange.open_positions.lock().unwrap() = 5;

    let blocked = PendingTrade {
        location: 2,
        coin: "ETHUSDT".to_string(),
        side: TradeSide::Buy,
        entry_price: 2990.0,
        qty: 1.0,
        take_profit: None,
        stop_loss: Some(2800.0),
    };
    confirmations.intake(blocked).await.unwrap();

    assert_eq!(confirmations.outstanding(), 0);
    assert_eq!(exchange.orders.lock().unwrap().len(), 1);
    let statuses = store.statuses.lock().unwrap().clone();
    assert_eq!(
        statuses.last().map(|(_, s)| s.as_str()),
        Some(TradeStatus::LimitBreached.as_str())
    );
    assert_eq!(store.cleared.lock().unwrap().as_slice(), &[2]);
    println!("   ✓ Request past the ceiling cancelled and re-armed");

    println!("\n=== E2E Test Complete ✅ ===");
}

#[tokio::test]
async fn test_e2e_cancel_scenario() {
    let _ = tracing_subscriber::fmt::try_init();

    println!("=== Starting Cancel Scenario Test ===\n");

    let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();

    let symbols: Vec<String> = (1..=8).map(|i| format!("COIN{}USDT", i)).collect();
    let mut monitor = LevelMonitor::new(
        symbols
            .iter()
            .map(|s| TriggerLevels {
                symbol: s.clone(),
                long_level: Some(100.0),
                short_level: None,
            })
            .collect(),
    );
    let mut aggregator = AlertAggregator::new(AggregatorConfig::default());

    println!("1. Crossing 8 symbols inside one window...");
    let mut last_signal = None;
    for (i, symbol) in symbols.iter().enumerate() {
        let at = t0 + Duration::minutes(i as i64);
        monitor.on_tick(&tick(symbol, 101.0, at));
        for alert in monitor.on_tick(&tick(symbol, 99.0, at + Duration::seconds(30))) {
            if let Some(signal) = aggregator.apply(&alert) {
                last_signal = Some((i + 1, signal));
            }
        }
    }

    // The 8th distinct symbol inside the timeout cancels the scenario
    let (at_count, signal) = last_signal.expect("expected a cancel signal");
    assert_eq!(at_count, 8);
    assert_eq!(signal, ScenarioSignal::Cancel(Direction::Long));
    println!("   ✓ Cancel fired on the 8th distinct symbol");

    // No lingering entry after the timeout
    assert!(aggregator.evaluate_at(t0 + Duration::minutes(120)).is_empty());
    println!("   ✓ Window fully reset after cancel");

    println!("\n=== Cancel Scenario Test Complete ✅ ===");
}
