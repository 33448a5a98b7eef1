use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a trigger level and of the scenario built on top of it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Order side as the exchange understands it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        }
    }

    /// Parse the side column of a trade-request row. Case-insensitive.
    pub fn parse(s: &str) -> Option<TradeSide> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "long" => Some(TradeSide::Buy),
            "sell" | "short" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-defined trigger levels for one instrument. Absence of a level
/// disables that direction for the symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerLevels {
    pub symbol: String,
    pub long_level: Option<f64>,
    pub short_level: Option<f64>,
}

/// A single price observation. Transient; not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// A one-shot level-crossing event emitted by the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    pub level: f64,
    pub timestamp: DateTime<Utc>,
}

/// Decision produced by the alert aggregator for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioSignal {
    Entry(Direction),
    Cancel(Direction),
}

/// A trade request read from the record store, waiting to be walked through
/// the confirmation pipeline. `location` is the row key the final status is
/// written back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTrade {
    pub location: i64,
    pub coin: String,
    pub side: TradeSide,
    pub entry_price: f64,
    pub qty: f64,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

/// Lifecycle status of a trade request, written back to the record store as
/// a human-readable string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    AwaitingConfirmation,
    Executed,
    ExecutionFailed,
    Rejected,
    LimitBreached,
    MissingStopLoss,
    Expired,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::AwaitingConfirmation => "awaiting confirmation",
            TradeStatus::Executed => "entry executed",
            TradeStatus::ExecutionFailed => "entry failed",
            TradeStatus::Rejected => "cancelled: operator declined",
            TradeStatus::LimitBreached => "cancelled: trade limit reached",
            TradeStatus::MissingStopLoss => "cancelled: stop loss not set",
            TradeStatus::Expired => "cancelled: confirmation expired",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator's answer to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Approve,
    Reject,
}

/// Identity of an outstanding confirmation conversation. For Telegram this
/// is the message id of the prompt we sent.
pub type ConversationKey = i64;
