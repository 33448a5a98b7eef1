// Exchange and notification collaborators
pub mod bybit;
pub mod telegram;

pub use bybit::BybitClient;
pub use telegram::TelegramClient;

use async_trait::async_trait;

use crate::models::{ConversationKey, TradeSide};

/// A limit order as handed to the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub qty: f64,
    pub price: f64,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

/// Order placement and position count, the only exchange capabilities the
/// confirmation pipeline needs.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Number of currently open positions on the account
    async fn open_position_count(&self) -> anyhow::Result<usize>;

    /// Place a limit order; returns the exchange order id
    async fn place_limit_order(&self, request: &OrderRequest) -> anyhow::Result<String>;
}

/// Outbound operator messaging. Delivery is best-effort; callers log
/// failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message, optionally with Yes/No confirmation buttons.
    /// Returns the conversation key replies will carry.
    async fn send(&self, text: &str, with_confirmation_buttons: bool)
        -> anyhow::Result<ConversationKey>;
}
