use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::api::{ExchangeClient, Notifier, OrderRequest};
use crate::db::RecordStore;
use crate::models::{
    ConfirmationDecision, ConversationKey, PendingTrade, TradeStatus,
};

/// A dispatched confirmation request waiting for the operator's answer
#[derive(Debug, Clone)]
pub struct ConfirmationTicket {
    pub key: ConversationKey,
    pub trade: PendingTrade,
    pub requested_at: DateTime<Utc>,
}

/// Gates order placement behind the concurrent-position ceiling and an
/// explicit operator approval, and writes the outcome back to the record
/// store.
///
/// The ticket map is the only shared mutable structure here. It is guarded
/// by a mutex that is never held across an await: a reply takes its ticket
/// out of the map first, so of two concurrent replies for the same key the
/// second finds nothing and is dropped.
pub struct TradeConfirmationManager<E, N, R> {
    exchange: E,
    notifier: N,
    store: R,
    max_trades: usize,
    ticket_ttl: Duration,
    tickets: Mutex<HashMap<ConversationKey, ConfirmationTicket>>,
}

impl<E, N, R> TradeConfirmationManager<E, N, R>
where
    E: ExchangeClient,
    N: Notifier,
    R: RecordStore,
{
    pub fn new(exchange: E, notifier: N, store: R, max_trades: usize, ticket_ttl: Duration) -> Self {
        Self {
            exchange,
            notifier,
            store,
            max_trades,
            ticket_ttl,
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Take in one pending trade request. Pre-checks run before any
    /// confirmation is requested; a request for a location that already has
    /// an outstanding ticket is a no-op.
    pub async fn intake(&self, trade: PendingTrade) -> anyhow::Result<()> {
        let open_positions = self.exchange.open_position_count().await?;
        if open_positions >= self.max_trades {
            tracing::warn!(
                "Trade limit reached ({}/{}), cancelling request for {}",
                open_positions,
                self.max_trades,
                trade.coin
            );
            self.finalize(&trade, TradeStatus::LimitBreached, true).await;
            return Ok(());
        }

        if trade.stop_loss.is_none() {
            tracing::warn!("Request for {} has no stop loss, cancelling", trade.coin);
            self.finalize(&trade, TradeStatus::MissingStopLoss, true).await;
            return Ok(());
        }

        {
            let tickets = self.tickets.lock().unwrap();
            if tickets.values().any(|t| t.trade.location == trade.location) {
                tracing::debug!(
                    "Row {} already awaiting confirmation, ignoring duplicate request",
                    trade.location
                );
                return Ok(());
            }
        }

        tracing::info!("Requesting confirmation for {} trade", trade.coin);
        // Dispatch before marking the row awaiting: a failed send must leave
        // the row untouched so the next poll cycle picks it up again
        let key = self
            .notifier
            .send(&confirmation_prompt(&trade), true)
            .await?;

        if let Err(e) = self
            .store
            .write_status(trade.location, &TradeStatus::AwaitingConfirmation)
            .await
        {
            tracing::warn!("Failed to mark row {} awaiting: {}", trade.location, e);
        }

        let mut tickets = self.tickets.lock().unwrap();
        tickets.insert(
            key,
            ConfirmationTicket {
                key,
                trade,
                requested_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Handle an operator reply. A reply that matches no outstanding ticket
    /// is logged and dropped; it is not an error to the caller.
    pub async fn on_reply(
        &self,
        key: ConversationKey,
        decision: ConfirmationDecision,
    ) -> anyhow::Result<()> {
        let ticket = { self.tickets.lock().unwrap().remove(&key) };
        let Some(ticket) = ticket else {
            tracing::warn!("Reply for unknown conversation {}, dropping", key);
            return Ok(());
        };

        match decision {
            ConfirmationDecision::Approve => {
                tracing::info!("Trade confirmed by operator: {}", ticket.trade.coin);
                self.execute(ticket.trade).await;
            }
            ConfirmationDecision::Reject => {
                tracing::info!("Trade declined by operator: {}", ticket.trade.coin);
                self.finalize(&ticket.trade, TradeStatus::Rejected, true).await;
            }
        }
        Ok(())
    }

    /// Auto-cancel tickets that have waited for a reply longer than the TTL
    pub async fn expire_stale(&self, now: DateTime<Utc>) {
        let expired: Vec<ConfirmationTicket> = {
            let mut tickets = self.tickets.lock().unwrap();
            let keys: Vec<ConversationKey> = tickets
                .values()
                .filter(|t| now - t.requested_at > self.ticket_ttl)
                .map(|t| t.key)
                .collect();
            keys.into_iter().filter_map(|k| tickets.remove(&k)).collect()
        };

        for ticket in expired {
            tracing::warn!(
                "Confirmation for {} expired after {} without a reply",
                ticket.trade.coin,
                self.ticket_ttl
            );
            self.finalize(&ticket.trade, TradeStatus::Expired, true).await;
        }
    }

    /// Place the order after approval. The position ceiling is re-checked
    /// here because the exchange state may have moved since intake.
    async fn execute(&self, trade: PendingTrade) {
        let open_positions = match self.exchange.open_position_count().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("Failed to read open positions before execution: {}", e);
                self.finalize(&trade, TradeStatus::ExecutionFailed, true).await;
                return;
            }
        };
        if open_positions >= self.max_trades {
            tracing::warn!(
                "Trade limit reached ({}/{}) at execution time for {}",
                open_positions,
                self.max_trades,
                trade.coin
            );
            self.finalize(&trade, TradeStatus::LimitBreached, true).await;
            return;
        }

        let request = OrderRequest {
            symbol: trade.coin.clone(),
            side: trade.side,
            qty: trade.qty,
            price: trade.entry_price,
            take_profit: trade.take_profit,
            stop_loss: trade.stop_loss,
        };

        match self.exchange.place_limit_order(&request).await {
            Ok(order_id) => {
                tracing::info!("Trade for {} executed, order id {}", trade.coin, order_id);
                self.write_status_logged(trade.location, TradeStatus::Executed).await;
                self.notify(&format!(
                    "Trade for {} executed. Order ID: {}",
                    trade.coin, order_id
                ))
                .await;
                self.notify("Stop loss set").await;
            }
            Err(e) => {
                tracing::error!("Order placement for {} failed: {}", trade.coin, e);
                // Reset the entry flag so the operator can re-arm the row
                self.finalize(&trade, TradeStatus::ExecutionFailed, true).await;
            }
        }
    }

    /// Write a terminal status, optionally clear the entry flag, and tell
    /// the operator. Store and notification failures are logged and never
    /// block the transition.
    async fn finalize(&self, trade: &PendingTrade, status: TradeStatus, clear_flag: bool) {
        self.write_status_logged(trade.location, status).await;
        if clear_flag {
            if let Err(e) = self.store.clear_entry_flag(trade.location).await {
                tracing::warn!("Failed to clear entry flag on row {}: {}", trade.location, e);
            }
        }
        self.notify(&format!("Trade for {} {}", trade.coin, status)).await;
    }

    async fn write_status_logged(&self, location: i64, status: TradeStatus) {
        if let Err(e) = self.store.write_status(location, &status).await {
            tracing::warn!("Failed to write status '{}' to row {}: {}", status, location, e);
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.send(text, false).await {
            tracing::warn!("Failed to notify operator: {}", e);
        }
    }

    /// Number of outstanding confirmation tickets
    pub fn outstanding(&self) -> usize {
        self.tickets.lock().unwrap().len()
    }
}

fn confirmation_prompt(trade: &PendingTrade) -> String {
    format!(
        "Confirm trade entry for {}:\nSide: {}\nPrice: {}\nQuantity: {}\nTake profit: {}\nStop loss: {}",
        trade.coin,
        trade.side,
        trade.entry_price,
        trade.qty,
        optional_price(trade.take_profit),
        optional_price(trade.stop_loss),
    )
}

fn optional_price(value: Option<f64>) -> String {
    value.map_or_else(|| "not set".to_string(), |v| v.to_string())
}
