// Trigger-level and trade-request records
pub mod postgres;

pub use postgres::PostgresRecordStore;

use async_trait::async_trait;

use crate::models::{PendingTrade, TradeStatus, TriggerLevels};

/// Persistent store of operator-maintained trigger levels and trade-request
/// rows. Statuses are written back as strings so the operator can read them
/// in place.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Active trigger levels for the monitoring session
    async fn trigger_levels(&self) -> anyhow::Result<Vec<TriggerLevels>>;

    /// Rows flagged for entry whose status is neither awaiting nor executed
    async fn pending_trade_requests(&self) -> anyhow::Result<Vec<PendingTrade>>;

    /// Write a lifecycle status back to a row
    async fn write_status(&self, location: i64, status: &TradeStatus) -> anyhow::Result<()>;

    /// Reset the entry-requested flag so the operator can re-arm the row
    async fn clear_entry_flag(&self, location: i64) -> anyhow::Result<()>;
}
