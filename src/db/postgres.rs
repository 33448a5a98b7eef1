use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::db::RecordStore;
use crate::models::{PendingTrade, TradeSide, TradeStatus, TriggerLevels};
use crate::Result;

/// Postgres-backed record store
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Connect and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn trigger_levels(&self) -> anyhow::Result<Vec<TriggerLevels>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, long_level, short_level
            FROM trigger_levels
            WHERE active
            ORDER BY symbol
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let levels = rows
            .into_iter()
            .map(|row| TriggerLevels {
                symbol: row.get("symbol"),
                long_level: row.get("long_level"),
                short_level: row.get("short_level"),
            })
            .collect();

        Ok(levels)
    }

    async fn pending_trade_requests(&self) -> anyhow::Result<Vec<PendingTrade>> {
        let rows = sqlx::query(
            r#"
            SELECT id, coin, side, entry_price, qty, take_profit, stop_loss
            FROM trade_requests
            WHERE entry_requested
              AND (status IS NULL OR status NOT IN ($1, $2))
            ORDER BY id
            "#,
        )
        .bind(TradeStatus::AwaitingConfirmation.as_str())
        .bind(TradeStatus::Executed.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::new();
        for row in rows {
            let location: i64 = row.get("id");

            // Malformed rows are skipped, not fatal to the poll cycle
            let side_raw: Option<String> = row.get("side");
            let Some(side) = side_raw.as_deref().and_then(TradeSide::parse) else {
                tracing::warn!(
                    "Row {}: unparseable side {:?}, skipping",
                    location,
                    side_raw
                );
                continue;
            };
            let coin: Option<String> = row.get("coin");
            let entry_price: Option<f64> = row.get("entry_price");
            let qty: Option<f64> = row.get("qty");
            let (Some(coin), Some(entry_price), Some(qty)) = (coin, entry_price, qty) else {
                tracing::warn!("Row {}: missing required trade fields, skipping", location);
                continue;
            };

            trades.push(PendingTrade {
                location,
                coin,
                side,
                entry_price,
                qty,
                take_profit: row.get("take_profit"),
                stop_loss: row.get("stop_loss"),
            });
        }

        tracing::debug!("Found {} pending trade requests", trades.len());
        Ok(trades)
    }

    async fn write_status(&self, location: i64, status: &TradeStatus) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE trade_requests
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(location)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Row {}: status set to '{}'", location, status);
        Ok(())
    }

    async fn clear_entry_flag(&self, location: i64) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE trade_requests
            SET entry_requested = FALSE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(location)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Row {}: entry flag cleared", location);
        Ok(())
    }
}
